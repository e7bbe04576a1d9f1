//! KSIF Backtest - command line entry point.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ksif_backtest::backtest::{benchmark_random, run_all, Backtest, BenchmarkOptions};
use ksif_backtest::config::Config;
use ksif_backtest::data::{CsvProvider, DataFetcher, DataProvider, Frame, GetRequest, WebProvider};
use ksif_backtest::strategy::WeightedPortfolio;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// KSIF Backtest CLI
#[derive(Parser)]
#[command(name = "ksif")]
#[command(version, about = "Backtest weighted portfolios and benchmark them against random ones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DataArgs {
    /// Path to CSV price table (dates in the first column)
    #[arg(short, long)]
    data: String,

    /// Comma-separated columns to use instead of the whole table
    #[arg(short, long)]
    tickers: Option<String>,

    /// Rebalance every this many dates (0 = only on entry)
    #[arg(short, long, default_value = "20")]
    rebalance_every: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Run equal-weight (and optionally random-weight) backtests
    Backtest {
        #[command(flatten)]
        data: DataArgs,

        /// Name of the equal-weight run
        #[arg(short, long, default_value = "equal")]
        name: String,

        /// Also run a random-weight portfolio with this seed
        #[arg(long)]
        random_seed: Option<u64>,

        /// Save the results under the configured save directory
        #[arg(long)]
        save: bool,
    },

    /// Compare an equal-weight run with random-weight runs
    Benchmark {
        #[command(flatten)]
        data: DataArgs,

        /// Number of random runs (overrides configuration)
        #[arg(long)]
        nsim: Option<usize>,

        /// Statistic to compare (overrides configuration)
        #[arg(long)]
        statistic: Option<String>,

        /// Base seed of the random runs (overrides configuration)
        #[arg(long)]
        seed: Option<u64>,

        /// Run the random backtests one after another
        #[arg(long)]
        sequential: bool,
    },

    /// Download tickers from the web provider and print the aligned table
    Fetch {
        /// Comma-separated tickers, optionally `ticker;field`
        tickers: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,

        /// Rows to print from the end of the table
        #[arg(long, default_value = "10")]
        tail: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_logging(&config.output.log_dir)?;
    info!("KSIF Backtest v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Backtest {
            data,
            name,
            random_seed,
            save,
        } => run_backtests(&config, &data, &name, random_seed, save),
        Commands::Benchmark {
            data,
            nsim,
            statistic,
            seed,
            sequential,
        } => {
            let mut options = BenchmarkOptions::from(&config.benchmark);
            options.nsim = nsim.unwrap_or(options.nsim);
            options.seed = seed.or(options.seed);
            options.parallel &= !sequential;
            let statistic = statistic.unwrap_or_else(|| config.benchmark.statistic.clone());
            run_benchmark(&config, &data, &options, &statistic)
        }
        Commands::Fetch {
            tickers,
            start,
            end,
            tail,
        } => run_fetch(&config, &tickers, start.as_deref(), end.as_deref(), tail),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging(log_dir: &str) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::hourly(log_dir, "ksif.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ksif_backtest=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn load_prices(config: &Config, args: &DataArgs) -> Result<Frame> {
    info!("Loading data from: {}", args.data);
    let provider: Arc<dyn DataProvider> = Arc::new(CsvProvider::new(&args.data));
    let fetcher = DataFetcher::new(provider);

    let request = match &args.tickers {
        Some(tickers) => GetRequest::from_config(tickers, &config.data),
        None => GetRequest::from_config(&args.data, &config.data),
    };
    let frame = fetcher
        .get(&request)
        .with_context(|| format!("Failed to load prices from {}", args.data))?;

    info!(
        "   {} dates x {} securities",
        frame.n_rows(),
        frame.n_cols()
    );
    Ok(frame)
}

fn run_backtests(
    config: &Config,
    args: &DataArgs,
    name: &str,
    random_seed: Option<u64>,
    save: bool,
) -> Result<()> {
    let prices = Arc::new(load_prices(config, args)?);

    let equal = WeightedPortfolio::equal(name).with_rebalance_every(args.rebalance_every);
    let mut backtests = vec![Backtest::new(&equal, prices.clone(), config.backtest.clone())?];
    if let Some(seed) = random_seed {
        let random = WeightedPortfolio::random(format!("random_{}", seed), Some(seed))
            .with_rebalance_every(args.rebalance_every);
        backtests.push(Backtest::new(&random, prices, config.backtest.clone())?);
    }

    let result = run_all(backtests)?;

    println!("\n{}", result.display());
    for backtest in result.backtests() {
        println!("\n{}", result.display_monthly_returns(backtest.name())?);
    }

    if save {
        std::fs::create_dir_all(&config.output.save_dir)?;
        let path = result.save(&config.output.save_dir)?;
        println!("Results saved to: {}", path.display());
    }

    Ok(())
}

fn run_benchmark(
    config: &Config,
    args: &DataArgs,
    options: &BenchmarkOptions,
    statistic: &str,
) -> Result<()> {
    let prices = Arc::new(load_prices(config, args)?);

    let equal = WeightedPortfolio::equal("equal").with_rebalance_every(args.rebalance_every);
    let template =
        WeightedPortfolio::random("random", None).with_rebalance_every(args.rebalance_every);
    let baseline = Backtest::new(&equal, prices, config.backtest.clone())?;

    let result = benchmark_random(baseline, &template, options)?;

    println!("\n{}", result.base_stats());
    println!(
        "\n{}",
        result.distribution(statistic, config.benchmark.bins)?
    );
    Ok(())
}

fn run_fetch(
    config: &Config,
    tickers: &str,
    start: Option<&str>,
    end: Option<&str>,
    tail: usize,
) -> Result<()> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", s, e))
    };
    let start = start.map(parse).transpose()?;
    let end = end.map(parse).transpose()?;

    let provider = WebProvider::new(&config.data.web_base_url, config.data.request_timeout_secs)?;
    let fetcher = DataFetcher::new(Arc::new(provider));
    let frame = fetcher.get(&GetRequest::from_config(tickers, &config.data).with_range(start, end))?;

    print!("{:<12}", "Date");
    for column in frame.columns() {
        print!("{:>14}", column);
    }
    println!();
    for r in frame.n_rows().saturating_sub(tail)..frame.n_rows() {
        print!("{:<12}", frame.index()[r].format("%Y-%m-%d"));
        for v in frame.row(r).unwrap_or_default() {
            print!("{:>14.4}", v);
        }
        println!();
    }
    Ok(())
}
