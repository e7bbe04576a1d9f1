//! Brokerage commission schedules.
//!
//! Both schedules charge a percentage of the traded notional rounded down
//! to a multiple of 10, plus a 0.3% transaction tax on sells.

use crate::strategy::{no_commission, CommissionFn};
use crate::utils::decimal::{floor_to_multiple, from_f64, to_f64};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SELL_TAX_RATE: Decimal = dec!(0.003);
const FEE_STEP: Decimal = dec!(10);

fn sell_tax(quantity: Decimal, notional: Decimal) -> Decimal {
    if quantity < Decimal::ZERO {
        (notional * SELL_TAX_RATE).floor()
    } else {
        Decimal::ZERO
    }
}

/// Low-tier schedule: flat 0.024164% of notional.
pub fn commission_low(quantity: Decimal, price: Decimal) -> Decimal {
    let notional = (quantity * price).abs();
    floor_to_multiple(notional * dec!(0.00024164), FEE_STEP) + sell_tax(quantity, notional)
}

/// High-tier schedule: percentage (plus a fixed fee in the middle brackets)
/// depending on the notional.
pub fn commission_high(quantity: Decimal, price: Decimal) -> Decimal {
    let notional = (quantity * price).abs();
    let cost = if notional < dec!(500000) {
        notional * dec!(0.00502704)
    } else if notional < dec!(3000000) {
        notional * dec!(0.00127296) + dec!(2000)
    } else if notional < dec!(30000000) {
        notional * dec!(0.00127296) + dec!(1500)
    } else if notional < dec!(100000000) {
        notional * dec!(0.00117296)
    } else if notional < dec!(300000000) {
        notional * dec!(0.00097296)
    } else {
        notional * dec!(0.00077296)
    };
    floor_to_multiple(cost, FEE_STEP) + sell_tax(quantity, notional)
}

/// Named commission schedule selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionPreset {
    #[default]
    High,
    Low,
    None,
}

impl CommissionPreset {
    /// The preset as a strategy commission function.
    pub fn to_fn(self) -> CommissionFn {
        match self {
            CommissionPreset::High => {
                Arc::new(|q, p| to_f64(commission_high(from_f64(q), from_f64(p))))
            }
            CommissionPreset::Low => {
                Arc::new(|q, p| to_f64(commission_low(from_f64(q), from_f64(p))))
            }
            CommissionPreset::None => no_commission(),
        }
    }
}
