//! Date-indexed containers used across the crate.
//!
//! `Series` is a single column of `f64` observations; `Frame` is a set of
//! columns sharing one index. Missing observations are `f64::NAN`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Row label type for every series and frame.
pub type Timestamp = DateTime<Utc>;

fn validate_index(index: &[Timestamp]) -> Result<()> {
    if let Some(pos) = index.windows(2).position(|w| w[0] >= w[1]) {
        return Err(Error::InvalidIndex(format!(
            "dates must be strictly increasing ({} followed by {})",
            index[pos],
            index[pos + 1]
        )));
    }
    Ok(())
}

/// A date-indexed column of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    index: Vec<Timestamp>,
    values: Vec<f64>,
}

impl Series {
    /// Create an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from an ascending index and matching values.
    pub fn from_parts(index: Vec<Timestamp>, values: Vec<f64>) -> Result<Self> {
        if index.len() != values.len() {
            return Err(Error::InvalidIndex(format!(
                "index has {} dates but {} values were given",
                index.len(),
                values.len()
            )));
        }
        validate_index(&index)?;
        Ok(Self { index, values })
    }

    /// Build a series from `(date, value)` pairs in ascending date order.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Timestamp, f64)>,
    {
        let (index, values) = pairs.into_iter().unzip();
        Self::from_parts(index, values)
    }

    /// Insert or overwrite the value at `date`, keeping the index sorted.
    pub fn set(&mut self, date: Timestamp, value: f64) {
        match self.index.last() {
            Some(last) if *last == date => {
                if let Some(v) = self.values.last_mut() {
                    *v = value;
                }
            }
            Some(last) if *last > date => match self.index.binary_search(&date) {
                Ok(i) => self.values[i] = value,
                Err(i) => {
                    self.index.insert(i, date);
                    self.values.insert(i, value);
                }
            },
            _ => {
                self.index.push(date);
                self.values.push(value);
            }
        }
    }

    /// Value at `date`, if the date is in the index.
    pub fn get(&self, date: &Timestamp) -> Option<f64> {
        self.index
            .binary_search(date)
            .ok()
            .map(|i| self.values[i])
    }

    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.index.iter().copied().zip(self.values.iter().copied())
    }

    pub fn first(&self) -> Option<(Timestamp, f64)> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<(Timestamp, f64)> {
        self.iter().last()
    }

    /// Copy of the series without missing observations.
    pub fn dropna(&self) -> Series {
        let (index, values) = self.iter().filter(|(_, v)| !v.is_nan()).unzip();
        Series { index, values }
    }
}

/// A set of named, date-aligned columns.
///
/// Column labels are kept in insertion order and are not required to be
/// unique; consumers that need uniqueness check `duplicate_columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    index: Vec<Timestamp>,
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl Frame {
    /// Build a frame from an index, column labels and column-major data.
    pub fn new(index: Vec<Timestamp>, columns: Vec<String>, data: Vec<Vec<f64>>) -> Result<Self> {
        if columns.len() != data.len() {
            return Err(Error::InvalidIndex(format!(
                "{} column labels for {} columns",
                columns.len(),
                data.len()
            )));
        }
        if let Some((name, col)) = columns
            .iter()
            .zip(&data)
            .find(|(_, col)| col.len() != index.len())
        {
            return Err(Error::InvalidIndex(format!(
                "column '{}' has {} rows, index has {}",
                name,
                col.len(),
                index.len()
            )));
        }
        validate_index(&index)?;
        Ok(Self {
            index,
            columns,
            data,
        })
    }

    /// Outer-join named series on the union of their dates.
    pub fn from_series<I, S>(series: I) -> Self
    where
        I: IntoIterator<Item = (S, Series)>,
        S: Into<String>,
    {
        let series: Vec<(String, Series)> = series
            .into_iter()
            .map(|(name, s)| (name.into(), s))
            .collect();

        let index: Vec<Timestamp> = series
            .iter()
            .flat_map(|(_, s)| s.index().iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = Vec::with_capacity(series.len());
        let mut data = Vec::with_capacity(series.len());
        for (name, s) in series {
            data.push(
                index
                    .iter()
                    .map(|d| s.get(d).unwrap_or(f64::NAN))
                    .collect(),
            );
            columns.push(name);
        }

        Self {
            index,
            columns,
            data,
        }
    }

    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    /// First column labelled `name`.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.data[i].as_slice())
    }

    pub fn column_at(&self, i: usize) -> Option<&[f64]> {
        self.data.get(i).map(Vec::as_slice)
    }

    /// First column labelled `name`, as an owned series.
    pub fn column_series(&self, name: &str) -> Option<Series> {
        self.column(name).map(|values| Series {
            index: self.index.clone(),
            values: values.to_vec(),
        })
    }

    /// Position of `date` in the index.
    pub fn position_of(&self, date: &Timestamp) -> Option<usize> {
        self.index.binary_search(date).ok()
    }

    /// Values of row `row` across all columns.
    pub fn row(&self, row: usize) -> Option<Vec<f64>> {
        if row >= self.index.len() {
            return None;
        }
        Some(self.data.iter().map(|col| col[row]).collect())
    }

    /// Every label that appears more than once, each listed once.
    pub fn duplicate_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups: Vec<String> = Vec::new();
        for name in &self.columns {
            if !seen.insert(name.as_str()) && !dups.contains(name) {
                dups.push(name.clone());
            }
        }
        dups
    }

    /// Keep only rows where every column has a value.
    pub fn drop_incomplete_rows(&self) -> Frame {
        let keep: Vec<usize> = (0..self.index.len())
            .filter(|&r| self.data.iter().all(|col| !col[r].is_nan()))
            .collect();
        self.take_rows(&keep)
    }

    /// Replace missing values with the last observed value in each column.
    pub fn forward_fill(&self) -> Frame {
        let data = self
            .data
            .iter()
            .map(|col| {
                let mut last = f64::NAN;
                col.iter()
                    .map(|&v| {
                        if !v.is_nan() {
                            last = v;
                        }
                        last
                    })
                    .collect()
            })
            .collect();
        Frame {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data,
        }
    }

    /// Union of rows and columns. A label present on both sides keeps its
    /// left position and takes the right side's observations, falling back
    /// to the left on dates the right does not cover.
    pub fn merge(&self, other: &Frame) -> Frame {
        let index: Vec<Timestamp> = self
            .index
            .iter()
            .chain(&other.index)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = self.columns.clone();
        let mut sources: Vec<(Option<usize>, Option<usize>)> =
            (0..self.columns.len()).map(|c| (Some(c), None)).collect();
        for (c, name) in other.columns.iter().enumerate() {
            match columns.iter().position(|n| n == name) {
                Some(pos) => sources[pos].1 = Some(c),
                None => {
                    columns.push(name.clone());
                    sources.push((None, Some(c)));
                }
            }
        }

        let value = |frame: &Frame, col: Option<usize>, date: &Timestamp| {
            col.zip(frame.position_of(date))
                .map_or(f64::NAN, |(c, r)| frame.data[c][r])
        };
        let data = sources
            .iter()
            .map(|&(left, right)| {
                index
                    .iter()
                    .map(|d| {
                        let v = value(other, right, d);
                        if v.is_nan() {
                            value(self, left, d)
                        } else {
                            v
                        }
                    })
                    .collect()
            })
            .collect();

        Frame {
            index,
            columns,
            data,
        }
    }

    /// Replace all column labels.
    pub fn with_columns(mut self, names: Vec<String>) -> Result<Frame> {
        if names.len() != self.columns.len() {
            return Err(Error::ColumnNamesMismatch {
                expected: self.columns.len(),
                actual: names.len(),
            });
        }
        self.columns = names;
        Ok(self)
    }

    /// Columns as owned `(label, series)` pairs.
    pub fn iter_columns(&self) -> impl Iterator<Item = (String, Series)> + '_ {
        self.columns.iter().zip(&self.data).map(|(name, col)| {
            (
                name.clone(),
                Series {
                    index: self.index.clone(),
                    values: col.clone(),
                },
            )
        })
    }

    fn take_rows(&self, rows: &[usize]) -> Frame {
        Frame {
            index: rows.iter().map(|&r| self.index[r]).collect(),
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|col| rows.iter().map(|&r| col[r]).collect())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_series_set_overwrites_same_date() {
        let mut s = Series::new();
        s.set(day(1), 1.0);
        s.set(day(2), 2.0);
        s.set(day(2), 3.0);
        s.set(day(1), 5.0);

        assert_eq!(s.len(), 2);
        assert_eq!(s.get(&day(1)), Some(5.0));
        assert_eq!(s.get(&day(2)), Some(3.0));
    }

    #[test]
    fn test_series_rejects_unsorted_index() {
        let err = Series::from_parts(vec![day(2), day(1)], vec![1.0, 2.0]);
        assert!(matches!(err, Err(Error::InvalidIndex(_))));
    }

    #[test]
    fn test_outer_join_fills_missing_with_nan() {
        let a = Series::from_pairs(vec![(day(1), 1.0), (day(2), 2.0)]).unwrap();
        let b = Series::from_pairs(vec![(day(2), 20.0), (day(3), 30.0)]).unwrap();

        let frame = Frame::from_series(vec![("a", a), ("b", b)]);

        assert_eq!(frame.index(), &[day(1), day(2), day(3)]);
        assert!(frame.column("a").unwrap()[2].is_nan());
        assert!(frame.column("b").unwrap()[0].is_nan());
        assert_eq!(frame.column("b").unwrap()[1], 20.0);

        let common = frame.drop_incomplete_rows();
        assert_eq!(common.index(), &[day(2)]);

        let filled = frame.forward_fill();
        assert_eq!(filled.column("a").unwrap()[2], 2.0);
        assert!(filled.column("b").unwrap()[0].is_nan());
    }

    #[test]
    fn test_duplicate_columns_listed_once() {
        let frame = Frame::new(
            vec![day(1)],
            vec!["a".into(), "b".into(), "a".into(), "a".into(), "b".into()],
            vec![vec![1.0]; 5],
        )
        .unwrap();

        assert_eq!(frame.duplicate_columns(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_merge_right_side_wins_on_shared_label() {
        let left = Frame::new(
            vec![day(1), day(2)],
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 2.0], vec![10.0, 20.0]],
        )
        .unwrap();
        let right = Frame::new(
            vec![day(2), day(3)],
            vec!["c".into(), "a".into()],
            vec![vec![300.0, 400.0], vec![5.0, 6.0]],
        )
        .unwrap();

        let merged = left.merge(&right);

        assert_eq!(merged.index(), &[day(1), day(2), day(3)]);
        assert_eq!(merged.columns(), &["a", "b", "c"]);
        assert!(merged.duplicate_columns().is_empty());
        assert_eq!(merged.column("a").unwrap(), &[1.0, 5.0, 6.0]);
        assert!(merged.column("b").unwrap()[2].is_nan());
        assert!(merged.column("c").unwrap()[0].is_nan());
    }

    #[test]
    fn test_with_columns_length_mismatch() {
        let frame = Frame::new(vec![day(1)], vec!["a".into()], vec![vec![1.0]]).unwrap();
        let err = frame.with_columns(vec!["x".into(), "y".into()]);
        assert!(matches!(
            err,
            Err(Error::ColumnNamesMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }
}
