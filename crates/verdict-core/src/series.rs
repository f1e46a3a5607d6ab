//! Historical price series as carried inside task envelopes

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily row from the market-data provider
///
/// `close` is nullable on the wire; providers return holes for halted or
/// unlisted days and consumers filter them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Trading day (ISO-8601 date on the wire)
    pub date: NaiveDate,
    /// Closing price, absent when the provider had no data for the day
    pub close: Option<f64>,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: impl Into<Option<f64>>) -> Self {
        Self {
            date,
            close: close.into(),
        }
    }
}

/// Ordered daily closes for one instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSeries {
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closing prices with null rows filtered out, in series order.
    pub fn valid_closes(&self) -> Vec<f64> {
        self.points.iter().filter_map(|p| p.close).collect()
    }

    /// First valid close, if any (the "bought day" price in the single flow).
    pub fn first_close(&self) -> Option<f64> {
        self.points.iter().find_map(|p| p.close)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_valid_closes_skips_nulls() {
        let series = PriceSeries::new(vec![
            PricePoint::new(day(1), 10.0),
            PricePoint::new(day(2), None),
            PricePoint::new(day(3), 12.5),
        ]);
        assert_eq!(series.valid_closes(), vec![10.0, 12.5]);
        assert_eq!(series.first_close(), Some(10.0));
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_serde_shape_is_a_bare_array() {
        let series = PriceSeries::new(vec![PricePoint::new(day(1), 10.0)]);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"date": "2024-01-01", "close": 10.0}])
        );
    }
}
