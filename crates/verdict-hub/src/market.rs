//! Market-data collaborator: daily closing prices for one instrument

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use time::OffsetDateTime;
use verdict_core::{PricePoint, PriceSeries, Result, VerdictError};
use yahoo_finance_api as yahoo;

/// Source of historical daily closes
///
/// Injected into the dispatcher so tests can run without network access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Daily closing prices for `symbol` between `start` and `end` inclusive,
    /// in trading-day order. Days the provider has no close for appear as
    /// null rows; consumers filter them.
    async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries>;
}

/// Yahoo Finance implementation
pub struct YahooMarketData;

impl YahooMarketData {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YahooMarketData {
    fn default() -> Self {
        Self::new()
    }
}

fn upstream(err: impl std::fmt::Display) -> VerdictError {
    VerdictError::Upstream(format!("Yahoo Finance: {err}"))
}

fn to_offset(date: NaiveDate) -> Result<OffsetDateTime> {
    let timestamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|err| upstream(format!("invalid date {date}: {err}")))
}

#[async_trait]
impl MarketData for YahooMarketData {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let provider = yahoo::YahooConnector::new().map_err(upstream)?;

        let response = provider
            .get_quote_history(symbol, to_offset(start)?, to_offset(end)?)
            .await
            .map_err(upstream)?;
        let quotes = response.quotes().map_err(upstream)?;

        Ok(PriceSeries::new(
            quotes
                .iter()
                .map(|q| {
                    let date = DateTime::from_timestamp(q.timestamp as i64, 0)
                        .unwrap_or_else(Utc::now)
                        .date_naive();
                    PricePoint::new(date, q.close)
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_conversion() {
        let odt = to_offset(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap();
        assert_eq!(odt.unix_timestamp(), 1_704_067_200);
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_daily_closes_live() {
        let market = YahooMarketData::new();
        let series = market
            .daily_closes(
                "AAPL",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            )
            .await
            .unwrap();
        assert!(!series.is_empty());
        assert!(series.first_close().unwrap() > 0.0);
    }
}
