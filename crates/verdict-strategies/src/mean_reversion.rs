//! Mean-reversion worker
//!
//! Votes BUY when the latest close sits at least a fixed percentage below the
//! series mean, on the assumption the price reverts toward it.

use crate::portfolio;
use crate::worker::{Handled, Outbound, StrategyWorker, reply_destination};
use async_trait::async_trait;
use verdict_core::{
    CompanyTask, Decision, Result, StrategyKind, StrategyResult, Subject, Task, TaskEnvelope,
    VerdictError, queues,
};

const THRESHOLD_PERCENT: f64 = 2.0;

/// Evaluate the mean-reversion signal over a series of valid closes.
pub fn evaluate(closes: &[f64]) -> Result<(Decision, String)> {
    let Some(&current) = closes.last() else {
        return Err(VerdictError::InsufficientData(
            "no valid closing prices in the series".to_string(),
        ));
    };

    let mean = closes.iter().sum::<f64>() / closes.len() as f64;
    if mean == 0.0 {
        return Err(VerdictError::InsufficientData(
            "series mean is zero".to_string(),
        ));
    }
    let deviation = (mean - current) / mean * 100.0;

    if deviation >= THRESHOLD_PERCENT {
        Ok((
            Decision::Buy,
            format!(
                "latest close {current:.2} is {deviation:.2}% below the mean {mean:.2}"
            ),
        ))
    } else {
        Ok((
            Decision::NoBuy,
            format!(
                "latest close {current:.2} is within {THRESHOLD_PERCENT}% of the mean {mean:.2}"
            ),
        ))
    }
}

/// The mean-reversion worker
pub struct MeanReversionWorker;

#[async_trait]
impl StrategyWorker for MeanReversionWorker {
    fn name(&self) -> &str {
        "mean-reversion"
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn queue(&self) -> &'static str {
        queues::MEAN_REVERSION_TASKS
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<Handled> {
        match &envelope.task {
            Task::StrategyVote {
                symbol,
                price_series,
                ..
            } => {
                let (decision, reason) = evaluate(&price_series.valid_closes())?;
                let result = StrategyResult::new(
                    envelope.correlation_id,
                    StrategyKind::MeanReversion,
                    symbol.as_str(),
                    decision,
                    reason,
                )
                .with_confidence("Price deviation from mean");
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            Task::PortfolioMeanReversion { companies } => {
                let result = portfolio_result(envelope, companies);
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            _ => Ok(Handled::NotMine),
        }
    }
}

fn portfolio_result(envelope: &TaskEnvelope, companies: &[CompanyTask]) -> StrategyResult {
    let mut decisions = Vec::with_capacity(companies.len());
    let mut details = Vec::with_capacity(companies.len());

    for company in companies {
        match evaluate(&company.price_series.valid_closes()) {
            Ok((decision, reason)) => {
                decisions.push(decision);
                details.push(portfolio::detail(&company.symbol, decision, &reason));
            }
            Err(err) => {
                decisions.push(Decision::Error);
                details.push(portfolio::detail(
                    &company.symbol,
                    Decision::Error,
                    &err.to_string(),
                ));
            }
        }
    }

    let symbols: Vec<String> = companies.iter().map(|c| c.symbol.clone()).collect();
    StrategyResult::new(
        envelope.correlation_id,
        StrategyKind::MeanReversion,
        Subject::Many(symbols),
        portfolio::fold_decisions(&decisions),
        format!(
            "mean reversion evaluated across {} companies",
            companies.len()
        ),
    )
    .with_confidence("Price deviation from mean")
    .with_payload(serde_json::Value::Array(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use verdict_core::{PricePoint, PriceSeries, Prediction};

    fn series(closes: &[f64]) -> PriceSeries {
        PriceSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    PricePoint::new(
                        NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                        c,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_deep_dip_below_mean_is_buy() {
        // Mean 96, latest 80: 16.67% below, well past the threshold.
        let (decision, reason) = evaluate(&[100.0, 100.0, 100.0, 100.0, 80.0]).unwrap();
        assert_eq!(decision, Decision::Buy);
        assert!(reason.contains("below the mean"));
    }

    #[test]
    fn test_price_near_mean_is_no_buy() {
        let (decision, _) = evaluate(&[100.0, 101.0, 99.0, 100.0]).unwrap();
        assert_eq!(decision, Decision::NoBuy);
    }

    #[test]
    fn test_price_above_mean_is_no_buy() {
        let (decision, _) = evaluate(&[100.0, 100.0, 120.0]).unwrap();
        assert_eq!(decision, Decision::NoBuy);
    }

    #[test]
    fn test_empty_series_is_an_error() {
        assert!(matches!(
            evaluate(&[]).unwrap_err(),
            VerdictError::InsufficientData(_)
        ));
    }

    #[tokio::test]
    async fn test_strategy_vote_publishes_a_tagged_result() {
        let envelope = TaskEnvelope::new(Task::StrategyVote {
            symbol: "TSLA".to_string(),
            quantity: 3,
            price_series: series(&[100.0, 100.0, 100.0, 100.0, 80.0]),
            prediction: Prediction {
                predicted_price: 95.0,
                bought_day_price: 100.0,
                bought_day_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                predicted_day_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            },
        })
        .reply_to("verdict.reply.xyz");

        let Handled::Publish(outbound) =
            MeanReversionWorker.handle(&envelope).await.unwrap()
        else {
            panic!("expected publishes");
        };
        assert_eq!(outbound[0].queue, "verdict.reply.xyz");

        let result: StrategyResult = serde_json::from_slice(&outbound[0].body).unwrap();
        assert_eq!(result.strategy, StrategyKind::MeanReversion);
        assert_eq!(result.decision, Decision::Buy);
        assert_eq!(result.confidence.as_deref(), Some("Price deviation from mean"));
    }

    #[tokio::test]
    async fn test_foreign_portfolio_task_is_not_mine() {
        let envelope = TaskEnvelope::new(Task::PortfolioCrossover { companies: vec![] });
        assert!(matches!(
            MeanReversionWorker.handle(&envelope).await.unwrap(),
            Handled::NotMine
        ));
    }
}
