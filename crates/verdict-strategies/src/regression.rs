//! Linear regression worker
//!
//! Fits a single-variable linear model over min-max-normalized closes by
//! gradient descent and predicts the next day's price. In the single-ticker
//! flow this worker is also the mid-pipeline fan-out trigger: it re-broadcasts
//! the task, enriched with its prediction, to the three voting workers.

use crate::portfolio;
use crate::worker::{Handled, Outbound, StrategyWorker, reply_destination};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use verdict_core::{
    CompanyTask, Decision, Prediction, PriceSeries, Result, StrategyKind, StrategyResult, Subject,
    Task, TaskEnvelope, VerdictError, queues,
};

const LEARNING_RATE: f64 = 0.01;
const EPOCHS: usize = 500;
const MIN_POINTS: usize = 3;

/// Predict the next day's closing price from a series of daily closes.
///
/// Prices and a synthetic day index are min-max scaled to [0, 1], a line is
/// fitted by full-batch gradient descent on mean-squared error with a fixed
/// learning rate and epoch budget, and the prediction for day n+1 is scaled
/// back to price space.
pub fn predict_next_close(closes: &[f64]) -> Result<f64> {
    if closes.len() < MIN_POINTS {
        return Err(VerdictError::InsufficientData(format!(
            "need at least {MIN_POINTS} valid closing prices, got {}",
            closes.len()
        )));
    }

    let min = closes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 {
        // Flat series: the line is horizontal, no fitting needed.
        return Ok(min);
    }

    let n = closes.len();
    let max_day = n as f64;
    let xs: Vec<f64> = (1..=n).map(|d| d as f64 / max_day).collect();
    let ys: Vec<f64> = closes.iter().map(|p| (p - min) / range).collect();

    let mut weight = 0.0_f64;
    let mut bias = 0.0_f64;
    for _ in 0..EPOCHS {
        let mut grad_w = 0.0;
        let mut grad_b = 0.0;
        for (x, y) in xs.iter().zip(&ys) {
            let residual = weight * x + bias - y;
            grad_w += residual * x;
            grad_b += residual;
        }
        let scale = 2.0 / n as f64;
        weight -= LEARNING_RATE * scale * grad_w;
        bias -= LEARNING_RATE * scale * grad_b;
    }

    let next_x = (n + 1) as f64 / max_day;
    let predicted = (weight * next_x + bias) * range + min;
    if !predicted.is_finite() {
        return Err(VerdictError::Upstream(
            "regression produced a non-finite prediction".to_string(),
        ));
    }
    Ok(predicted)
}

fn predict_series(series: &PriceSeries) -> Result<(f64, Prediction)> {
    let closes = series.valid_closes();
    let predicted = predict_next_close(&closes)?;

    // A successful prediction implies at least MIN_POINTS valid rows, so the
    // first close and the boundary dates exist.
    let bought_day_price = series.first_close().ok_or_else(|| {
        VerdictError::InsufficientData("series has no valid closing price".to_string())
    })?;
    let (bought_day_date, predicted_day_date) = match (series.first_date(), series.last_date()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(VerdictError::InsufficientData(
                "series has no dates".to_string(),
            ));
        }
    };

    Ok((
        predicted,
        Prediction {
            predicted_price: predicted,
            bought_day_price,
            bought_day_date,
            predicted_day_date,
        },
    ))
}

fn chart_payload(prediction: &Prediction, quantity: u32, series: &PriceSeries) -> serde_json::Value {
    json!({
        "predictedPrice": format!("{:.2}", prediction.predicted_price),
        "boughtDayPrice": format!("{:.2}", prediction.bought_day_price),
        "boughtDayDate": prediction.bought_day_date,
        "predictedDayDate": prediction.predicted_day_date,
        "quantity": quantity,
        "priceSeries": series,
    })
}

/// The regression worker
pub struct RegressionWorker;

#[async_trait]
impl StrategyWorker for RegressionWorker {
    fn name(&self) -> &str {
        "regression"
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Regression
    }

    fn queue(&self) -> &'static str {
        queues::REGRESSION_TASKS
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<Handled> {
        match &envelope.task {
            Task::SingleAnalysis {
                symbol,
                quantity,
                price_series,
                ..
            } => {
                let (predicted, prediction) = predict_series(price_series)?;
                info!(%symbol, predicted = format!("{predicted:.2}"), "next-day prediction");

                let vote_task = Task::StrategyVote {
                    symbol: symbol.clone(),
                    quantity: *quantity,
                    price_series: price_series.clone(),
                    prediction: prediction.clone(),
                };
                let vote =
                    TaskEnvelope::with_correlation(envelope.correlation_id, vote_task);

                let decision = if prediction.predicted_price > prediction.bought_day_price {
                    Decision::Buy
                } else {
                    Decision::NoBuy
                };
                let own_result = StrategyResult::new(
                    envelope.correlation_id,
                    StrategyKind::Regression,
                    symbol.as_str(),
                    decision,
                    format!(
                        "predicted next close {:.2} against bought-day price {:.2}",
                        prediction.predicted_price, prediction.bought_day_price
                    ),
                )
                .with_confidence("Linear regression projection")
                .with_payload(chart_payload(&prediction, *quantity, price_series));

                Ok(Handled::Publish(vec![
                    Outbound::to_queue(queues::CROSSOVER_TASKS, &vote)?,
                    Outbound::to_queue(queues::MEAN_REVERSION_TASKS, &vote)?,
                    Outbound::to_queue(queues::SENTIMENT_TASKS, &vote)?,
                    Outbound::to_queue(reply_destination(envelope), &own_result)?,
                ]))
            }

            Task::PortfolioRegression { companies } => {
                let result = self.portfolio_result(envelope, companies);
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            _ => Ok(Handled::NotMine),
        }
    }
}

impl RegressionWorker {
    fn portfolio_result(
        &self,
        envelope: &TaskEnvelope,
        companies: &[CompanyTask],
    ) -> StrategyResult {
        let mut decisions = Vec::with_capacity(companies.len());
        let mut details = Vec::with_capacity(companies.len());

        for company in companies {
            match predict_series(&company.price_series) {
                Ok((_, prediction)) => {
                    let decision = if prediction.predicted_price > prediction.bought_day_price {
                        Decision::Buy
                    } else {
                        Decision::NoBuy
                    };
                    decisions.push(decision);
                    details.push(json!({
                        "symbol": company.symbol,
                        "decision": decision,
                        "predictedPrice": format!("{:.2}", prediction.predicted_price),
                        "boughtDayPrice": format!("{:.2}", prediction.bought_day_price),
                        "boughtDayDate": prediction.bought_day_date,
                        "predictedDayDate": prediction.predicted_day_date,
                        "quantity": company.quantity,
                    }));
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
            StrategyKind::Regression,
            Subject::Many(symbols),
            portfolio::fold_decisions(&decisions),
            format!("predicted next-day closes for {} companies", companies.len()),
        )
        .with_confidence("Linear regression projection")
        .with_payload(serde_json::Value::Array(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use verdict_core::PricePoint;

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
    fn test_too_few_points_is_insufficient_data() {
        let err = predict_next_close(&[10.0, 11.0]).unwrap_err();
        assert!(matches!(err, VerdictError::InsufficientData(_)));
    }

    #[test]
    fn test_flat_series_predicts_the_constant() {
        let predicted = predict_next_close(&[50.0, 50.0, 50.0, 50.0]).unwrap();
        assert!((predicted - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_increasing_series_predicts_above_the_mean() {
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        let predicted = predict_next_close(&closes).unwrap();
        // The epoch budget is fixed, so the fit is only partially converged;
        // assert a band rather than an exact continuation.
        assert!(predicted > 6.0, "predicted {predicted}");
        assert!(predicted < 12.0, "predicted {predicted}");
    }

    #[tokio::test]
    async fn test_single_analysis_fans_out_to_three_voters_and_aggregator() {
        let envelope = TaskEnvelope::new(Task::SingleAnalysis {
            symbol: "AAPL".to_string(),
            quantity: 10,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            price_series: series(&[10.0, 11.0, 12.0, 13.0, 14.0]),
        });

        let handled = RegressionWorker.handle(&envelope).await.unwrap();
        let Handled::Publish(outbound) = handled else {
            panic!("expected publishes");
        };

        let targets: Vec<&str> = outbound.iter().map(|o| o.queue.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                queues::CROSSOVER_TASKS,
                queues::MEAN_REVERSION_TASKS,
                queues::SENTIMENT_TASKS,
                queues::AGGREGATION_RESULTS,
            ]
        );

        // The fan-out tasks carry the same correlation id and a prediction.
        let vote: TaskEnvelope = serde_json::from_slice(&outbound[0].body).unwrap();
        assert_eq!(vote.correlation_id, envelope.correlation_id);
        assert!(matches!(vote.task, Task::StrategyVote { .. }));

        let own: StrategyResult = serde_json::from_slice(&outbound[3].body).unwrap();
        assert_eq!(own.strategy, StrategyKind::Regression);
        assert!(own.payload.is_some());
    }

    #[tokio::test]
    async fn test_strategy_vote_is_not_mine() {
        let envelope = TaskEnvelope::new(Task::StrategyVote {
            symbol: "AAPL".to_string(),
            quantity: 1,
            price_series: series(&[1.0, 2.0, 3.0]),
            prediction: Prediction {
                predicted_price: 4.0,
                bought_day_price: 1.0,
                bought_day_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                predicted_day_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            },
        });
        assert!(matches!(
            RegressionWorker.handle(&envelope).await.unwrap(),
            Handled::NotMine
        ));
    }

    #[tokio::test]
    async fn test_portfolio_regression_mixes_errors_and_predictions() {
        let envelope = TaskEnvelope::new(Task::PortfolioRegression {
            companies: vec![
                CompanyTask {
                    symbol: "AAPL".to_string(),
                    quantity: 5,
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                    price_series: series(&[10.0, 11.0, 12.0, 13.0, 14.0]),
                },
                CompanyTask {
                    symbol: "EMPTY".to_string(),
                    quantity: 5,
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                    price_series: PriceSeries::default(),
                },
            ],
        })
        .reply_to("verdict.reply.test");

        let Handled::Publish(outbound) = RegressionWorker.handle(&envelope).await.unwrap() else {
            panic!("expected publishes");
        };
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].queue, "verdict.reply.test");

        let result: StrategyResult = serde_json::from_slice(&outbound[0].body).unwrap();
        let details = result.payload.unwrap();
        assert_eq!(details.as_array().unwrap().len(), 2);
        assert_eq!(details[1]["decision"], "ERROR");
    }
}
