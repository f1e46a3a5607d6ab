//! Moving-average crossover worker
//!
//! Votes BUY only on a fresh bullish crossover: the short average was below
//! the long average on the previous sample and is above it on the latest
//! one. A short average that has merely been riding above the long one for a
//! while is old news, not a signal.

use crate::portfolio;
use crate::worker::{Handled, Outbound, StrategyWorker, reply_destination};
use async_trait::async_trait;
use ta::Next;
use ta::indicators::SimpleMovingAverage;
use verdict_core::{
    CompanyTask, Decision, PriceSeries, Result, StrategyKind, StrategyResult, Subject, Task,
    TaskEnvelope, VerdictError, queues,
};

const SHORT_WINDOW: usize = 3;
const LONG_WINDOW: usize = 5;

fn sma_series(closes: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut sma = SimpleMovingAverage::new(window)
        .map_err(|err| VerdictError::Upstream(format!("bad SMA window {window}: {err}")))?;
    Ok(closes.iter().map(|&close| sma.next(close)).collect())
}

/// Evaluate the crossover signal over a series of valid closes.
pub fn evaluate(closes: &[f64]) -> Result<(Decision, String)> {
    if closes.is_empty() {
        return Err(VerdictError::InsufficientData(
            "no valid closing prices in the series".to_string(),
        ));
    }
    if closes.len() <= LONG_WINDOW {
        return Ok((
            Decision::NoBuy,
            format!(
                "not enough history for a {SHORT_WINDOW}/{LONG_WINDOW} crossover ({} closes)",
                closes.len()
            ),
        ));
    }

    let short = sma_series(closes, SHORT_WINDOW)?;
    let long = sma_series(closes, LONG_WINDOW)?;
    let last = closes.len() - 1;

    let crossed = short[last - 1] < long[last - 1] && short[last] > long[last];
    let reason = if crossed {
        format!(
            "bullish crossover: short average {:.2} moved above long average {:.2}",
            short[last], long[last]
        )
    } else {
        format!(
            "no fresh crossover: short average {:.2} vs long average {:.2}",
            short[last], long[last]
        )
    };
    let decision = if crossed { Decision::Buy } else { Decision::NoBuy };
    Ok((decision, reason))
}

/// The crossover worker
pub struct CrossoverWorker;

#[async_trait]
impl StrategyWorker for CrossoverWorker {
    fn name(&self) -> &str {
        "crossover"
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Crossover
    }

    fn queue(&self) -> &'static str {
        queues::CROSSOVER_TASKS
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
                    StrategyKind::Crossover,
                    symbol.as_str(),
                    decision,
                    reason,
                )
                .with_confidence("Price-based crossover");
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            Task::PortfolioCrossover { companies } => {
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
        StrategyKind::Crossover,
        Subject::Many(symbols),
        portfolio::fold_decisions(&decisions),
        format!(
            "crossover evaluated across {} companies",
            companies.len()
        ),
    )
    .with_confidence("Price-based crossover")
    .with_payload(serde_json::Value::Array(details))
}
