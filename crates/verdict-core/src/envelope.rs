//! Task and result envelopes: the JSON wire format on every queue
//!
//! Tasks are immutable once published. A whole dispatch batch shares one
//! correlation id, which is the only join key the aggregator has.

use crate::series::PriceSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outer wrapper for every task message
///
/// `reply_to` is only set in the exclusive reply-queue topology; when absent
/// the worker answers on the shared aggregation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(flatten)]
    pub task: Task,
}

impl TaskEnvelope {
    /// Wrap a task under a fresh correlation id.
    pub fn new(task: Task) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            reply_to: None,
            task,
        }
    }

    /// Wrap a task under an existing correlation id (batch dispatch).
    pub fn with_correlation(correlation_id: Uuid, task: Task) -> Self {
        Self {
            correlation_id,
            reply_to: None,
            task,
        }
    }

    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }
}

/// Closed set of task kinds, discriminated by the `kind` field on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Task {
    /// Entry point of the single-ticker flow; addressed to the regression
    /// worker, which re-broadcasts an enriched [`Task::StrategyVote`] to the
    /// three voting workers.
    #[serde(rename_all = "camelCase")]
    SingleAnalysis {
        symbol: String,
        quantity: u32,
        start_date: NaiveDate,
        end_date: NaiveDate,
        price_series: PriceSeries,
    },

    /// Mid-pipeline task produced by the regression worker, carrying its
    /// prediction so the voters can reason about it.
    #[serde(rename_all = "camelCase")]
    StrategyVote {
        symbol: String,
        quantity: u32,
        price_series: PriceSeries,
        prediction: Prediction,
    },

    /// Portfolio-wide one-shot regression (answered on the reply queue).
    PortfolioRegression { companies: Vec<CompanyTask> },

    /// Portfolio-wide crossover vote.
    PortfolioCrossover { companies: Vec<CompanyTask> },

    /// Portfolio-wide mean-reversion vote.
    PortfolioMeanReversion { companies: Vec<CompanyTask> },

    /// Portfolio-wide sentiment vote.
    PortfolioSentiment { companies: Vec<CompanyTask> },
}

/// Per-company slice of a portfolio task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyTask {
    pub symbol: String,
    pub quantity: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price_series: PriceSeries,
}

/// Next-day prediction summary attached by the regression worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_price: f64,
    pub bought_day_price: f64,
    pub bought_day_date: NaiveDate,
    pub predicted_day_date: NaiveDate,
}

/// Which strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    Regression,
    MomentumSentiment,
    MeanReversion,
    Crossover,
}

impl StrategyKind {
    /// Informational strategies are excluded from the overall vote.
    pub fn votes(self) -> bool {
        !matches!(self, Self::Regression)
    }
}

/// Per-strategy verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Buy,
    NoBuy,
    Error,
}

/// What the task was about: one ticker or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subject {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Subject {
    fn from(symbol: &str) -> Self {
        Self::One(symbol.to_string())
    }
}

impl From<Vec<String>> for Subject {
    fn from(symbols: Vec<String>) -> Self {
        Self::Many(symbols)
    }
}

/// One strategy's answer for one correlation id
///
/// Produced exactly once per (task, worker) pair under normal operation, but
/// at-least-once delivery means consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResult {
    pub correlation_id: Uuid,
    pub strategy: StrategyKind,
    pub subject: Subject,
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    /// Strategy-specific extras: chart data for regression, per-instrument
    /// decisions for portfolio variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl StrategyResult {
    pub fn new(
        correlation_id: Uuid,
        strategy: StrategyKind,
        subject: impl Into<Subject>,
        decision: Decision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            strategy,
            subject: subject.into(),
            decision,
            reason: reason.into(),
            confidence: None,
            payload: None,
        }
    }

    /// A worker-local failure converted into a countable result message.
    pub fn failure(
        correlation_id: Uuid,
        strategy: StrategyKind,
        subject: impl Into<Subject>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(correlation_id, strategy, subject, Decision::Error, reason)
    }

    pub fn with_confidence(mut self, confidence: impl Into<String>) -> Self {
        self.confidence = Some(confidence.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Final combined verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallDecision {
    BuyOverall,
    NoBuyOverall,
}

/// The fully-aggregated answer returned to the client and memoized in cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub overall_decision: OverallDecision,
    pub per_strategy: Vec<StrategyResult>,
}
