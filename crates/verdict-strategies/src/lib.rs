//! Strategy workers for the verdict scatter/gather pipeline
//!
//! Each worker is an independent queue consumer: it parses a task envelope,
//! silently drops tasks not addressed to it, computes a BUY/NO_BUY verdict
//! with its own algorithm, and publishes a tagged result to the reply
//! destination (the shared aggregation queue, or the task's exclusive reply
//! queue when set).
//!
//! The four algorithms:
//!
//! - [`regression`]: linear next-day price prediction (informational, also
//!   the mid-pipeline fan-out trigger for the single-ticker flow)
//! - [`crossover`]: short/long simple-moving-average bullish crossover
//! - [`mean_reversion`]: deviation of the latest price below the mean
//! - [`sentiment`]: LLM-delegated momentum/sentiment vote
//!
//! Worker-local failures are converted into `decision: ERROR` results so the
//! aggregator's count-based resolution never stalls on a broken strategy.

pub mod crossover;
pub mod mean_reversion;
pub mod portfolio;
pub mod regression;
pub mod sentiment;
pub mod worker;

pub use crossover::CrossoverWorker;
pub use mean_reversion::MeanReversionWorker;
pub use regression::RegressionWorker;
pub use sentiment::{GeminiClient, GeminiConfig, SentimentModel, SentimentWorker};
pub use worker::{Handled, Outbound, StrategyWorker, run_worker};
