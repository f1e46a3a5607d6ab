//! Well-known queue names
//!
//! One durable request queue per worker target, one shared aggregation queue,
//! and a dead-letter queue for messages that exhaust their redelivery budget.
//! Exclusive reply queues are named ad hoc by the dispatcher (see the hub).

/// Single-ticker analysis entry point; consumed by the regression worker.
pub const REGRESSION_TASKS: &str = "verdict.tasks.regression";

/// Crossover worker requests (enriched single votes and portfolio tasks).
pub const CROSSOVER_TASKS: &str = "verdict.tasks.crossover";

/// Mean-reversion worker requests.
pub const MEAN_REVERSION_TASKS: &str = "verdict.tasks.mean-reversion";

/// Momentum/sentiment worker requests.
pub const SENTIMENT_TASKS: &str = "verdict.tasks.sentiment";

/// Shared aggregation queue all workers answer on (unless `replyTo` is set).
pub const AGGREGATION_RESULTS: &str = "verdict.results.aggregation";

/// Terminal parking for messages redelivered past the requeue bound.
pub const DEAD_LETTER: &str = "verdict.dead-letter";

/// Prefix for ad-hoc exclusive reply queues.
pub const REPLY_PREFIX: &str = "verdict.reply.";
