//! Shared data model for the verdict scatter/gather pipeline
//!
//! This crate defines everything that crosses a queue boundary:
//!
//! - Task and result envelopes (JSON wire format, closed enums)
//! - Price series rows as fetched from the market-data provider
//! - The pure decision combiner that folds strategy votes into one verdict
//! - Deterministic cache fingerprints for request memoization
//! - The error taxonomy shared by the hub and the strategy workers
//!
//! Nothing in here touches the broker or performs IO; the hub and worker
//! crates own all transport concerns.

pub mod combiner;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod queues;
pub mod series;

// Re-export main types for convenience
pub use combiner::combine_votes;
pub use envelope::{
    AggregatedResult, CompanyTask, Decision, OverallDecision, Prediction, StrategyKind,
    StrategyResult, Subject, Task, TaskEnvelope,
};
pub use error::{Result, VerdictError};
pub use series::{PricePoint, PriceSeries};
