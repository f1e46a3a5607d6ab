//! Shared worker run-loop
//!
//! One consume loop per worker, no per-request closures: every delivery is
//! parsed, dispatched through the worker's `handle`, and settled exactly
//! once. Failures with a known correlation id become `ERROR` results on the
//! reply destination so the aggregator's expected count still holds.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use verdict_broker::{Broker, BrokerError};
use verdict_core::{
    Result, StrategyKind, StrategyResult, Subject, Task, TaskEnvelope, VerdictError, queues,
};

/// A message a worker wants published after handling a task
#[derive(Debug, Clone)]
pub struct Outbound {
    pub queue: String,
    pub body: Vec<u8>,
}

impl Outbound {
    /// Serialize a payload for a queue.
    pub fn to_queue(queue: impl Into<String>, payload: &impl serde::Serialize) -> Result<Self> {
        Ok(Self {
            queue: queue.into(),
            body: serde_json::to_vec(payload)?,
        })
    }
}

/// Outcome of handling one task envelope
#[derive(Debug)]
pub enum Handled {
    /// Messages to publish (may be empty)
    Publish(Vec<Outbound>),
    /// The task was not addressed to this worker; ack and drop silently
    NotMine,
}

/// One strategy worker's computation, plugged into [`run_worker`]
#[async_trait]
pub trait StrategyWorker: Send + Sync {
    fn name(&self) -> &str;

    /// Which strategy tag this worker stamps on its results.
    fn strategy(&self) -> StrategyKind;

    /// The request queue this worker consumes.
    fn queue(&self) -> &'static str;

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<Handled>;
}

/// The reply destination for a task: its exclusive reply queue when set,
/// otherwise the shared aggregation queue.
pub fn reply_destination(envelope: &TaskEnvelope) -> String {
    envelope
        .reply_to
        .clone()
        .unwrap_or_else(|| queues::AGGREGATION_RESULTS.to_string())
}

/// What the task is about, for stamping results and error reports.
pub fn subject_of(task: &Task) -> Subject {
    match task {
        Task::SingleAnalysis { symbol, .. } | Task::StrategyVote { symbol, .. } => {
            Subject::One(symbol.clone())
        }
        Task::PortfolioRegression { companies }
        | Task::PortfolioCrossover { companies }
        | Task::PortfolioMeanReversion { companies }
        | Task::PortfolioSentiment { companies } => {
            Subject::Many(companies.iter().map(|c| c.symbol.clone()).collect())
        }
    }
}

fn transport(err: BrokerError) -> VerdictError {
    VerdictError::Transport(err.to_string())
}

/// Consume a worker's request queue until the broker ends the stream.
///
/// Transport errors are fatal and bubble up; the owning process should exit
/// rather than keep running with a broken subscription.
pub async fn run_worker(
    broker: Arc<dyn Broker>,
    worker: Arc<dyn StrategyWorker>,
) -> Result<()> {
    broker.declare_queue(worker.queue()).await.map_err(transport)?;
    broker
        .declare_queue(queues::AGGREGATION_RESULTS)
        .await
        .map_err(transport)?;

    let mut consumer = broker.consume(worker.queue()).await.map_err(transport)?;
    info!(worker = worker.name(), queue = worker.queue(), "waiting for tasks");

    while let Some(delivery) = consumer.next().await.map_err(transport)? {
        let envelope: TaskEnvelope = match serde_json::from_slice(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(worker = worker.name(), %err, "discarding malformed task");
                broker.ack(&delivery).await.map_err(transport)?;
                continue;
            }
        };

        match worker.handle(&envelope).await {
            Ok(Handled::Publish(outbound)) => {
                for message in outbound {
                    // Declaration is idempotent; the target consumer may not
                    // have started yet.
                    broker.declare_queue(&message.queue).await.map_err(transport)?;
                    if let Err(err) = broker.publish(&message.queue, message.body).await {
                        // Cannot publish at all: nothing left to answer with.
                        error!(
                            worker = worker.name(),
                            queue = %message.queue,
                            correlation_id = %envelope.correlation_id,
                            %err,
                            "failed to publish result"
                        );
                    }
                }
            }
            Ok(Handled::NotMine) => {
                debug!(
                    worker = worker.name(),
                    correlation_id = %envelope.correlation_id,
                    "task not addressed to this worker"
                );
            }
            Err(err) => {
                let result = StrategyResult::failure(
                    envelope.correlation_id,
                    worker.strategy(),
                    subject_of(&envelope.task),
                    err.to_string(),
                );
                publish_error(&*broker, &envelope, &result, worker.name()).await;
            }
        }

        broker.ack(&delivery).await.map_err(transport)?;
    }

    info!(worker = worker.name(), "queue deleted, worker stopping");
    Ok(())
}

async fn publish_error(
    broker: &dyn Broker,
    envelope: &TaskEnvelope,
    result: &StrategyResult,
    worker: &str,
) {
    let destination = reply_destination(envelope);
    match serde_json::to_vec(result) {
        Ok(body) => {
            if let Err(err) = broker.declare_queue(&destination).await {
                error!(worker, %err, "failed to declare reply destination");
                return;
            }
            if let Err(err) = broker.publish(&destination, body).await {
                error!(worker, %err, "failed to publish ERROR result");
            }
        }
        Err(err) => error!(worker, %err, "failed to encode ERROR result"),
    }
}
