//! Correlation engine for the shared aggregation queue
//!
//! One consume loop serves every pending request: inbound results are looked
//! up in an explicit registry keyed by correlation id instead of per-request
//! callbacks, so cancellation is a registry removal and nothing can leak a
//! subscription.
//!
//! A result whose correlation id is not in the registry belongs to another
//! aggregator instance, or to a request that already resolved or timed out.
//! Such messages are requeued, never dropped, up to a redelivery bound;
//! past the bound they go to the dead-letter queue so a permanently
//! undeliverable message cannot loop forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;
use verdict_broker::{Broker, BrokerError};
use verdict_core::{Result, StrategyResult, VerdictError, queues};

/// Everything held for one in-flight correlation id
struct AggregationState {
    expected: usize,
    received: Vec<StrategyResult>,
    resolver: oneshot::Sender<Vec<StrategyResult>>,
}

enum Action {
    Ack,
    Resolve(AggregationState),
    Requeue,
    DeadLetter,
}

/// Registry plus consume loop over the shared aggregation queue
pub struct Aggregator {
    broker: Arc<dyn Broker>,
    pending: Mutex<HashMap<Uuid, AggregationState>>,
    max_redeliveries: u32,
}

impl Aggregator {
    pub fn new(broker: Arc<dyn Broker>, max_redeliveries: u32) -> Self {
        Self {
            broker,
            pending: Mutex::new(HashMap::new()),
            max_redeliveries,
        }
    }

    /// Register a pending correlation before its tasks are published.
    ///
    /// Registration must happen before the first publish so an early result
    /// cannot arrive ahead of its registry entry. The returned receiver
    /// fires once, with exactly `expected` results.
    pub async fn register(
        &self,
        correlation_id: Uuid,
        expected: usize,
    ) -> oneshot::Receiver<Vec<StrategyResult>> {
        let (tx, rx) = oneshot::channel();
        let state = AggregationState {
            expected,
            received: Vec::with_capacity(expected),
            resolver: tx,
        };
        let mut pending = self.pending.lock().await;
        if pending.insert(correlation_id, state).is_some() {
            // Correlation ids are v4 UUIDs; a collision here means the
            // caller reused one, which the protocol forbids.
            warn!(%correlation_id, "replaced an existing pending correlation");
        }
        rx
    }

    /// Tear down a pending correlation without resolving it.
    ///
    /// Removing the entry is the single cancellation point; a second call
    /// for the same id is a no-op, so double-cancellation is harmless.
    pub async fn abandon(&self, correlation_id: Uuid) {
        let mut pending = self.pending.lock().await;
        if pending.remove(&correlation_id).is_some() {
            debug!(%correlation_id, "abandoned pending correlation");
        }
    }

    /// Await a registered correlation's full result set or the deadline.
    ///
    /// On timeout the pending entry is torn down and no result set exists;
    /// stragglers for this id fall into the unknown-correlation branch of
    /// the consume loop from then on.
    pub async fn gather(
        &self,
        correlation_id: Uuid,
        rx: oneshot::Receiver<Vec<StrategyResult>>,
        deadline: Duration,
    ) -> Result<Vec<StrategyResult>> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(_)) => {
                self.abandon(correlation_id).await;
                Err(VerdictError::Transport(
                    "aggregator stopped before resolution".to_string(),
                ))
            }
            Err(_) => {
                self.abandon(correlation_id).await;
                Err(VerdictError::Timeout { correlation_id })
            }
        }
    }

    /// Consume the shared aggregation queue until the broker ends the stream.
    pub async fn run(&self) -> Result<()> {
        self.broker
            .declare_queue(queues::AGGREGATION_RESULTS)
            .await
            .map_err(transport)?;
        self.broker
            .declare_queue(queues::DEAD_LETTER)
            .await
            .map_err(transport)?;

        let mut consumer = self
            .broker
            .consume(queues::AGGREGATION_RESULTS)
            .await
            .map_err(transport)?;
        info!(queue = queues::AGGREGATION_RESULTS, "aggregator consuming");

        while let Some(delivery) = consumer.next().await.map_err(transport)? {
            let result: StrategyResult = match serde_json::from_slice(&delivery.body) {
                Ok(result) => result,
                Err(err) => {
                    warn!(%err, "malformed result routed to dead-letter");
                    self.broker
                        .publish(queues::DEAD_LETTER, delivery.body.clone())
                        .await
                        .map_err(transport)?;
                    self.broker.ack(&delivery).await.map_err(transport)?;
                    continue;
                }
            };

            let action = self.accept(&result, delivery.redeliveries).await;
            match action {
                Action::Ack => {
                    self.broker.ack(&delivery).await.map_err(transport)?;
                }
                Action::Resolve(state) => {
                    self.broker.ack(&delivery).await.map_err(transport)?;
                    debug!(
                        correlation_id = %result.correlation_id,
                        count = state.received.len(),
                        "correlation resolved"
                    );
                    // The waiter may have timed out already; a failed send
                    // only means nobody is listening anymore.
                    let _ = state.resolver.send(state.received);
                }
                Action::Requeue => {
                    debug!(
                        correlation_id = %result.correlation_id,
                        redeliveries = delivery.redeliveries,
                        "unknown correlation, requeueing"
                    );
                    self.broker.nack_requeue(&delivery).await.map_err(transport)?;
                }
                Action::DeadLetter => {
                    warn!(
                        correlation_id = %result.correlation_id,
                        redeliveries = delivery.redeliveries,
                        "redelivery bound exceeded, routing to dead-letter"
                    );
                    self.broker
                        .publish(queues::DEAD_LETTER, delivery.body.clone())
                        .await
                        .map_err(transport)?;
                    self.broker.ack(&delivery).await.map_err(transport)?;
                }
            }
        }

        info!("aggregation queue deleted, aggregator stopping");
        Ok(())
    }

    /// Decide what to do with one inbound result. Registry mutation and the
    /// resolved check happen under one lock acquisition, so the expected
    /// count is reached exactly once.
    async fn accept(&self, result: &StrategyResult, redeliveries: u32) -> Action {
        let mut pending = self.pending.lock().await;
        let Some(state) = pending.get_mut(&result.correlation_id) else {
            return if redeliveries >= self.max_redeliveries {
                Action::DeadLetter
            } else {
                Action::Requeue
            };
        };

        // At-least-once delivery: the same result can arrive twice. Each
        // strategy answers once per correlation, so the strategy tag is the
        // dedup key.
        if state.received.iter().any(|r| r.strategy == result.strategy) {
            debug!(
                correlation_id = %result.correlation_id,
                strategy = ?result.strategy,
                "duplicate result ignored"
            );
            return Action::Ack;
        }

        state.received.push(result.clone());
        if state.received.len() >= state.expected {
            // get_mut then remove keeps the entry alive until this point
            // without an unreachable None branch.
            match pending.remove(&result.correlation_id) {
                Some(state) => Action::Resolve(state),
                None => Action::Ack,
            }
        } else {
            Action::Ack
        }
    }

    /// Number of correlations currently pending (test observability).
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn transport(err: BrokerError) -> VerdictError {
    VerdictError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_broker::MemoryBroker;
    use verdict_core::{Decision, StrategyKind};

    fn result(correlation_id: Uuid, strategy: StrategyKind) -> StrategyResult {
        StrategyResult::new(correlation_id, strategy, "AAPL", Decision::Buy, "test")
    }

    async fn publish_result(broker: &MemoryBroker, result: &StrategyResult) {
        broker
            .publish(
                queues::AGGREGATION_RESULTS,
                serde_json::to_vec(result).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn start(max_redeliveries: u32) -> (MemoryBroker, Arc<Aggregator>) {
        let broker = MemoryBroker::new();
        broker.declare_queue(queues::AGGREGATION_RESULTS).await.unwrap();
        broker.declare_queue(queues::DEAD_LETTER).await.unwrap();
        let aggregator = Arc::new(Aggregator::new(
            Arc::new(broker.clone()),
            max_redeliveries,
        ));
        let runner = Arc::clone(&aggregator);
        tokio::spawn(async move { runner.run().await });
        (broker, aggregator)
    }

    #[tokio::test]
    async fn test_resolves_at_exactly_the_expected_count() {
        let (broker, aggregator) = start(16).await;
        let id = Uuid::new_v4();
        let rx = aggregator.register(id, 2).await;

        publish_result(&broker, &result(id, StrategyKind::Crossover)).await;
        publish_result(&broker, &result(id, StrategyKind::MeanReversion)).await;

        let results = aggregator
            .gather(id, rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(aggregator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_requeued_not_lost() {
        // Unbounded redeliveries: the foreign message may cycle many times
        // while this test makes progress.
        let (broker, aggregator) = start(u32::MAX).await;
        let known = Uuid::new_v4();
        let foreign = Uuid::new_v4();

        // The foreign result goes in first; requeue-to-back must let the
        // known one through behind it.
        publish_result(&broker, &result(foreign, StrategyKind::Crossover)).await;

        let rx = aggregator.register(known, 1).await;
        publish_result(&broker, &result(known, StrategyKind::Crossover)).await;

        let results = aggregator
            .gather(known, rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results[0].correlation_id, known);

        // The foreign message is still cycling; a late registration can
        // still claim it.
        let rx = aggregator.register(foreign, 1).await;
        let results = aggregator
            .gather(foreign, rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results[0].correlation_id, foreign);
    }

    #[tokio::test]
    async fn test_redelivery_bound_routes_to_dead_letter() {
        let (broker, _aggregator) = start(2).await;
        let orphan = result(Uuid::new_v4(), StrategyKind::Crossover);
        publish_result(&broker, &orphan).await;

        let mut dead = broker.consume(queues::DEAD_LETTER).await.unwrap();
        let delivery = dead.next().await.unwrap().unwrap();
        broker.ack(&delivery).await.unwrap();
        let body: StrategyResult = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(body.correlation_id, orphan.correlation_id);
    }

    #[tokio::test]
    async fn test_malformed_result_goes_to_dead_letter() {
        let (broker, _aggregator) = start(16).await;
        broker
            .publish(queues::AGGREGATION_RESULTS, b"{not json".to_vec())
            .await
            .unwrap();

        let mut dead = broker.consume(queues::DEAD_LETTER).await.unwrap();
        let delivery = dead.next().await.unwrap().unwrap();
        broker.ack(&delivery).await.unwrap();
        assert_eq!(delivery.body, b"{not json".to_vec());
    }

    #[tokio::test]
    async fn test_timeout_tears_down_the_pending_entry() {
        let (broker, aggregator) = start(16).await;
        let id = Uuid::new_v4();
        let rx = aggregator.register(id, 2).await;

        // Only one of two expected results ever arrives.
        publish_result(&broker, &result(id, StrategyKind::Crossover)).await;

        let err = aggregator
            .gather(id, rx, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, VerdictError::Timeout { correlation_id } if correlation_id == id));
        assert_eq!(aggregator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_strategy_result_is_not_double_counted() {
        let (broker, aggregator) = start(16).await;
        let id = Uuid::new_v4();
        let rx = aggregator.register(id, 2).await;

        // The same crossover result delivered twice must not resolve a
        // correlation expecting two distinct strategies.
        publish_result(&broker, &result(id, StrategyKind::Crossover)).await;
        publish_result(&broker, &result(id, StrategyKind::Crossover)).await;
        publish_result(&broker, &result(id, StrategyKind::MeanReversion)).await;

        let results = aggregator
            .gather(id, rx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_ne!(results[0].strategy, results[1].strategy);
    }

    #[tokio::test]
    async fn test_abandon_twice_is_harmless() {
        let (_broker, aggregator) = start(16).await;
        let id = Uuid::new_v4();
        let _rx = aggregator.register(id, 1).await;
        aggregator.abandon(id).await;
        aggregator.abandon(id).await;
        assert_eq!(aggregator.pending_count().await, 0);
    }
}
