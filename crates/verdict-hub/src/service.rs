//! Client-facing facade tying dispatcher, aggregator, cache, and broker
//! together
//!
//! Register-then-publish ordering: the pending correlation is registered with
//! the aggregator before the first message leaves, so even an instantly
//! answering worker finds a registry entry waiting. Cache entries are written
//! only on successful resolution; a timed-out fingerprint stays uncached.

use crate::aggregator::Aggregator;
use crate::cache::ResultCache;
use crate::config::HubConfig;
use crate::dispatcher::{Dispatcher, PendingDispatch, PortfolioRequest, SingleRequest};
use crate::market::MarketData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use verdict_broker::{Broker, BrokerError, Consumer};
use verdict_core::{
    AggregatedResult, Result, StrategyResult, VerdictError, combine_votes, queues,
};

/// Portfolio multi-strategy answer: one result per strategy, no combined vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioReport {
    pub strategies: Vec<StrategyResult>,
}

/// The scatter/gather orchestration service
pub struct VerdictService {
    broker: Arc<dyn Broker>,
    aggregator: Arc<Aggregator>,
    dispatcher: Dispatcher,
    config: HubConfig,
    single_cache: ResultCache<AggregatedResult>,
    portfolio_cache: ResultCache<PortfolioReport>,
}

impl VerdictService {
    pub fn new(
        broker: Arc<dyn Broker>,
        aggregator: Arc<Aggregator>,
        market: Arc<dyn MarketData>,
        config: HubConfig,
    ) -> Self {
        let single_cache = ResultCache::new(config.cache_ttl);
        let portfolio_cache = ResultCache::new(config.cache_ttl);
        Self {
            broker,
            aggregator,
            dispatcher: Dispatcher::new(market),
            config,
            single_cache,
            portfolio_cache,
        }
    }

    /// Analyze one position: fan out to all four strategies, gather, combine.
    pub async fn analyze(&self, request: SingleRequest) -> Result<AggregatedResult> {
        request.validate()?;
        let fingerprint = request.fingerprint();
        if let Some(hit) = self.single_cache.get(&fingerprint).await {
            info!(%fingerprint, "serving aggregated result from cache");
            return Ok(hit);
        }

        let pending = self.dispatcher.prepare_single(&request).await?;
        let results = self.dispatch_and_gather(pending).await?;

        let aggregated = AggregatedResult {
            overall_decision: combine_votes(&results),
            per_strategy: results,
        };
        self.single_cache
            .insert(fingerprint, aggregated.clone())
            .await;
        Ok(aggregated)
    }

    /// Evaluate a whole portfolio against every strategy.
    pub async fn analyze_portfolio(&self, request: PortfolioRequest) -> Result<PortfolioReport> {
        request.validate()?;
        let fingerprint = request.fingerprint();
        if let Some(hit) = self.portfolio_cache.get(&fingerprint).await {
            info!(%fingerprint, "serving portfolio report from cache");
            return Ok(hit);
        }

        let pending = self.dispatcher.prepare_portfolio(&request).await?;
        let strategies = self.dispatch_and_gather(pending).await?;

        let report = PortfolioReport { strategies };
        self.portfolio_cache
            .insert(fingerprint, report.clone())
            .await;
        Ok(report)
    }

    /// Portfolio-wide regression only: one worker, one response, answered on
    /// an exclusive reply queue instead of the shared aggregation queue.
    pub async fn portfolio_regression(&self, request: PortfolioRequest) -> Result<StrategyResult> {
        request.validate()?;

        let reply_queue = self
            .broker
            .declare_reply_queue(queues::REPLY_PREFIX)
            .await
            .map_err(transport)?;

        let outcome = self.portfolio_regression_inner(&request, &reply_queue).await;

        // The reply queue is ours alone; tear it down on every exit path.
        if let Err(err) = self.broker.delete_queue(&reply_queue).await {
            debug!(queue = %reply_queue, %err, "reply queue cleanup failed");
        }
        outcome
    }

    async fn portfolio_regression_inner(
        &self,
        request: &PortfolioRequest,
        reply_queue: &str,
    ) -> Result<StrategyResult> {
        let pending = self
            .dispatcher
            .prepare_portfolio_regression(request, reply_queue)
            .await?;
        let correlation_id = pending.correlation_id;

        let mut consumer = self.broker.consume(reply_queue).await.map_err(transport)?;
        self.publish_batch(&pending).await?;

        tokio::time::timeout(
            self.config.aggregation_timeout,
            self.await_reply(&mut consumer, correlation_id),
        )
        .await
        .map_err(|_| VerdictError::Timeout { correlation_id })?
    }

    /// Drain the exclusive reply queue until the matching correlation id
    /// shows up. The queue has one producer and one expected message, but
    /// at-least-once delivery still allows strays; mismatches are requeued.
    async fn await_reply(
        &self,
        consumer: &mut Box<dyn Consumer>,
        correlation_id: uuid::Uuid,
    ) -> Result<StrategyResult> {
        loop {
            let Some(delivery) = consumer.next().await.map_err(transport)? else {
                return Err(VerdictError::Transport(
                    "reply queue closed before a response arrived".to_string(),
                ));
            };
            match serde_json::from_slice::<StrategyResult>(&delivery.body) {
                Ok(result) if result.correlation_id == correlation_id => {
                    self.broker.ack(&delivery).await.map_err(transport)?;
                    return Ok(result);
                }
                Ok(result) => {
                    debug!(
                        expected = %correlation_id,
                        got = %result.correlation_id,
                        "mismatched reply, requeueing"
                    );
                    self.broker.nack_requeue(&delivery).await.map_err(transport)?;
                }
                Err(err) => {
                    debug!(%err, "discarding malformed reply");
                    self.broker.ack(&delivery).await.map_err(transport)?;
                }
            }
        }
    }

    /// Register the pending correlation, publish the batch, and gather.
    async fn dispatch_and_gather(&self, pending: PendingDispatch) -> Result<Vec<StrategyResult>> {
        let correlation_id = pending.correlation_id;
        let expected = pending.expected;
        let rx = self.aggregator.register(correlation_id, expected).await;

        if let Err(err) = self.publish_batch(&pending).await {
            self.aggregator.abandon(correlation_id).await;
            return Err(err);
        }
        debug!(%correlation_id, expected, "batch dispatched");

        self.aggregator
            .gather(correlation_id, rx, self.config.aggregation_timeout)
            .await
    }

    async fn publish_batch(&self, pending: &PendingDispatch) -> Result<()> {
        for message in &pending.messages {
            // Workers may not have declared their queues yet at startup;
            // declaration is idempotent.
            self.broker
                .declare_queue(&message.queue)
                .await
                .map_err(transport)?;
            self.broker
                .publish(&message.queue, message.body.clone())
                .await
                .map_err(transport)?;
        }
        Ok(())
    }
}

fn transport(err: BrokerError) -> VerdictError {
    VerdictError::Transport(err.to_string())
}
