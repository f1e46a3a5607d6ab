//! Task dispatch: validate, fetch prices, build the envelope batch
//!
//! The dispatcher never publishes. It returns a fully-built batch so the
//! caller can register the pending correlation with the aggregator first and
//! only then publish, closing the gap where a result could arrive before its
//! registry entry. A price-fetch failure therefore aborts with zero messages
//! built, let alone sent.

use crate::market::MarketData;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::sync::Arc;
use uuid::Uuid;
use verdict_core::{CompanyTask, Result, Task, TaskEnvelope, VerdictError, fingerprint, queues};
use verdict_strategies::Outbound;

/// Single-ticker analysis request
#[derive(Debug, Clone)]
pub struct SingleRequest {
    pub symbol: String,
    pub quantity: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl SingleRequest {
    pub fn validate(&self) -> Result<()> {
        validate_position(&self.symbol, self.quantity, self.start_date, self.end_date)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint::single(&self.symbol, self.quantity, self.start_date, self.end_date)
    }
}

/// One position inside a portfolio request
#[derive(Debug, Clone)]
pub struct CompanyRequest {
    pub symbol: String,
    pub quantity: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Portfolio-wide request, scoped to a user for memoization
#[derive(Debug, Clone)]
pub struct PortfolioRequest {
    pub user: String,
    pub companies: Vec<CompanyRequest>,
}

impl PortfolioRequest {
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(VerdictError::Validation("user is required".to_string()));
        }
        if self.companies.is_empty() {
            return Err(VerdictError::Validation(
                "portfolio has no companies".to_string(),
            ));
        }
        for company in &self.companies {
            validate_position(
                &company.symbol,
                company.quantity,
                company.start_date,
                company.end_date,
            )?;
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> String {
        let symbols: Vec<String> = self.companies.iter().map(|c| c.symbol.clone()).collect();
        fingerprint::portfolio(&self.user, &symbols)
    }
}

fn validate_position(symbol: &str, quantity: u32, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if symbol.trim().is_empty() {
        return Err(VerdictError::Validation("symbol is required".to_string()));
    }
    if quantity == 0 {
        return Err(VerdictError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    if start >= end {
        return Err(VerdictError::Validation(format!(
            "start date {start} must be before end date {end}"
        )));
    }
    Ok(())
}

/// A built-but-unpublished task batch
///
/// The caller registers `correlation_id` with `expected` before pushing
/// `messages` to the broker.
#[derive(Debug)]
pub struct PendingDispatch {
    pub correlation_id: Uuid,
    pub expected: usize,
    pub messages: Vec<Outbound>,
}

/// Builds dispatch batches from validated requests plus fetched price history
pub struct Dispatcher {
    market: Arc<dyn MarketData>,
}

impl Dispatcher {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }

    /// Single-ticker flow: one envelope to the regression worker, which
    /// fans the enriched task out to the other three. Four results are
    /// expected back on the aggregation queue.
    pub async fn prepare_single(&self, request: &SingleRequest) -> Result<PendingDispatch> {
        request.validate()?;
        let series = self
            .market
            .daily_closes(&request.symbol, request.start_date, request.end_date)
            .await?;

        let envelope = TaskEnvelope::new(Task::SingleAnalysis {
            symbol: request.symbol.trim().to_uppercase(),
            quantity: request.quantity,
            start_date: request.start_date,
            end_date: request.end_date,
            price_series: series,
        });

        Ok(PendingDispatch {
            correlation_id: envelope.correlation_id,
            expected: 4,
            messages: vec![Outbound::to_queue(queues::REGRESSION_TASKS, &envelope)?],
        })
    }

    /// Portfolio flow: one envelope per strategy queue, all under one
    /// correlation id, one result expected per strategy.
    pub async fn prepare_portfolio(&self, request: &PortfolioRequest) -> Result<PendingDispatch> {
        request.validate()?;
        let companies = self.fetch_companies(&request.companies).await?;
        let correlation_id = Uuid::new_v4();

        let targets = [
            (
                queues::REGRESSION_TASKS,
                Task::PortfolioRegression {
                    companies: companies.clone(),
                },
            ),
            (
                queues::CROSSOVER_TASKS,
                Task::PortfolioCrossover {
                    companies: companies.clone(),
                },
            ),
            (
                queues::MEAN_REVERSION_TASKS,
                Task::PortfolioMeanReversion {
                    companies: companies.clone(),
                },
            ),
            (
                queues::SENTIMENT_TASKS,
                Task::PortfolioSentiment { companies },
            ),
        ];

        let mut messages = Vec::with_capacity(targets.len());
        for (queue, task) in targets {
            let envelope = TaskEnvelope::with_correlation(correlation_id, task);
            messages.push(Outbound::to_queue(queue, &envelope)?);
        }

        Ok(PendingDispatch {
            correlation_id,
            expected: messages.len(),
            messages,
        })
    }

    /// Portfolio regression one-shot: a single envelope to the regression
    /// worker, answered on an exclusive reply queue.
    pub async fn prepare_portfolio_regression(
        &self,
        request: &PortfolioRequest,
        reply_queue: &str,
    ) -> Result<PendingDispatch> {
        request.validate()?;
        let companies = self.fetch_companies(&request.companies).await?;

        let envelope = TaskEnvelope::new(Task::PortfolioRegression { companies })
            .reply_to(reply_queue);

        Ok(PendingDispatch {
            correlation_id: envelope.correlation_id,
            expected: 1,
            messages: vec![Outbound::to_queue(queues::REGRESSION_TASKS, &envelope)?],
        })
    }

    async fn fetch_companies(&self, companies: &[CompanyRequest]) -> Result<Vec<CompanyTask>> {
        let fetches = companies.iter().map(|company| async {
            let series = self
                .market
                .daily_closes(&company.symbol, company.start_date, company.end_date)
                .await?;
            Ok::<_, VerdictError>(CompanyTask {
                symbol: company.symbol.trim().to_uppercase(),
                quantity: company.quantity,
                start_date: company.start_date,
                end_date: company.end_date,
                price_series: series,
            })
        });
        try_join_all(fetches).await
    }
}
