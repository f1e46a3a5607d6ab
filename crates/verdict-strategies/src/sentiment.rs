//! LLM momentum/sentiment worker
//!
//! Delegates the BUY/NO_BUY call to a language model behind the
//! [`SentimentModel`] trait. The decision prompt is run at temperature 0 so
//! repeated asks converge on the same answer; the rationale prompt runs
//! warmer since it only has to read well. The model's free-text decision is
//! normalized by substring: anything containing "YES" is a buy.

use crate::portfolio;
use crate::worker::{Handled, Outbound, StrategyWorker, reply_destination};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use verdict_core::{
    CompanyTask, Decision, PriceSeries, Result, StrategyKind, StrategyResult, Subject, Task,
    TaskEnvelope, VerdictError, queues,
};

const DECISION_TEMPERATURE: f64 = 0.0;
const DECISION_MAX_TOKENS: u32 = 5;
const RATIONALE_TEMPERATURE: f64 = 0.4;
const RATIONALE_MAX_TOKENS: u32 = 80;
const FALLBACK_RATIONALE: &str = "Reason not provided.";

/// Everything the model is told about one position
#[derive(Debug, Clone)]
pub struct SentimentContext {
    pub symbol: String,
    pub quantity: u32,
    pub bought_day_price: f64,
    pub predicted_price: f64,
    pub bought_day_date: chrono::NaiveDate,
    pub predicted_day_date: chrono::NaiveDate,
}

impl SentimentContext {
    fn decision_prompt(&self) -> String {
        format!(
            "You are a momentum trading analyst. A position of {} shares of {} \
             was opened at {:.2} on {}. The projected price for {} is {:.2}. \
             Based on momentum and market sentiment, should the position be \
             bought into? Answer with exactly YES or NO.",
            self.quantity,
            self.symbol,
            self.bought_day_price,
            self.bought_day_date,
            self.predicted_day_date,
            self.predicted_price,
        )
    }

    fn rationale_prompt(&self, decision: Decision) -> String {
        let verdict = match decision {
            Decision::Buy => "BUY",
            Decision::NoBuy | Decision::Error => "NOT BUY",
        };
        format!(
            "In one or two sentences, explain why a momentum analyst would \
             decide to {verdict} {} shares of {} opened at {:.2} with a \
             projected price of {:.2}.",
            self.quantity, self.symbol, self.bought_day_price, self.predicted_price,
        )
    }
}

/// Normalize the model's free-text verdict into a decision.
pub fn normalize_decision(text: &str) -> Decision {
    if text.to_uppercase().contains("YES") {
        Decision::Buy
    } else {
        Decision::NoBuy
    }
}

/// Seam for the language model behind the sentiment vote
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentimentModel: Send + Sync {
    /// Ask for the BUY/NO_BUY verdict; returns the model's raw text.
    async fn decide(&self, ctx: &SentimentContext) -> Result<String>;

    /// Ask for a short human-readable rationale for an already-made decision.
    async fn explain(&self, ctx: &SentimentContext, decision: Decision) -> Result<String>;
}

/// Gemini API configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: "https://generativelanguage.googleapis.com/v1".to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout_secs: 30,
        }
    }

    /// Read the key from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            VerdictError::Validation("GEMINI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

/// HTTP client for the Gemini `generateContent` endpoint
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| VerdictError::Upstream(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    async fn generate(&self, prompt: &str, temperature: f64, max_tokens: u32) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base, self.config.model, self.config.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| VerdictError::Upstream(format!("Gemini request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerdictError::Upstream(format!(
                "Gemini returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| VerdictError::Upstream(format!("bad Gemini response: {err}")))?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| VerdictError::Upstream("Gemini returned no candidates".to_string()))
    }
}

#[async_trait]
impl SentimentModel for GeminiClient {
    async fn decide(&self, ctx: &SentimentContext) -> Result<String> {
        self.generate(
            &ctx.decision_prompt(),
            DECISION_TEMPERATURE,
            DECISION_MAX_TOKENS,
        )
        .await
    }

    async fn explain(&self, ctx: &SentimentContext, decision: Decision) -> Result<String> {
        self.generate(
            &ctx.rationale_prompt(decision),
            RATIONALE_TEMPERATURE,
            RATIONALE_MAX_TOKENS,
        )
        .await
    }
}

/// The sentiment worker
pub struct SentimentWorker {
    model: std::sync::Arc<dyn SentimentModel>,
}

impl SentimentWorker {
    pub fn new(model: std::sync::Arc<dyn SentimentModel>) -> Self {
        Self { model }
    }

    async fn vote(&self, ctx: &SentimentContext) -> Result<(Decision, String)> {
        let verdict = self.model.decide(ctx).await?;
        let decision = normalize_decision(&verdict);
        let reason = match self.model.explain(ctx, decision).await {
            Ok(reason) => reason,
            Err(err) => {
                warn!(symbol = %ctx.symbol, %err, "rationale call failed, using fallback");
                FALLBACK_RATIONALE.to_string()
            }
        };
        Ok((decision, reason))
    }

    fn company_context(company: &CompanyTask) -> Result<SentimentContext> {
        let series: &PriceSeries = &company.price_series;
        let closes = series.valid_closes();
        let (Some(&first), Some(&last)) = (closes.first(), closes.last()) else {
            return Err(VerdictError::InsufficientData(
                "no valid closing prices in the series".to_string(),
            ));
        };
        let (Some(first_date), Some(last_date)) = (series.first_date(), series.last_date()) else {
            return Err(VerdictError::InsufficientData(
                "series has no dates".to_string(),
            ));
        };
        Ok(SentimentContext {
            symbol: company.symbol.clone(),
            quantity: company.quantity,
            bought_day_price: first,
            predicted_price: last,
            bought_day_date: first_date,
            predicted_day_date: last_date,
        })
    }

    async fn portfolio_result(
        &self,
        envelope: &TaskEnvelope,
        companies: &[CompanyTask],
    ) -> StrategyResult {
        let mut decisions = Vec::with_capacity(companies.len());
        let mut details = Vec::with_capacity(companies.len());

        for company in companies {
            let outcome = match Self::company_context(company) {
                Ok(ctx) => self.vote(&ctx).await,
                Err(err) => Err(err),
            };
            match outcome {
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
            StrategyKind::MomentumSentiment,
            Subject::Many(symbols),
            portfolio::fold_decisions(&decisions),
            format!("sentiment evaluated across {} companies", companies.len()),
        )
        .with_confidence("Based on model decision and reasoning")
        .with_payload(serde_json::Value::Array(details))
    }
}

#[async_trait]
impl StrategyWorker for SentimentWorker {
    fn name(&self) -> &str {
        "sentiment"
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::MomentumSentiment
    }

    fn queue(&self) -> &'static str {
        queues::SENTIMENT_TASKS
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<Handled> {
        match &envelope.task {
            Task::StrategyVote {
                symbol,
                quantity,
                prediction,
                ..
            } => {
                let ctx = SentimentContext {
                    symbol: symbol.clone(),
                    quantity: *quantity,
                    bought_day_price: prediction.bought_day_price,
                    predicted_price: prediction.predicted_price,
                    bought_day_date: prediction.bought_day_date,
                    predicted_day_date: prediction.predicted_day_date,
                };
                let (decision, reason) = self.vote(&ctx).await?;
                let result = StrategyResult::new(
                    envelope.correlation_id,
                    StrategyKind::MomentumSentiment,
                    symbol.as_str(),
                    decision,
                    reason,
                )
                .with_confidence("Based on model decision and reasoning");
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            Task::PortfolioSentiment { companies } => {
                let result = self.portfolio_result(envelope, companies).await;
                Ok(Handled::Publish(vec![Outbound::to_queue(
                    reply_destination(envelope),
                    &result,
                )?]))
            }

            _ => Ok(Handled::NotMine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use verdict_core::{PricePoint, Prediction};

    fn vote_envelope() -> TaskEnvelope {
        TaskEnvelope::new(Task::StrategyVote {
            symbol: "NVDA".to_string(),
            quantity: 2,
            price_series: PriceSeries::new(vec![
                PricePoint::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 100.0),
                PricePoint::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 110.0),
            ]),
            prediction: Prediction {
                predicted_price: 120.0,
                bought_day_price: 100.0,
                bought_day_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                predicted_day_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            },
        })
    }

    #[test]
    fn test_normalize_decision_is_substring_based() {
        assert_eq!(normalize_decision("YES"), Decision::Buy);
        assert_eq!(normalize_decision("yes, definitely"), Decision::Buy);
        assert_eq!(normalize_decision("NO"), Decision::NoBuy);
        assert_eq!(normalize_decision("unclear"), Decision::NoBuy);
    }

    #[tokio::test]
    async fn test_vote_uses_model_decision_and_rationale() {
        let mut model = MockSentimentModel::new();
        model
            .expect_decide()
            .times(1)
            .returning(|_| Ok("YES".to_string()));
        model
            .expect_explain()
            .times(1)
            .returning(|_, _| Ok("Momentum is strong.".to_string()));

        let worker = SentimentWorker::new(Arc::new(model));
        let Handled::Publish(outbound) = worker.handle(&vote_envelope()).await.unwrap() else {
            panic!("expected publishes");
        };
        let result: StrategyResult = serde_json::from_slice(&outbound[0].body).unwrap();
        assert_eq!(result.decision, Decision::Buy);
        assert_eq!(result.reason, "Momentum is strong.");
        assert_eq!(result.strategy, StrategyKind::MomentumSentiment);
    }

    #[tokio::test]
    async fn test_rationale_failure_falls_back_without_losing_the_vote() {
        let mut model = MockSentimentModel::new();
        model
            .expect_decide()
            .returning(|_| Ok("no thanks".to_string()));
        model
            .expect_explain()
            .returning(|_, _| Err(VerdictError::Upstream("rate limited".to_string())));

        let worker = SentimentWorker::new(Arc::new(model));
        let Handled::Publish(outbound) = worker.handle(&vote_envelope()).await.unwrap() else {
            panic!("expected publishes");
        };
        let result: StrategyResult = serde_json::from_slice(&outbound[0].body).unwrap();
        assert_eq!(result.decision, Decision::NoBuy);
        assert_eq!(result.reason, FALLBACK_RATIONALE);
    }

    #[tokio::test]
    async fn test_decision_failure_bubbles_up() {
        let mut model = MockSentimentModel::new();
        model
            .expect_decide()
            .returning(|_| Err(VerdictError::Upstream("model offline".to_string())));

        let worker = SentimentWorker::new(Arc::new(model));
        let err = worker.handle(&vote_envelope()).await.unwrap_err();
        assert!(matches!(err, VerdictError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_portfolio_sentiment_tolerates_per_company_failures() {
        let mut model = MockSentimentModel::new();
        model.expect_decide().returning(|_| Ok("YES".to_string()));
        model
            .expect_explain()
            .returning(|_, _| Ok("Broad uptrend.".to_string()));

        let envelope = TaskEnvelope::new(Task::PortfolioSentiment {
            companies: vec![
                CompanyTask {
                    symbol: "NVDA".to_string(),
                    quantity: 1,
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    price_series: PriceSeries::new(vec![
                        PricePoint::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 100.0),
                        PricePoint::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 110.0),
                    ]),
                },
                CompanyTask {
                    symbol: "EMPTY".to_string(),
                    quantity: 1,
                    start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    price_series: PriceSeries::default(),
                },
            ],
        });

        let worker = SentimentWorker::new(Arc::new(model));
        let Handled::Publish(outbound) = worker.handle(&envelope).await.unwrap() else {
            panic!("expected publishes");
        };
        let result: StrategyResult = serde_json::from_slice(&outbound[0].body).unwrap();
        // One BUY, one ERROR: exactly half, so the fold lands on BUY.
        assert_eq!(result.decision, Decision::Buy);
        let details = result.payload.unwrap();
        assert_eq!(details[1]["decision"], "ERROR");
    }

    #[test]
    fn test_config_builders() {
        let config = GeminiConfig::new("key")
            .with_api_base("http://localhost:9999/v1")
            .with_model("gemini-test")
            .with_timeout(5);
        assert_eq!(config.api_base, "http://localhost:9999/v1");
        assert_eq!(config.model, "gemini-test");
        assert_eq!(config.timeout_secs, 5);
    }
}
