//! The verdict CLI: runs the whole pipeline in one process over the
//! in-memory broker.
//!
//! Each strategy worker and the aggregator run as their own tokio task, all
//! sharing one broker handle, mirroring the deployed shape where each would
//! be its own process on a real broker.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use verdict_broker::{Broker, MemoryBroker};
use verdict_hub::{
    Aggregator, CompanyRequest, HubConfig, PortfolioRequest, SingleRequest, VerdictService,
    YahooMarketData,
};
use verdict_strategies::{
    CrossoverWorker, GeminiClient, GeminiConfig, MeanReversionWorker, RegressionWorker,
    SentimentWorker, StrategyWorker, run_worker,
};

#[derive(Parser)]
#[command(name = "verdict", about = "Multi-strategy stock verdict engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one position across all four strategies
    Analyze {
        /// Ticker symbol
        symbol: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },

    /// Evaluate a portfolio against every strategy
    Portfolio {
        /// Ticker symbols
        #[arg(required = true)]
        symbols: Vec<String>,
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },

    /// Portfolio-wide regression predictions only (single worker round trip)
    PortfolioRegression {
        #[arg(required = true)]
        symbols: Vec<String>,
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },
}

fn portfolio_request(
    user: String,
    symbols: Vec<String>,
    quantity: u32,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> PortfolioRequest {
    PortfolioRequest {
        user,
        companies: symbols
            .into_iter()
            .map(|symbol| CompanyRequest {
                symbol,
                quantity,
                start_date,
                end_date,
            })
            .collect(),
    }
}

fn spawn_worker(broker: &MemoryBroker, worker: Arc<dyn StrategyWorker>) {
    let broker: Arc<dyn Broker> = Arc::new(broker.clone());
    tokio::spawn(async move {
        if let Err(err) = run_worker(broker, worker).await {
            warn!(%err, "worker stopped");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let broker = MemoryBroker::new();
    let aggregator = Arc::new(Aggregator::new(
        Arc::new(broker.clone()),
        HubConfig::default().max_redeliveries,
    ));
    {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            if let Err(err) = aggregator.run().await {
                warn!(%err, "aggregator stopped");
            }
        });
    }

    let gemini = GeminiConfig::from_env().context("sentiment model configuration")?;
    let sentiment = GeminiClient::new(gemini).context("sentiment model client")?;

    spawn_worker(&broker, Arc::new(RegressionWorker));
    spawn_worker(&broker, Arc::new(CrossoverWorker));
    spawn_worker(&broker, Arc::new(MeanReversionWorker));
    spawn_worker(&broker, Arc::new(SentimentWorker::new(Arc::new(sentiment))));

    let service = VerdictService::new(
        Arc::new(broker.clone()),
        aggregator,
        Arc::new(YahooMarketData::new()),
        HubConfig::default(),
    );

    let output = match cli.command {
        Command::Analyze {
            symbol,
            quantity,
            start_date,
            end_date,
        } => {
            let result = service
                .analyze(SingleRequest {
                    symbol,
                    quantity,
                    start_date,
                    end_date,
                })
                .await?;
            serde_json::to_string_pretty(&result)?
        }
        Command::Portfolio {
            symbols,
            user,
            quantity,
            start_date,
            end_date,
        } => {
            let report = service
                .analyze_portfolio(portfolio_request(
                    user, symbols, quantity, start_date, end_date,
                ))
                .await?;
            serde_json::to_string_pretty(&report)?
        }
        Command::PortfolioRegression {
            symbols,
            user,
            quantity,
            start_date,
            end_date,
        } => {
            let result = service
                .portfolio_regression(portfolio_request(
                    user, symbols, quantity, start_date, end_date,
                ))
                .await?;
            serde_json::to_string_pretty(&result)?
        }
    };

    println!("{output}");
    Ok(())
}
