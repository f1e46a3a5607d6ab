//! Orchestration hub for the verdict pipeline
//!
//! Owns everything between a client request and its combined answer:
//!
//! - [`dispatcher`]: validation, price-history fetch, batch building
//! - [`aggregator`]: the correlation state machine over the shared
//!   aggregation queue
//! - [`service`]: the facade gluing dispatch, gather, combine, and cache
//! - [`cache`]: TTL memoization of aggregated results by fingerprint
//! - [`market`]: the market-data collaborator seam
//! - [`config`]: hub tunables

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod market;
pub mod service;

pub use aggregator::Aggregator;
pub use cache::ResultCache;
pub use config::HubConfig;
pub use dispatcher::{CompanyRequest, Dispatcher, PortfolioRequest, SingleRequest};
pub use market::{MarketData, YahooMarketData};
pub use service::{PortfolioReport, VerdictService};
