//! Upstream price sources.
//!
//! Each upstream provider sits behind the [`PriceSource`] trait: given a
//! token set and a timeout it returns whatever observations it obtained,
//! or fails as a whole. Partial coverage is success, not failure. The
//! [`service::SourceService`] fans out over every enabled source with
//! per-source retries and a global fetch deadline.

use async_trait::async_trait;
use oracle_config::SourceConfig;
use oracle_types::{PriceObservation, SourceId, Token};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod chain_feed;
	pub mod dex_aggregator;
	pub mod market_data;
}

pub mod service;

pub use implementations::chain_feed::ChainFeedSource;
pub use implementations::dex_aggregator::DexAggregatorSource;
pub use implementations::market_data::MarketDataSource;
pub use service::{FetchReport, SourceService};

/// Errors that can occur when fetching from an upstream source.
#[derive(Debug, Error)]
pub enum SourceError {
	/// Total failure of the source: network, auth, rate limit.
	/// Transient; retried with backoff by the fetch service.
	#[error("Source unavailable: {0}")]
	Unavailable(String),
	/// The source responded but the payload could not be interpreted.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
}

/// Uniform interface over one upstream price provider.
///
/// Implementations must be safely callable concurrently with other
/// adapters and with themselves across runs. Exceeding the given timeout
/// is treated by callers identically to failure.
#[async_trait]
pub trait PriceSource: Send + Sync {
	/// Identifier recorded on every observation this source produces.
	fn id(&self) -> SourceId;

	/// Fetch observations for the given tokens.
	///
	/// Returns the subset of tokens it could price; tokens it cannot
	/// cover are simply absent from the result.
	async fn fetch(
		&self,
		tokens: &[Token],
		timeout: Duration,
	) -> Result<Vec<PriceObservation>, SourceError>;
}

/// Build a source adapter from its configuration entry.
pub fn create_source(
	name: &str,
	config: &SourceConfig,
) -> Result<Arc<dyn PriceSource>, SourceError> {
	let id = SourceId::new(name);
	match config.kind.as_str() {
		"dex_aggregator" => Ok(Arc::new(DexAggregatorSource::new(
			id,
			config.endpoint.clone(),
			config.api_key.clone(),
		))),
		"market_data" => Ok(Arc::new(MarketDataSource::new(
			id,
			config.endpoint.clone(),
			config.api_key.clone(),
		))),
		"chain_feed" => Ok(Arc::new(ChainFeedSource::new(id, config.endpoint.clone()))),
		other => Err(SourceError::InvalidResponse(format!(
			"Unknown source kind '{}'",
			other
		))),
	}
}
