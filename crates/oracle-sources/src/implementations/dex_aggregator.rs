//! DEX aggregator price source.
//!
//! Polls the aggregator's batch quote endpoint. Quotes come back keyed by
//! symbol and chain with an optional liquidity weight, which is carried
//! onto the observation so low-liquidity quotes weigh less in the merge.

use crate::{PriceSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{ChainId, PriceObservation, SourceId, Token, TokenId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Batch quote response from the aggregator API.
#[derive(Debug, Deserialize)]
pub struct QuoteResponse {
	pub quotes: Vec<Quote>,
}

/// One quoted token.
#[derive(Debug, Deserialize)]
pub struct Quote {
	pub symbol: String,
	pub chain_id: u64,
	pub price: Decimal,
	/// Unix seconds of the quote
	pub timestamp: Option<i64>,
	/// Relative liquidity behind the quote
	pub liquidity_weight: Option<Decimal>,
}

/// Price source backed by a DEX aggregator quote API.
pub struct DexAggregatorSource {
	id: SourceId,
	client: reqwest::Client,
	endpoint: String,
	api_key: Option<String>,
}

impl DexAggregatorSource {
	pub fn new(id: SourceId, endpoint: String, api_key: Option<String>) -> Self {
		Self {
			id,
			client: reqwest::Client::new(),
			endpoint,
			api_key,
		}
	}

	/// Map the response onto observations for the requested tokens.
	///
	/// Quotes for unrequested tokens and quotes that fail basic sanity
	/// checks are dropped with a warning; missing tokens are simply not
	/// covered this round.
	pub fn observations_from_response(
		id: &SourceId,
		response: QuoteResponse,
		tokens: &[Token],
		now: DateTime<Utc>,
	) -> Vec<PriceObservation> {
		let mut observations = Vec::new();
		for quote in response.quotes {
			let token_id = TokenId::new(quote.symbol.clone(), ChainId(quote.chain_id));
			if !tokens.iter().any(|t| t.id() == token_id) {
				continue;
			}
			if quote.price <= Decimal::ZERO {
				warn!("Dropping non-positive quote for {} from {}", token_id, id);
				continue;
			}

			let observed_at = quote
				.timestamp
				.and_then(|secs| DateTime::from_timestamp(secs, 0))
				.unwrap_or(now);

			observations.push(PriceObservation {
				token: token_id,
				price: quote.price,
				source: id.clone(),
				observed_at,
				weight: quote.liquidity_weight,
			});
		}
		observations
	}
}

#[async_trait]
impl PriceSource for DexAggregatorSource {
	fn id(&self) -> SourceId {
		self.id.clone()
	}

	async fn fetch(
		&self,
		tokens: &[Token],
		timeout: Duration,
	) -> Result<Vec<PriceObservation>, SourceError> {
		let symbols: Vec<String> = tokens
			.iter()
			.map(|t| format!("{}:{}", t.symbol, t.chain))
			.collect();
		let url = format!("{}/v1/quotes", self.endpoint);

		let mut request = self
			.client
			.get(&url)
			.query(&[("tokens", symbols.join(","))])
			.timeout(timeout);
		if let Some(key) = &self.api_key {
			request = request.header("x-api-key", key);
		}

		let response = request
			.send()
			.await
			.map_err(|e| SourceError::Unavailable(e.to_string()))?
			.error_for_status()
			.map_err(|e| SourceError::Unavailable(e.to_string()))?;

		let body: QuoteResponse = response
			.json()
			.await
			.map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

		let observations = Self::observations_from_response(&self.id, body, tokens, Utc::now());
		debug!(
			"{} quoted {}/{} tokens",
			self.id,
			observations.len(),
			tokens.len()
		);
		Ok(observations)
	}
}
