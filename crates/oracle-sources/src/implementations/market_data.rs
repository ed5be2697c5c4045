//! Market-data aggregator price source.
//!
//! Simple-price API keyed by symbol. The aggregator is chain-agnostic, so
//! one quoted symbol prices that symbol on every chain it was requested
//! for.

use crate::{PriceSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{PriceObservation, SourceId, Token};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// One symbol's entry in the simple-price response.
#[derive(Debug, Deserialize)]
pub struct SymbolPrice {
	pub usd: Decimal,
	/// Unix seconds of the aggregator's last update for this symbol
	pub last_updated_at: Option<i64>,
}

/// Simple-price response: symbol -> price entry.
pub type SimplePriceResponse = HashMap<String, SymbolPrice>;

/// Price source backed by a market-data aggregator.
pub struct MarketDataSource {
	id: SourceId,
	client: reqwest::Client,
	endpoint: String,
	api_key: Option<String>,
}

impl MarketDataSource {
	pub fn new(id: SourceId, endpoint: String, api_key: Option<String>) -> Self {
		Self {
			id,
			client: reqwest::Client::new(),
			endpoint,
			api_key,
		}
	}

	/// Expand symbol-keyed prices onto every requested token with that
	/// symbol.
	pub fn observations_from_response(
		id: &SourceId,
		response: SimplePriceResponse,
		tokens: &[Token],
		now: DateTime<Utc>,
	) -> Vec<PriceObservation> {
		let mut observations = Vec::new();
		for token in tokens {
			let Some(entry) = response.get(&token.symbol) else {
				continue;
			};
			if entry.usd <= Decimal::ZERO {
				continue;
			}

			let observed_at = entry
				.last_updated_at
				.and_then(|secs| DateTime::from_timestamp(secs, 0))
				.unwrap_or(now);

			observations.push(PriceObservation {
				token: token.id(),
				price: entry.usd,
				source: id.clone(),
				observed_at,
				weight: None,
			});
		}
		observations
	}
}

#[async_trait]
impl PriceSource for MarketDataSource {
	fn id(&self) -> SourceId {
		self.id.clone()
	}

	async fn fetch(
		&self,
		tokens: &[Token],
		timeout: Duration,
	) -> Result<Vec<PriceObservation>, SourceError> {
		let symbols: Vec<&str> = tokens.iter().map(|t| t.symbol.as_str()).collect();
		let url = format!("{}/api/v3/simple/price", self.endpoint);

		let mut request = self
			.client
			.get(&url)
			.query(&[("symbols", symbols.join(",")), ("vs", "usd".to_string())])
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

		let body: SimplePriceResponse = response
			.json()
			.await
			.map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

		let observations = Self::observations_from_response(&self.id, body, tokens, Utc::now());
		debug!(
			"{} priced {}/{} tokens",
			self.id,
			observations.len(),
			tokens.len()
		);
		Ok(observations)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use oracle_types::ChainId;

	#[test]
	fn test_symbol_prices_expand_to_all_chains() {
		let tokens = vec![
			Token::new("uETH", ChainId(1), 18),
			Token::new("uETH", ChainId(8453), 18),
			Token::new("uSOL", ChainId::NONE, 9),
		];
		let response: SimplePriceResponse = serde_json::from_str(
			r#"{ "uETH": { "usd": 2500.1, "last_updated_at": 1700000000 } }"#,
		)
		.unwrap();

		let observations = MarketDataSource::observations_from_response(
			&SourceId::new("market_data"),
			response,
			&tokens,
			Utc::now(),
		);

		// Both uETH tokens priced from the one symbol entry; uSOL absent.
		assert_eq!(observations.len(), 2);
		assert!(observations.iter().all(|o| o.token.symbol == "uETH"));
		assert!(observations.iter().all(|o| o.weight.is_none()));
	}

	#[test]
	fn test_unquoted_symbols_are_skipped() {
		let tokens = vec![Token::new("uSOL", ChainId::NONE, 9)];
		let response: SimplePriceResponse = serde_json::from_str("{}").unwrap();

		let observations = MarketDataSource::observations_from_response(
			&SourceId::new("market_data"),
			response,
			&tokens,
			Utc::now(),
		);
		assert!(observations.is_empty());
	}
}
