//! Chain-specific price feed source.
//!
//! Reads the latest round of an on-chain style feed through its gateway
//! endpoint, one call per token. Feed answers come back as fixed-point
//! integers with a decimals field and are rescaled to a decimal price.

use crate::{PriceSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{PriceObservation, SourceId, Token};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Latest-round payload from the feed gateway.
#[derive(Debug, Deserialize)]
pub struct RoundData {
	/// Fixed-point answer, scaled by `decimals`
	pub answer: i64,
	pub decimals: u32,
	/// Unix seconds the round was updated
	pub updated_at: Option<i64>,
}

/// Price source reading chain-native feeds through a gateway.
pub struct ChainFeedSource {
	id: SourceId,
	client: reqwest::Client,
	endpoint: String,
}

impl ChainFeedSource {
	pub fn new(id: SourceId, endpoint: String) -> Self {
		Self {
			id,
			client: reqwest::Client::new(),
			endpoint,
		}
	}

	/// Rescale a round answer to a decimal price.
	///
	/// `decimals` comes off the wire; a scale beyond what `Decimal`
	/// supports drops the round instead of panicking.
	pub fn price_from_round(round: &RoundData) -> Option<Decimal> {
		if round.answer <= 0 {
			return None;
		}
		Decimal::try_new(round.answer, round.decimals).ok()
	}

	fn observation_from_round(
		&self,
		token: &Token,
		round: RoundData,
		now: DateTime<Utc>,
	) -> Option<PriceObservation> {
		let price = Self::price_from_round(&round)?;
		let observed_at = round
			.updated_at
			.and_then(|secs| DateTime::from_timestamp(secs, 0))
			.unwrap_or(now);

		Some(PriceObservation {
			token: token.id(),
			price,
			source: self.id.clone(),
			observed_at,
			weight: None,
		})
	}
}

#[async_trait]
impl PriceSource for ChainFeedSource {
	fn id(&self) -> SourceId {
		self.id.clone()
	}

	async fn fetch(
		&self,
		tokens: &[Token],
		timeout: Duration,
	) -> Result<Vec<PriceObservation>, SourceError> {
		let now = Utc::now();
		let mut observations = Vec::new();
		let mut last_error = None;

		for token in tokens {
			let url = format!(
				"{}/feeds/{}/{}/latest",
				self.endpoint, token.chain, token.symbol
			);

			let result = self.client.get(&url).timeout(timeout).send().await;
			let response = match result.and_then(|r| r.error_for_status()) {
				Ok(response) => response,
				Err(e) => {
					// Tokens without a feed on their chain are partial
					// coverage, not source failure.
					warn!("No feed round for {} from {}: {}", token.id(), self.id, e);
					last_error = Some(e.to_string());
					continue;
				}
			};

			match response.json::<RoundData>().await {
				Ok(round) => {
					if let Some(obs) = self.observation_from_round(token, round, now) {
						observations.push(obs);
					}
				}
				Err(e) => {
					warn!("Bad feed round for {} from {}: {}", token.id(), self.id, e);
					last_error = Some(e.to_string());
				}
			}
		}

		// Only a total miss counts as source failure.
		if observations.is_empty() {
			if let Some(reason) = last_error {
				return Err(SourceError::Unavailable(reason));
			}
		}

		debug!(
			"{} read {}/{} feed rounds",
			self.id,
			observations.len(),
			tokens.len()
		);
		Ok(observations)
	}
}
