//! Price observations, canonical prices, cache snapshots and history rows.

use crate::{common::SourceId, tokens::TokenId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One upstream source's reading for a single token.
///
/// Created per fetch call, never mutated, discarded after the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
	pub token: TokenId,
	/// Observed price, strictly positive.
	pub price: Decimal,
	pub source: SourceId,
	pub observed_at: DateTime<Utc>,
	/// Optional confidence/liquidity weight reported by the source.
	/// When absent the configured per-source trust weight applies.
	pub weight: Option<Decimal>,
}

/// The reconciled price chosen to represent a token for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPrice {
	pub token: TokenId,
	pub price: Decimal,
	/// Sources that contributed to the merged price.
	pub sources: BTreeSet<SourceId>,
	pub merged_at: DateTime<Utc>,
	/// True when quorum was not met or the freshest contributing
	/// observation exceeded the staleness threshold.
	pub stale: bool,
}

impl CanonicalPrice {
	/// Copy of this price flagged stale, used when a token is carried
	/// forward from a previous snapshot without fresh observations.
	pub fn as_stale(&self) -> CanonicalPrice {
		CanonicalPrice {
			stale: true,
			..self.clone()
		}
	}
}

/// Keyed mapping of token -> canonical price, replaced wholesale on every
/// successful run and versioned by the merge timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
	/// Merge timestamp of the run that produced this snapshot.
	pub merged_at: DateTime<Utc>,
	/// Canonical prices keyed by [`TokenId::key`].
	pub prices: BTreeMap<String, CanonicalPrice>,
}

impl CacheSnapshot {
	pub fn new(merged_at: DateTime<Utc>) -> Self {
		Self {
			merged_at,
			prices: BTreeMap::new(),
		}
	}

	pub fn insert(&mut self, price: CanonicalPrice) {
		self.prices.insert(price.token.key(), price);
	}

	pub fn get(&self, token: &TokenId) -> Option<&CanonicalPrice> {
		self.prices.get(&token.key())
	}

	pub fn len(&self) -> usize {
		self.prices.len()
	}

	pub fn is_empty(&self) -> bool {
		self.prices.is_empty()
	}
}

/// Append-only durable record of a canonical price, one per token per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
	pub token: TokenId,
	pub price: Decimal,
	pub recorded_at: DateTime<Utc>,
	pub sources: BTreeSet<SourceId>,
}

impl From<&CanonicalPrice> for PriceHistoryRecord {
	fn from(price: &CanonicalPrice) -> Self {
		Self {
			token: price.token.clone(),
			price: price.price,
			recorded_at: price.merged_at,
			sources: price.sources.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::common::ChainId;

	fn canonical(symbol: &str, price: i64) -> CanonicalPrice {
		CanonicalPrice {
			token: TokenId::new(symbol, ChainId(1)),
			price: Decimal::from(price),
			sources: BTreeSet::from([SourceId::new("dex_aggregator")]),
			merged_at: Utc::now(),
			stale: false,
		}
	}

	#[test]
	fn test_snapshot_insert_and_get() {
		let mut snapshot = CacheSnapshot::new(Utc::now());
		snapshot.insert(canonical("uETH", 100));
		snapshot.insert(canonical("uSOL", 20));

		assert_eq!(snapshot.len(), 2);
		let found = snapshot.get(&TokenId::new("uETH", ChainId(1))).unwrap();
		assert_eq!(found.price, Decimal::from(100));
		assert!(snapshot.get(&TokenId::new("uETH", ChainId(2))).is_none());
	}

	#[test]
	fn test_as_stale_only_touches_flag() {
		let price = canonical("uETH", 100);
		let stale = price.as_stale();
		assert!(stale.stale);
		assert_eq!(stale.price, price.price);
		assert_eq!(stale.merged_at, price.merged_at);
		assert_eq!(stale.sources, price.sources);
	}

	#[test]
	fn test_history_record_from_canonical() {
		let price = canonical("uETH", 100);
		let record = PriceHistoryRecord::from(&price);
		assert_eq!(record.recorded_at, price.merged_at);
		assert_eq!(record.sources, price.sources);
	}
}
