//! In-memory history store.
//!
//! Used by tests and by deployments running without a database. Applies
//! the same `(token, recorded_at)` dedup key as the postgres backend.

use crate::{HistoryError, HistoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{CanonicalPrice, PriceHistoryRecord, TokenId};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type TokenRows = BTreeMap<DateTime<Utc>, PriceHistoryRecord>;

/// In-memory history store.
#[derive(Default)]
pub struct MemoryHistory {
	rows: RwLock<BTreeMap<String, TokenRows>>,
}

impl MemoryHistory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Total stored rows, across all tokens.
	pub async fn record_count(&self) -> usize {
		self.rows.read().await.values().map(|rows| rows.len()).sum()
	}
}

#[async_trait]
impl HistoryStore for MemoryHistory {
	async fn append(&self, records: &[PriceHistoryRecord]) -> Result<(), HistoryError> {
		let mut rows = self.rows.write().await;
		for record in records {
			rows.entry(record.token.key())
				.or_default()
				.entry(record.recorded_at)
				.or_insert_with(|| record.clone());
		}
		Ok(())
	}

	async fn latest(&self, token: &TokenId) -> Result<CanonicalPrice, HistoryError> {
		let rows = self.rows.read().await;
		let record = rows
			.get(&token.key())
			.and_then(|rows| rows.values().next_back())
			.ok_or(HistoryError::NotFound)?;

		Ok(CanonicalPrice {
			token: record.token.clone(),
			price: record.price,
			sources: record.sources.clone(),
			merged_at: record.recorded_at,
			stale: false,
		})
	}

	async fn history(
		&self,
		token: &TokenId,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<PriceHistoryRecord>, HistoryError> {
		let rows = self.rows.read().await;
		Ok(rows
			.get(&token.key())
			.map(|rows| rows.range(from..=to).map(|(_, r)| r.clone()).collect())
			.unwrap_or_default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use oracle_types::{ChainId, SourceId};
	use rust_decimal::Decimal;
	use std::collections::BTreeSet;

	fn record(price: i64, recorded_at: DateTime<Utc>) -> PriceHistoryRecord {
		PriceHistoryRecord {
			token: TokenId::new("uETH", ChainId(1)),
			price: Decimal::from(price),
			recorded_at,
			sources: BTreeSet::from([SourceId::new("dex_aggregator")]),
		}
	}

	#[tokio::test]
	async fn test_append_is_idempotent() {
		let store = MemoryHistory::new();
		let now = Utc::now();
		let records = vec![record(100, now)];

		store.append(&records).await.unwrap();
		store.append(&records).await.unwrap();

		assert_eq!(store.record_count().await, 1);
	}

	#[tokio::test]
	async fn test_latest_returns_newest_row() {
		let store = MemoryHistory::new();
		let now = Utc::now();
		store
			.append(&[record(100, now - Duration::minutes(2)), record(101, now)])
			.await
			.unwrap();

		let latest = store
			.latest(&TokenId::new("uETH", ChainId(1)))
			.await
			.unwrap();
		assert_eq!(latest.price, Decimal::from(101));
		assert_eq!(latest.merged_at, now);
		assert!(!latest.stale);
	}

	#[tokio::test]
	async fn test_latest_unknown_token_is_not_found() {
		let store = MemoryHistory::new();
		let result = store.latest(&TokenId::new("uSOL", ChainId::NONE)).await;
		assert!(matches!(result, Err(HistoryError::NotFound)));
	}

	#[tokio::test]
	async fn test_history_range_is_inclusive_and_ordered() {
		let store = MemoryHistory::new();
		let now = Utc::now();
		store
			.append(&[
				record(100, now - Duration::minutes(10)),
				record(101, now - Duration::minutes(5)),
				record(102, now),
			])
			.await
			.unwrap();

		let rows = store
			.history(
				&TokenId::new("uETH", ChainId(1)),
				now - Duration::minutes(5),
				now,
			)
			.await
			.unwrap();

		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].price, Decimal::from(101));
		assert_eq!(rows[1].price, Decimal::from(102));
	}
}
