//! Durable store for canonical price history.
//!
//! Append-friendly persistent record of every run's canonical prices,
//! queryable for the latest price and for per-token time ranges. Appends
//! are idempotent per `(token, recorded_at)` so a retried append after a
//! crash or timeout never duplicates rows. History persistence is
//! best-effort from the pipeline's point of view: the cache snapshot, not
//! this store, is the serving source of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{CanonicalPrice, PriceHistoryRecord, TokenId};
use thiserror::Error;

pub mod implementations {
	pub mod memory;
	pub mod postgres;
}

pub use implementations::memory::MemoryHistory;
pub use implementations::postgres::PostgresHistory;

/// Errors that can occur during history store operations.
#[derive(Debug, Error)]
pub enum HistoryError {
	/// No history exists for the requested token.
	#[error("No history for token")]
	NotFound,
	/// Error in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Trait defining the durable history store interface.
#[async_trait]
pub trait HistoryStore: Send + Sync {
	/// Append one run's records. Idempotent per `(token, recorded_at)`.
	async fn append(&self, records: &[PriceHistoryRecord]) -> Result<(), HistoryError>;

	/// Latest recorded canonical price for a token.
	///
	/// The returned price carries `stale = false`; rows do not persist
	/// the staleness flag and consumers judge freshness against their
	/// own threshold.
	async fn latest(&self, token: &TokenId) -> Result<CanonicalPrice, HistoryError>;

	/// Records for a token within `[from, to]`, oldest first.
	async fn history(
		&self,
		token: &TokenId,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<PriceHistoryRecord>, HistoryError>;
}
