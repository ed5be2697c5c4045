//! Cache store: the fast, local, last-known-good snapshot of canonical
//! prices.
//!
//! Read on startup and whenever live sources are degraded; written after
//! every successful merge. Writes are atomic from the reader's point of
//! view and reads fail closed: a missing, unparseable or
//! checksum-mismatched snapshot is reported as `NotFound`, never as wrong
//! data.

use async_trait::async_trait;
use oracle_types::CacheSnapshot;
use thiserror::Error;

pub mod implementations {
	pub mod file;
}

pub use implementations::file::FileCache;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
	/// No usable snapshot exists. Covers corruption and schema
	/// mismatches, which are deliberately indistinguishable from an
	/// absent snapshot.
	#[error("No cached snapshot available")]
	NotFound,
	/// Error serializing or deserializing the snapshot.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Trait defining the cache store interface.
///
/// Readers may run concurrently with a write and must observe either the
/// previous or the new snapshot in full, never a mix.
#[async_trait]
pub trait CacheStore: Send + Sync {
	/// Read the current snapshot.
	async fn read(&self) -> Result<CacheSnapshot, CacheError>;

	/// Replace the snapshot wholesale.
	async fn write(&self, snapshot: &CacheSnapshot) -> Result<(), CacheError>;
}
