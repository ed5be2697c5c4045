//! File-backed cache snapshot implementation.
//!
//! The snapshot is stored as a JSON envelope carrying a schema version and
//! a SHA3-256 checksum of the serialized payload, so another process (or a
//! half-written file left by a crash) can never be mistaken for valid
//! price data. Writes go to a temp file in the same directory followed by
//! an atomic rename.

use crate::{CacheError, CacheStore};
use async_trait::async_trait;
use oracle_types::CacheSnapshot;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// Envelope schema version; bump on incompatible snapshot changes.
const SCHEMA_VERSION: u32 = 1;

/// On-disk envelope around the serialized snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
	schema_version: u32,
	/// Hex SHA3-256 of the `snapshot` field serialized as JSON.
	checksum: String,
	snapshot: serde_json::Value,
}

/// File-based cache store.
pub struct FileCache {
	path: PathBuf,
}

impl FileCache {
	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}

	fn checksum(payload: &[u8]) -> String {
		hex::encode(Sha3_256::digest(payload))
	}
}

#[async_trait]
impl CacheStore for FileCache {
	async fn read(&self) -> Result<CacheSnapshot, CacheError> {
		let bytes = match fs::read(&self.path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(CacheError::NotFound)
			}
			Err(e) => {
				warn!("Cache read failed, treating as absent: {}", e);
				return Err(CacheError::NotFound);
			}
		};

		// Any malformed content fails closed as NotFound.
		let envelope: SnapshotEnvelope = match serde_json::from_slice(&bytes) {
			Ok(envelope) => envelope,
			Err(e) => {
				warn!("Cache snapshot unparseable, treating as absent: {}", e);
				return Err(CacheError::NotFound);
			}
		};

		if envelope.schema_version != SCHEMA_VERSION {
			warn!(
				"Cache snapshot has schema version {}, expected {}; treating as absent",
				envelope.schema_version, SCHEMA_VERSION
			);
			return Err(CacheError::NotFound);
		}

		let payload = serde_json::to_vec(&envelope.snapshot)
			.map_err(|e| CacheError::Serialization(e.to_string()))?;
		if Self::checksum(&payload) != envelope.checksum {
			warn!("Cache snapshot checksum mismatch, treating as absent");
			return Err(CacheError::NotFound);
		}

		let snapshot: CacheSnapshot = match serde_json::from_value(envelope.snapshot) {
			Ok(snapshot) => snapshot,
			Err(e) => {
				warn!("Cache snapshot payload invalid, treating as absent: {}", e);
				return Err(CacheError::NotFound);
			}
		};

		debug!(
			"Read cache snapshot versioned {} with {} tokens",
			snapshot.merged_at,
			snapshot.len()
		);
		Ok(snapshot)
	}

	async fn write(&self, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
		let payload_value = serde_json::to_value(snapshot)
			.map_err(|e| CacheError::Serialization(e.to_string()))?;
		let payload = serde_json::to_vec(&payload_value)
			.map_err(|e| CacheError::Serialization(e.to_string()))?;

		let envelope = SnapshotEnvelope {
			schema_version: SCHEMA_VERSION,
			checksum: Self::checksum(&payload),
			snapshot: payload_value,
		};
		let bytes = serde_json::to_vec(&envelope)
			.map_err(|e| CacheError::Serialization(e.to_string()))?;

		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| CacheError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to temp file then renaming, so a
		// concurrent reader sees either the old or the new snapshot.
		let temp_path = self.path.with_extension("tmp");
		fs::write(&temp_path, &bytes)
			.await
			.map_err(|e| CacheError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &self.path)
			.await
			.map_err(|e| CacheError::Backend(e.to_string()))?;

		debug!(
			"Wrote cache snapshot versioned {} with {} tokens",
			snapshot.merged_at,
			snapshot.len()
		);
		Ok(())
	}
}
