//! Identifier newtypes used throughout the oracle system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric chain identifier.
///
/// Zero is reserved for chains that have no numeric chain id.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChainId(pub u64);

impl ChainId {
	/// Chains without a numeric chain id.
	pub const NONE: ChainId = ChainId(0);
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Identifier of an upstream price source.
///
/// Ordered so contributing-source sets have a deterministic iteration
/// order regardless of fetch completion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for SourceId {
	fn from(name: &str) -> Self {
		Self(name.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_source_id_ordering() {
		let mut sources = vec![
			SourceId::new("market_data"),
			SourceId::new("chain_feed"),
			SourceId::new("dex_aggregator"),
		];
		sources.sort();
		assert_eq!(sources[0].as_str(), "chain_feed");
		assert_eq!(sources[2].as_str(), "market_data");
	}
}
