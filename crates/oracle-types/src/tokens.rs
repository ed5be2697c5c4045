//! Token identity types.
//!
//! Tokens are defined once in static configuration and never mutated at
//! runtime; a wrapped asset is identified by its symbol plus the chain it
//! lives on.

use crate::common::ChainId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identity of a token: symbol plus chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId {
	pub symbol: String,
	pub chain: ChainId,
}

impl TokenId {
	pub fn new(symbol: impl Into<String>, chain: ChainId) -> Self {
		Self {
			symbol: symbol.into(),
			chain,
		}
	}

	/// Stable string key used for snapshot maps and storage keys.
	pub fn key(&self) -> String {
		format!("{}:{}", self.symbol, self.chain)
	}
}

impl fmt::Display for TokenId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}", self.symbol, self.chain)
	}
}

/// A wrapped asset the pipeline tracks, sourced from static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	pub symbol: String,
	pub chain: ChainId,
	/// Canonical decimals of the wrapped asset.
	pub decimals: u32,
}

impl Token {
	pub fn new(symbol: impl Into<String>, chain: ChainId, decimals: u32) -> Self {
		Self {
			symbol: symbol.into(),
			chain,
			decimals,
		}
	}

	pub fn id(&self) -> TokenId {
		TokenId::new(self.symbol.clone(), self.chain)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_token_key_is_stable() {
		let token = Token::new("uETH", ChainId(1), 18);
		assert_eq!(token.id().key(), "uETH:1");
		assert_eq!(token.id().to_string(), "uETH@1");
	}

	#[test]
	fn test_chainless_token_uses_zero() {
		let token = Token::new("uSOL", ChainId::NONE, 9);
		assert_eq!(token.id().key(), "uSOL:0");
	}
}
