//! Configuration loading from files and environment.

use crate::types::*;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::{debug, info};

/// Known adapter kinds.
const SOURCE_KINDS: [&str; 3] = ["dex_aggregator", "market_data", "chain_feed"];

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
	/// Load configuration from file
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<OracleConfig> {
		let path = path.as_ref();
		info!("Loading configuration from {:?}", path);

		let contents = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {:?}", path))?;

		let mut config = match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Self::from_toml(&contents)?,
			Some("json") => Self::from_json(&contents)?,
			Some("yaml") | Some("yml") => Self::from_yaml(&contents)?,
			_ => anyhow::bail!("Unsupported config format: {:?}", path),
		};

		Self::apply_env_overrides(&mut config);
		Self::validate_config(&config)?;
		Ok(config)
	}

	/// Load from TOML string
	pub fn from_toml(contents: &str) -> Result<OracleConfig> {
		toml::from_str(contents).map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))
	}

	/// Load from JSON string
	pub fn from_json(contents: &str) -> Result<OracleConfig> {
		serde_json::from_str(contents).context("Failed to parse JSON")
	}

	/// Load from YAML string
	pub fn from_yaml(contents: &str) -> Result<OracleConfig> {
		serde_yaml::from_str(contents).context("Failed to parse YAML")
	}

	/// Apply environment variable overrides
	fn apply_env_overrides(config: &mut OracleConfig) {
		if let Ok(url) = std::env::var("DATABASE_URL") {
			debug!("Overriding history database URL from environment");
			config.history.database_url = Some(url);
		}

		// Per-source API keys: ORACLE_API_KEY_<NAME> (uppercased source name)
		for (name, source) in config.sources.iter_mut() {
			let var = format!("ORACLE_API_KEY_{}", name.to_uppercase());
			if let Ok(key) = std::env::var(&var) {
				debug!("Overriding API key for source {} from environment", name);
				source.api_key = Some(key);
			}
		}
	}

	/// Validate configuration
	pub fn validate_config(config: &OracleConfig) -> Result<()> {
		if config.tokens.is_empty() {
			anyhow::bail!("At least one token must be configured");
		}

		if config.enabled_sources().count() == 0 {
			anyhow::bail!("At least one enabled source must be configured");
		}

		for (name, source) in config.enabled_sources() {
			if !SOURCE_KINDS.contains(&source.kind.as_str()) {
				anyhow::bail!("Source '{}' has unknown kind '{}'", name, source.kind);
			}
			if source.endpoint.is_empty() {
				anyhow::bail!("Source '{}' has an empty endpoint", name);
			}
			if source.weight <= Decimal::ZERO {
				anyhow::bail!("Source '{}' must have a positive weight", name);
			}
		}

		if config.merge.quorum == 0 {
			anyhow::bail!("Merge quorum must be at least 1");
		}
		if config.merge.tolerance <= Decimal::ZERO || config.merge.tolerance >= Decimal::ONE {
			anyhow::bail!("Merge tolerance must be in (0, 1)");
		}

		if config.schedule.interval_secs == 0 {
			anyhow::bail!("Schedule interval must be positive");
		}
		if config.schedule.run_deadline_secs < config.fetch.deadline_secs {
			anyhow::bail!("Run deadline must not be shorter than the fetch deadline");
		}

		match config.history.backend.as_str() {
			"postgres" => {
				if config.history.database_url.is_none() {
					anyhow::bail!("History backend 'postgres' requires database_url");
				}
			}
			"memory" => {}
			other => anyhow::bail!("Unknown history backend '{}'", other),
		}

		if config.cache.path.as_os_str().is_empty() {
			anyhow::bail!("Cache path must not be empty");
		}
		if config.cache.write_attempts == 0 {
			anyhow::bail!("Cache write attempts must be at least 1");
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use oracle_types::ChainId;

	const BASE_TOML: &str = r#"
[oracle]
name = "test-oracle"

[schedule]
interval_secs = 60
run_deadline_secs = 120

[fetch]
call_timeout_secs = 10
deadline_secs = 30

[merge]
quorum = 2
tolerance = "0.05"
max_observation_age_secs = 120
staleness_threshold_secs = 300

[cache]
path = "./data/price-cache.json"

[history]
backend = "memory"
max_connections = 5

[[tokens]]
symbol = "uETH"
chain_id = 1
decimals = 18

[[tokens]]
symbol = "uSOL"
chain_id = 0
decimals = 9

[sources.dex_aggregator]
kind = "dex_aggregator"
endpoint = "https://aggregator.example.com"
weight = "1.0"

[sources.market_data]
kind = "market_data"
endpoint = "https://marketdata.example.com"
api_key = "test_key"
weight = "0.5"
"#;

	#[test]
	fn test_toml_parsing() {
		let config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		assert_eq!(config.oracle.name, "test-oracle");
		assert_eq!(config.merge.quorum, 2);
		assert_eq!(config.merge.tolerance, Decimal::new(5, 2));
		assert_eq!(config.tokens.len(), 2);
		assert_eq!(config.sources.len(), 2);

		let tokens = config.tokens();
		assert_eq!(tokens[0].id().key(), "uETH:1");
		assert_eq!(tokens[1].chain, ChainId::NONE);

		let market = config.sources.get("market_data").unwrap();
		assert_eq!(market.weight, Decimal::new(5, 1));
		assert!(market.enabled);
	}

	#[test]
	fn test_defaults_applied() {
		let config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		assert_eq!(config.fetch.retry.max_attempts, 3);
		assert_eq!(config.cache.write_attempts, 3);
		assert_eq!(config.history.backend, "memory");
		let dex = config.sources.get("dex_aggregator").unwrap();
		assert_eq!(dex.weight, Decimal::ONE);
	}

	#[test]
	fn test_validation_passes() {
		let config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		assert!(ConfigLoader::validate_config(&config).is_ok());
	}

	#[test]
	fn test_validation_rejects_empty_tokens() {
		let mut config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		config.tokens.clear();
		let err = ConfigLoader::validate_config(&config).unwrap_err();
		assert!(err.to_string().contains("token"));
	}

	#[test]
	fn test_validation_rejects_unknown_kind() {
		let mut config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		config.sources.get_mut("market_data").unwrap().kind = "carrier_pigeon".to_string();
		let err = ConfigLoader::validate_config(&config).unwrap_err();
		assert!(err.to_string().contains("unknown kind"));
	}

	#[test]
	fn test_validation_rejects_zero_quorum() {
		let mut config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		config.merge.quorum = 0;
		assert!(ConfigLoader::validate_config(&config).is_err());
	}

	#[test]
	fn test_validation_requires_database_url_for_postgres() {
		let mut config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		config.history.backend = "postgres".to_string();
		config.history.database_url = None;
		let err = ConfigLoader::validate_config(&config).unwrap_err();
		assert!(err.to_string().contains("database_url"));
	}

	#[test]
	fn test_disabled_sources_do_not_count() {
		let mut config = ConfigLoader::from_toml(BASE_TOML).unwrap();
		for source in config.sources.values_mut() {
			source.enabled = false;
		}
		assert!(ConfigLoader::validate_config(&config).is_err());
	}

	#[test]
	fn test_json_parsing() {
		let json = r#"{
			"oracle": { "name": "test-oracle" },
			"cache": { "path": "./data/price-cache.json" },
			"tokens": [
				{ "symbol": "uETH", "chain_id": 1, "decimals": 18 }
			],
			"sources": {
				"chain_feed": {
					"kind": "chain_feed",
					"endpoint": "https://feed.example.com"
				}
			}
		}"#;

		let config = ConfigLoader::from_json(json).unwrap();
		assert_eq!(config.oracle.name, "test-oracle");
		assert_eq!(config.schedule.interval_secs, 60);
		assert!(ConfigLoader::validate_config(&config).is_ok());
	}
}
