//! Configuration types for the oracle pipeline.

use oracle_types::{ChainId, Token};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Complete oracle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
	/// Service identity
	pub oracle: OracleSettings,
	/// Recurring run schedule
	#[serde(default)]
	pub schedule: ScheduleConfig,
	/// Fetch phase timeouts and retry policy
	#[serde(default)]
	pub fetch: FetchConfig,
	/// Merge engine thresholds
	#[serde(default)]
	pub merge: MergeSettings,
	/// Cache snapshot settings
	pub cache: CacheConfig,
	/// Durable history store settings
	#[serde(default)]
	pub history: HistoryConfig,
	/// Static token list
	pub tokens: Vec<TokenConfig>,
	/// Upstream price sources by name
	pub sources: HashMap<String, SourceConfig>,
}

impl OracleConfig {
	/// Materialize the static token list.
	pub fn tokens(&self) -> Vec<Token> {
		self.tokens
			.iter()
			.map(|t| Token::new(t.symbol.clone(), ChainId(t.chain_id), t.decimals))
			.collect()
	}

	/// Names of sources that are enabled.
	pub fn enabled_sources(&self) -> impl Iterator<Item = (&String, &SourceConfig)> {
		self.sources.iter().filter(|(_, s)| s.enabled)
	}
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleSettings {
	/// Name used in logs
	pub name: String,
}

/// Recurring run schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
	/// Interval between scheduled runs in seconds
	pub interval_secs: u64,
	/// Outer deadline for a whole run in seconds
	pub run_deadline_secs: u64,
}

impl Default for ScheduleConfig {
	fn default() -> Self {
		Self {
			interval_secs: 60,
			run_deadline_secs: 120,
		}
	}
}

impl ScheduleConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_secs)
	}

	pub fn run_deadline(&self) -> Duration {
		Duration::from_secs(self.run_deadline_secs)
	}
}

/// Fetch phase configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
	/// Per-adapter-call timeout in seconds
	pub call_timeout_secs: u64,
	/// Global deadline for the whole fetch phase in seconds; sources
	/// that have not responded by then are treated as failed
	pub deadline_secs: u64,
	/// Per-source retry policy on transient failure
	#[serde(default)]
	pub retry: RetryPolicy,
}

impl Default for FetchConfig {
	fn default() -> Self {
		Self {
			call_timeout_secs: 10,
			deadline_secs: 30,
			retry: RetryPolicy::default(),
		}
	}
}

impl FetchConfig {
	pub fn call_timeout(&self) -> Duration {
		Duration::from_secs(self.call_timeout_secs)
	}

	pub fn deadline(&self) -> Duration {
		Duration::from_secs(self.deadline_secs)
	}
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub initial_delay_ms: u64,
	pub max_delay_ms: u64,
	pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay_ms: 500,
			max_delay_ms: 10_000,
			backoff_multiplier: 2.0,
		}
	}
}

/// Merge engine thresholds.
///
/// Defaults: tolerance 5%, quorum 2. Both are assumptions exposed as
/// configuration rather than hard-coded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MergeSettings {
	/// Minimum contributing sources for a non-stale price
	pub quorum: usize,
	/// Maximum relative deviation from the median before an
	/// observation is excluded as an outlier (0.05 = 5%)
	pub tolerance: Decimal,
	/// Observations older than this are discarded before merging
	pub max_observation_age_secs: u64,
	/// A merged price is stale when its freshest contributing
	/// observation is older than this
	pub staleness_threshold_secs: u64,
}

impl Default for MergeSettings {
	fn default() -> Self {
		Self {
			quorum: 2,
			tolerance: Decimal::new(5, 2),
			max_observation_age_secs: 120,
			staleness_threshold_secs: 300,
		}
	}
}

/// Cache snapshot configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
	/// Filesystem path of the snapshot file
	pub path: PathBuf,
	/// Bounded retry attempts for the hot-path cache write
	#[serde(default = "default_cache_write_attempts")]
	pub write_attempts: u32,
}

fn default_cache_write_attempts() -> u32 {
	3
}

/// Durable history store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
	/// Backend: "postgres" or "memory"
	pub backend: String,
	/// Connection string for the postgres backend
	pub database_url: Option<String>,
	/// Connection pool size
	pub max_connections: u32,
	/// Retry policy for history appends
	#[serde(default)]
	pub retry: RetryPolicy,
}

impl Default for HistoryConfig {
	fn default() -> Self {
		Self {
			backend: "memory".to_string(),
			database_url: None,
			max_connections: 5,
			retry: RetryPolicy::default(),
		}
	}
}

/// One token from the static list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
	pub symbol: String,
	/// Numeric chain id, 0 for chains without one
	pub chain_id: u64,
	pub decimals: u32,
}

/// One upstream price source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
	/// Adapter kind: "dex_aggregator", "market_data" or "chain_feed"
	pub kind: String,
	/// Base URL of the upstream API
	pub endpoint: String,
	/// Optional API key sent with requests
	pub api_key: Option<String>,
	/// Trust weight used by the weighted median, default 1
	#[serde(default = "default_weight")]
	pub weight: Decimal,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
}

fn default_weight() -> Decimal {
	Decimal::ONE
}

fn default_enabled() -> bool {
	true
}
