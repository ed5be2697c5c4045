//! The fetch → merge → persist pipeline.
//!
//! One [`Pipeline::run`] call executes a complete cycle: fan-out fetch
//! over all sources, per-token weighted-median merge, then persistence to
//! the cache snapshot and the durable history store in parallel. Failures
//! are contained at the smallest possible scope — a failed source, a
//! diverged token or a failed persistence target degrades the run but
//! never aborts it. The run only errors outright when it would otherwise
//! publish nothing at all.

use crate::error::PipelineError;
use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use oracle_cache::CacheStore;
use oracle_config::{OracleConfig, RetryPolicy};
use oracle_history::{HistoryStore, MemoryHistory, PostgresHistory};
use oracle_merge::{group_observations, MergeEngine, MergeError};
use oracle_sources::SourceService;
use oracle_types::{
	CacheSnapshot, PriceHistoryRecord, RunId, RunOutcome, RunState, SourceId, Token, TokenOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay between bounded cache write attempts.
const CACHE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Build the configured history backend.
pub async fn create_history_store(
	config: &OracleConfig,
) -> Result<Arc<dyn HistoryStore>, PipelineError> {
	match config.history.backend.as_str() {
		"memory" => Ok(Arc::new(MemoryHistory::new())),
		"postgres" => {
			let url = config.history.database_url.as_deref().ok_or_else(|| {
				PipelineError::Configuration(
					"postgres history backend requires database_url".to_string(),
				)
			})?;
			let store = PostgresHistory::connect(url, config.history.max_connections)
				.await
				.map_err(|e| PipelineError::History(e.to_string()))?;
			store
				.ensure_schema()
				.await
				.map_err(|e| PipelineError::History(e.to_string()))?;
			Ok(Arc::new(store))
		}
		other => Err(PipelineError::Configuration(format!(
			"Unknown history backend '{}'",
			other
		))),
	}
}

/// Build the merge engine with thresholds and per-source trust weights
/// from configuration.
pub fn create_merge_engine(config: &OracleConfig) -> MergeEngine {
	let mut engine = MergeEngine::new(
		config.merge.quorum,
		config.merge.tolerance,
		Duration::from_secs(config.merge.max_observation_age_secs),
		Duration::from_secs(config.merge.staleness_threshold_secs),
	);
	for (name, source) in config.enabled_sources() {
		engine = engine.with_source_weight(SourceId::new(name.as_str()), source.weight);
	}
	engine
}

/// Orchestrator for one token set over one set of sources and stores.
pub struct Pipeline {
	sources: SourceService,
	merge: MergeEngine,
	cache: Arc<dyn CacheStore>,
	history: Arc<dyn HistoryStore>,
	tokens: Vec<Token>,
	cache_write_attempts: u32,
	history_retry: RetryPolicy,
	state: RwLock<RunState>,
}

impl Pipeline {
	pub fn new(
		sources: SourceService,
		merge: MergeEngine,
		cache: Arc<dyn CacheStore>,
		history: Arc<dyn HistoryStore>,
		tokens: Vec<Token>,
	) -> Self {
		Self {
			sources,
			merge,
			cache,
			history,
			tokens,
			cache_write_attempts: 3,
			history_retry: RetryPolicy::default(),
			state: RwLock::new(RunState::Idle),
		}
	}

	/// Wire the whole pipeline from configuration.
	pub async fn from_config(
		config: &OracleConfig,
		cache: Arc<dyn CacheStore>,
	) -> Result<Self, PipelineError> {
		let sources =
			SourceService::from_config(config).map_err(|e| PipelineError::Source(e.to_string()))?;
		let history = create_history_store(config).await?;

		let mut pipeline = Self::new(
			sources,
			create_merge_engine(config),
			cache,
			history,
			config.tokens(),
		);
		pipeline.cache_write_attempts = config.cache.write_attempts;
		pipeline.history_retry = config.history.retry.clone();
		Ok(pipeline)
	}

	pub fn with_cache_write_attempts(mut self, attempts: u32) -> Self {
		self.cache_write_attempts = attempts;
		self
	}

	pub fn with_history_retry(mut self, retry: RetryPolicy) -> Self {
		self.history_retry = retry;
		self
	}

	/// Current position in the run state machine.
	pub async fn state(&self) -> RunState {
		*self.state.read().await
	}

	async fn set_state(&self, run_id: RunId, state: RunState) {
		debug!("Run {} entering state {}", run_id, state);
		*self.state.write().await = state;
	}

	/// Execute one full fetch → merge → persist cycle.
	pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
		let run_id: RunId = Uuid::new_v4();
		let started_at = Utc::now();
		info!("Run {} started for {} tokens", run_id, self.tokens.len());

		// Fetch. The prior snapshot is read up front so carry-forward
		// still works when the cache backend degrades mid-run.
		self.set_state(run_id, RunState::Fetching).await;
		let prior = match self.cache.read().await {
			Ok(snapshot) => Some(snapshot),
			Err(e) => {
				debug!("No prior snapshot: {}", e);
				None
			}
		};
		let report = self.sources.fetch_all(&self.tokens).await;

		// Merge. A single timestamp versions the whole snapshot.
		self.set_state(run_id, RunState::Merging).await;
		let now = Utc::now();
		let mut grouped = group_observations(report.observations);
		let mut snapshot = CacheSnapshot::new(now);
		let mut records: Vec<PriceHistoryRecord> = Vec::new();
		let mut tokens = std::collections::BTreeMap::new();

		for token in &self.tokens {
			let id = token.id();
			let observations = grouped.remove(&id).unwrap_or_default();

			let merged = match self.merge.merge_token(&id, &observations, now) {
				Ok(merged) => merged,
				Err(MergeError::Divergence {
					observations,
					tolerance,
					..
				}) => {
					// Divergence is contained to the token: fall back to
					// carry-forward as if no fresh data had arrived.
					warn!(
						"Run {}: {} observations for {} diverge beyond tolerance {}, keeping prior value",
						run_id, observations, id, tolerance
					);
					None
				}
			};

			let outcome = match merged {
				Some(price) => {
					let outcome = if price.stale {
						TokenOutcome::Stale
					} else {
						TokenOutcome::Priced
					};
					records.push(PriceHistoryRecord::from(&price));
					snapshot.insert(price);
					outcome
				}
				None => match prior.as_ref().and_then(|p| p.get(&id)) {
					Some(prior_price) => {
						// Carried forward under its original timestamp,
						// flagged stale.
						snapshot.insert(prior_price.as_stale());
						TokenOutcome::Stale
					}
					None => TokenOutcome::Missing,
				},
			};
			tokens.insert(id.key(), outcome);
		}

		if snapshot.is_empty() {
			self.set_state(run_id, RunState::Idle).await;
			return Err(PipelineError::NoPriceData);
		}

		// Persist. The two targets are independent: a failed history
		// append never rolls back a successful cache write.
		self.set_state(run_id, RunState::Persisting).await;
		let (cache_persisted, history_persisted) =
			tokio::join!(self.write_cache(&snapshot), self.append_history(&records));

		self.set_state(run_id, RunState::Completed).await;
		let outcome = RunOutcome {
			run_id,
			started_at,
			snapshot_version: now,
			tokens,
			sources: report.sources,
			cache_persisted,
			history_persisted,
		};
		if outcome.degraded() {
			warn!("Run completed degraded: {}", outcome.summary());
		} else {
			info!("{}", outcome.summary());
		}
		self.set_state(run_id, RunState::Idle).await;
		Ok(outcome)
	}

	/// Hot-path cache write with a small bounded retry budget.
	async fn write_cache(&self, snapshot: &CacheSnapshot) -> bool {
		let attempts = self.cache_write_attempts.max(1);
		for attempt in 1..=attempts {
			match self.cache.write(snapshot).await {
				Ok(()) => return true,
				Err(e) => warn!("Cache write attempt {}/{} failed: {}", attempt, attempts, e),
			}
			if attempt < attempts {
				tokio::time::sleep(CACHE_RETRY_DELAY).await;
			}
		}
		false
	}

	/// Best-effort history append with exponential backoff. Appends are
	/// idempotent per `(token, recorded_at)`, so retrying after an
	/// ambiguous failure is safe.
	async fn append_history(&self, records: &[PriceHistoryRecord]) -> bool {
		if records.is_empty() {
			return true;
		}

		// Shared with the retry future, which must stay Send because the
		// run is awaited inside spawned scheduler tasks.
		let attempts = AtomicU32::new(0);
		let max_attempts = self.history_retry.max_attempts.max(1);
		let backoff = ExponentialBackoff {
			initial_interval: Duration::from_millis(self.history_retry.initial_delay_ms),
			max_interval: Duration::from_millis(self.history_retry.max_delay_ms),
			multiplier: self.history_retry.backoff_multiplier,
			max_elapsed_time: None,
			..Default::default()
		};

		let result = retry(backoff, || {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
			let history = self.history.clone();
			async move {
				match history.append(records).await {
					Ok(()) => Ok(()),
					Err(e) if attempt >= max_attempts => Err(backoff::Error::permanent(e)),
					Err(e) => {
						warn!(
							"History append attempt {}/{} failed: {}",
							attempt, max_attempts, e
						);
						Err(backoff::Error::transient(e))
					}
				}
			}
		})
		.await;

		match result {
			Ok(()) => true,
			Err(e) => {
				warn!("History append exhausted retries: {}", e);
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use oracle_cache::{CacheError, FileCache};
	use oracle_history::HistoryError;
	use oracle_sources::{PriceSource, SourceError};
	use oracle_types::{CanonicalPrice, ChainId, PriceObservation, SourceOutcome, TokenId};
	use rust_decimal::Decimal;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn tokens() -> Vec<Token> {
		vec![
			Token::new("uETH", ChainId(1), 18),
			Token::new("uSOL", ChainId::NONE, 9),
		]
	}

	fn fast_retry() -> RetryPolicy {
		RetryPolicy {
			max_attempts: 2,
			initial_delay_ms: 1,
			max_delay_ms: 5,
			backoff_multiplier: 1.5,
		}
	}

	/// Source serving fixed prices for every requested token.
	struct StaticSource {
		id: SourceId,
		prices: HashMap<String, Decimal>,
	}

	impl StaticSource {
		fn new(name: &str, prices: &[(&str, i64)]) -> Arc<Self> {
			Arc::new(Self {
				id: SourceId::new(name),
				prices: prices
					.iter()
					.map(|(key, price)| (key.to_string(), Decimal::from(*price)))
					.collect(),
			})
		}
	}

	#[async_trait]
	impl PriceSource for StaticSource {
		fn id(&self) -> SourceId {
			self.id.clone()
		}

		async fn fetch(
			&self,
			tokens: &[Token],
			_timeout: Duration,
		) -> Result<Vec<PriceObservation>, SourceError> {
			Ok(tokens
				.iter()
				.filter_map(|t| {
					self.prices.get(&t.id().key()).map(|price| PriceObservation {
						token: t.id(),
						price: *price,
						source: self.id.clone(),
						observed_at: Utc::now(),
						weight: None,
					})
				})
				.collect())
		}
	}

	/// Source that always fails.
	struct DownSource;

	#[async_trait]
	impl PriceSource for DownSource {
		fn id(&self) -> SourceId {
			SourceId::new("down")
		}

		async fn fetch(
			&self,
			_tokens: &[Token],
			_timeout: Duration,
		) -> Result<Vec<PriceObservation>, SourceError> {
			Err(SourceError::Unavailable("down".to_string()))
		}
	}

	/// History store whose appends always fail.
	#[derive(Default)]
	struct BrokenHistory {
		attempts: AtomicU32,
	}

	#[async_trait]
	impl HistoryStore for BrokenHistory {
		async fn append(&self, _records: &[PriceHistoryRecord]) -> Result<(), HistoryError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			Err(HistoryError::Backend("database unreachable".to_string()))
		}

		async fn latest(&self, _token: &TokenId) -> Result<CanonicalPrice, HistoryError> {
			Err(HistoryError::NotFound)
		}

		async fn history(
			&self,
			_token: &TokenId,
			_from: chrono::DateTime<Utc>,
			_to: chrono::DateTime<Utc>,
		) -> Result<Vec<PriceHistoryRecord>, HistoryError> {
			Err(HistoryError::NotFound)
		}
	}

	/// Cache whose writes always fail.
	struct BrokenCache;

	#[async_trait]
	impl CacheStore for BrokenCache {
		async fn read(&self) -> Result<CacheSnapshot, CacheError> {
			Err(CacheError::NotFound)
		}

		async fn write(&self, _snapshot: &CacheSnapshot) -> Result<(), CacheError> {
			Err(CacheError::Backend("disk full".to_string()))
		}
	}

	fn service_with(sources: Vec<Arc<dyn PriceSource>>) -> SourceService {
		let mut service = SourceService::new(
			Duration::from_millis(200),
			Duration::from_secs(5),
			fast_retry(),
		);
		for source in sources {
			service = service.with_source(source);
		}
		service
	}

	fn merge_engine() -> MergeEngine {
		MergeEngine::new(
			2,
			Decimal::new(5, 2),
			Duration::from_secs(120),
			Duration::from_secs(300),
		)
	}

	fn file_cache(dir: &tempfile::TempDir) -> Arc<FileCache> {
		Arc::new(FileCache::new(dir.path().join("snapshot.json")))
	}

	#[tokio::test]
	async fn test_full_run_persists_cache_and_history() {
		let dir = tempfile::tempdir().unwrap();
		let cache = file_cache(&dir);
		let history = Arc::new(MemoryHistory::new());
		let pipeline = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500), ("uSOL:0", 21)]),
				StaticSource::new("b", &[("uETH:1", 2502), ("uSOL:0", 21)]),
			]),
			merge_engine(),
			cache.clone(),
			history.clone(),
			tokens(),
		)
		.with_history_retry(fast_retry());

		let outcome = pipeline.run().await.unwrap();

		assert_eq!(outcome.count(TokenOutcome::Priced), 2);
		assert!(outcome.cache_persisted);
		assert!(outcome.history_persisted);
		assert!(!outcome.degraded());

		let snapshot = cache.read().await.unwrap();
		let eth = snapshot.get(&TokenId::new("uETH", ChainId(1))).unwrap();
		assert_eq!(eth.price, Decimal::from(2501));
		assert!(!eth.stale);
		assert_eq!(eth.sources.len(), 2);

		assert_eq!(history.record_count().await, 2);
		assert_eq!(pipeline.state().await, RunState::Idle);
	}

	#[tokio::test]
	async fn test_single_source_below_quorum_is_stale() {
		let dir = tempfile::tempdir().unwrap();
		let pipeline = Pipeline::new(
			service_with(vec![StaticSource::new("only", &[("uETH:1", 2500)])]),
			merge_engine(),
			file_cache(&dir),
			Arc::new(MemoryHistory::new()),
			vec![Token::new("uETH", ChainId(1), 18)],
		);

		let outcome = pipeline.run().await.unwrap();
		assert_eq!(
			outcome.token_outcome(&TokenId::new("uETH", ChainId(1))),
			Some(TokenOutcome::Stale)
		);
	}

	#[tokio::test]
	async fn test_all_sources_down_carries_prior_snapshot_forward() {
		let dir = tempfile::tempdir().unwrap();
		let cache = file_cache(&dir);
		let history = Arc::new(MemoryHistory::new());

		// First run seeds the cache.
		let seeded = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500)]),
				StaticSource::new("b", &[("uETH:1", 2502)]),
			]),
			merge_engine(),
			cache.clone(),
			history.clone(),
			vec![Token::new("uETH", ChainId(1), 18)],
		);
		seeded.run().await.unwrap();
		let rows_after_seed = history.record_count().await;

		// Second run with everything down serves the prior value stale.
		let degraded = Pipeline::new(
			service_with(vec![Arc::new(DownSource)]),
			merge_engine(),
			cache.clone(),
			history.clone(),
			vec![Token::new("uETH", ChainId(1), 18)],
		)
		.with_history_retry(fast_retry());
		let outcome = degraded.run().await.unwrap();

		assert_eq!(
			outcome.token_outcome(&TokenId::new("uETH", ChainId(1))),
			Some(TokenOutcome::Stale)
		);
		assert_eq!(outcome.sources.get("down"), Some(&SourceOutcome::Failed));

		let snapshot = cache.read().await.unwrap();
		let eth = snapshot.get(&TokenId::new("uETH", ChainId(1))).unwrap();
		assert!(eth.stale);
		assert_eq!(eth.price, Decimal::from(2501));

		// Carried-forward values are not re-appended as new history rows.
		assert_eq!(history.record_count().await, rows_after_seed);
	}

	#[tokio::test]
	async fn test_nothing_to_publish_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let pipeline = Pipeline::new(
			service_with(vec![Arc::new(DownSource)]),
			merge_engine(),
			file_cache(&dir),
			Arc::new(MemoryHistory::new()),
			tokens(),
		);

		let result = pipeline.run().await;
		assert!(matches!(result, Err(PipelineError::NoPriceData)));
		assert_eq!(pipeline.state().await, RunState::Idle);
	}

	#[tokio::test]
	async fn test_history_failure_does_not_roll_back_cache() {
		let dir = tempfile::tempdir().unwrap();
		let cache = file_cache(&dir);
		let broken = Arc::new(BrokenHistory::default());
		let pipeline = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500)]),
				StaticSource::new("b", &[("uETH:1", 2502)]),
			]),
			merge_engine(),
			cache.clone(),
			broken.clone(),
			vec![Token::new("uETH", ChainId(1), 18)],
		)
		.with_history_retry(fast_retry());

		let outcome = pipeline.run().await.unwrap();

		assert!(outcome.cache_persisted);
		assert!(!outcome.history_persisted);
		assert!(outcome.degraded());
		// Exhausted the configured retry budget.
		assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
		// Snapshot still readable and fresh.
		assert!(cache.read().await.is_ok());
	}

	#[tokio::test]
	async fn test_run_inside_spawned_task_with_history_retries() {
		let dir = tempfile::tempdir().unwrap();
		let cache = file_cache(&dir);
		let broken = Arc::new(BrokenHistory::default());
		// Failing appends keep a retry future in flight; the run must
		// stay Send to be awaited inside a spawned task, as the
		// scheduler does.
		let pipeline = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500)]),
				StaticSource::new("b", &[("uETH:1", 2502)]),
			]),
			merge_engine(),
			cache,
			broken.clone(),
			vec![Token::new("uETH", ChainId(1), 18)],
		)
		.with_history_retry(fast_retry());

		let outcome = tokio::spawn(async move { pipeline.run().await })
			.await
			.unwrap()
			.unwrap();

		assert!(outcome.cache_persisted);
		assert!(!outcome.history_persisted);
		assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_cache_failure_still_appends_history() {
		let history = Arc::new(MemoryHistory::new());
		let pipeline = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500)]),
				StaticSource::new("b", &[("uETH:1", 2502)]),
			]),
			merge_engine(),
			Arc::new(BrokenCache),
			history.clone(),
			vec![Token::new("uETH", ChainId(1), 18)],
		)
		.with_cache_write_attempts(2);

		let outcome = pipeline.run().await.unwrap();

		assert!(!outcome.cache_persisted);
		assert!(outcome.history_persisted);
		assert!(outcome.degraded());
		assert_eq!(history.record_count().await, 1);
	}

	#[tokio::test]
	async fn test_diverged_token_does_not_poison_others() {
		let dir = tempfile::tempdir().unwrap();
		let cache = file_cache(&dir);
		// uETH quotes agree; uSOL quotes are 100 vs 200, hopeless.
		let pipeline = Pipeline::new(
			service_with(vec![
				StaticSource::new("a", &[("uETH:1", 2500), ("uSOL:0", 100)]),
				StaticSource::new("b", &[("uETH:1", 2502), ("uSOL:0", 200)]),
			]),
			merge_engine(),
			cache.clone(),
			Arc::new(MemoryHistory::new()),
			tokens(),
		);

		let outcome = pipeline.run().await.unwrap();

		assert_eq!(
			outcome.token_outcome(&TokenId::new("uETH", ChainId(1))),
			Some(TokenOutcome::Priced)
		);
		// No prior snapshot to fall back on for the diverged token.
		assert_eq!(
			outcome.token_outcome(&TokenId::new("uSOL", ChainId::NONE)),
			Some(TokenOutcome::Missing)
		);
		assert!(cache
			.read()
			.await
			.unwrap()
			.get(&TokenId::new("uSOL", ChainId::NONE))
			.is_none());
	}
}
