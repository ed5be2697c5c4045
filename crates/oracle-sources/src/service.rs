//! Fan-out fetch service over all enabled price sources.
//!
//! Each run spawns one task per source. Sources are retried independently
//! with exponential backoff on transient failure; a source that exhausts
//! its retries contributes zero observations without aborting the run,
//! and no source may hold the run past the global fetch deadline. Tasks
//! share no mutable state and communicate only via returned results.

use crate::{create_source, PriceSource, SourceError};
use backoff::{future::retry, ExponentialBackoff};
use oracle_config::{OracleConfig, RetryPolicy};
use oracle_types::{PriceObservation, SourceOutcome, Token, TokenId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Result of one fetch phase: everything gathered plus how each source
/// behaved.
#[derive(Debug)]
pub struct FetchReport {
	pub observations: Vec<PriceObservation>,
	pub sources: BTreeMap<String, SourceOutcome>,
}

/// Fan-out fetch orchestration over registered sources.
pub struct SourceService {
	sources: Vec<Arc<dyn PriceSource>>,
	call_timeout: Duration,
	deadline: Duration,
	retry: RetryPolicy,
}

impl SourceService {
	pub fn new(call_timeout: Duration, deadline: Duration, retry: RetryPolicy) -> Self {
		Self {
			sources: Vec::new(),
			call_timeout,
			deadline,
			retry,
		}
	}

	/// Build the service with every enabled source from configuration.
	pub fn from_config(config: &OracleConfig) -> Result<Self, SourceError> {
		let mut service = Self::new(
			config.fetch.call_timeout(),
			config.fetch.deadline(),
			config.fetch.retry.clone(),
		);
		for (name, source_config) in config.enabled_sources() {
			service = service.with_source(create_source(name, source_config)?);
		}
		Ok(service)
	}

	pub fn with_source(mut self, source: Arc<dyn PriceSource>) -> Self {
		self.sources.push(source);
		self
	}

	/// Fetch from all sources concurrently.
	///
	/// Returns once every source has completed or exhausted its retries,
	/// or when the global deadline expires — whichever comes first.
	/// Sources still outstanding at the deadline are aborted and
	/// reported as failed.
	pub async fn fetch_all(&self, tokens: &[Token]) -> FetchReport {
		// Every source starts out failed; completion overwrites.
		let mut outcomes: BTreeMap<String, SourceOutcome> = self
			.sources
			.iter()
			.map(|s| (s.id().0, SourceOutcome::Failed))
			.collect();
		let mut observations = Vec::new();

		let mut tasks = JoinSet::new();
		for source in &self.sources {
			let source = source.clone();
			let tokens = tokens.to_vec();
			let call_timeout = self.call_timeout;
			let policy = self.retry.clone();
			tasks.spawn(async move {
				let id = source.id();
				let (outcome, observations) =
					Self::fetch_with_retry(source, &tokens, call_timeout, &policy).await;
				(id, outcome, observations)
			});
		}

		let deadline = tokio::time::sleep(self.deadline);
		tokio::pin!(deadline);

		loop {
			tokio::select! {
				joined = tasks.join_next() => match joined {
					Some(Ok((id, outcome, mut obs))) => {
						outcomes.insert(id.0, outcome);
						observations.append(&mut obs);
					}
					Some(Err(e)) => warn!("Fetch task failed to join: {}", e),
					None => break,
				},
				_ = &mut deadline => {
					warn!(
						"Fetch deadline reached with {} sources outstanding",
						tasks.len()
					);
					tasks.abort_all();
					break;
				}
			}
		}

		debug!(
			"Fetch phase gathered {} observations from {} sources",
			observations.len(),
			self.sources.len()
		);
		FetchReport {
			observations,
			sources: outcomes,
		}
	}

	/// One source's fetch with per-source exponential backoff.
	async fn fetch_with_retry(
		source: Arc<dyn PriceSource>,
		tokens: &[Token],
		call_timeout: Duration,
		policy: &RetryPolicy,
	) -> (SourceOutcome, Vec<PriceObservation>) {
		let id = source.id();
		// Shared with the retry future, which must stay Send for the
		// spawned task.
		let attempts = AtomicU32::new(0);
		let max_attempts = policy.max_attempts.max(1);
		let backoff = ExponentialBackoff {
			initial_interval: Duration::from_millis(policy.initial_delay_ms),
			max_interval: Duration::from_millis(policy.max_delay_ms),
			multiplier: policy.backoff_multiplier,
			max_elapsed_time: None,
			..Default::default()
		};

		let result = retry(backoff, || {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
			let source = source.clone();
			let tokens = tokens.to_vec();
			async move {
				let outcome =
					tokio::time::timeout(call_timeout, source.fetch(&tokens, call_timeout)).await;
				let error = match outcome {
					Ok(Ok(observations)) => return Ok(observations),
					Ok(Err(e)) => e,
					Err(_) => SourceError::Unavailable(format!(
						"call exceeded timeout of {:?}",
						call_timeout
					)),
				};

				if attempt >= max_attempts {
					Err(backoff::Error::permanent(error))
				} else {
					warn!(
						"Source {} attempt {}/{} failed: {}",
						source.id(),
						attempt,
						max_attempts,
						error
					);
					Err(backoff::Error::transient(error))
				}
			}
		})
		.await;

		match result {
			Ok(observations) => {
				let covered: HashSet<TokenId> =
					observations.iter().map(|o| o.token.clone()).collect();
				let full_coverage = tokens.iter().all(|t| covered.contains(&t.id()));
				let outcome = if attempts.load(Ordering::SeqCst) > 1 || !full_coverage {
					SourceOutcome::Degraded
				} else {
					SourceOutcome::Ok
				};
				(outcome, observations)
			}
			Err(e) => {
				warn!("Source {} exhausted retries: {}", id, e);
				(SourceOutcome::Failed, Vec::new())
			}
		}
	}
}
