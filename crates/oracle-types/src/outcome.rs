//! Per-run outcome reporting.
//!
//! A run never surfaces a single opaque error for contained failures;
//! operators get a structured summary of what happened per token, per
//! source and per persistence target.

use crate::tokens::TokenId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one fetch→merge→persist execution.
pub type RunId = Uuid;

/// States of the pipeline run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
	Idle,
	Fetching,
	Merging,
	Persisting,
	Completed,
}

impl fmt::Display for RunState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			RunState::Idle => "idle",
			RunState::Fetching => "fetching",
			RunState::Merging => "merging",
			RunState::Persisting => "persisting",
			RunState::Completed => "completed",
		};
		write!(f, "{}", name)
	}
}

/// What a run produced for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenOutcome {
	/// Fresh canonical price produced this run.
	Priced,
	/// Served from this run or a prior snapshot with the stale flag set.
	Stale,
	/// No fresh observations and no prior cached value.
	Missing,
}

/// How one source behaved during the fetch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceOutcome {
	/// Responded on the first attempt with full coverage.
	Ok,
	/// Responded, but only after retries or with partial coverage.
	Degraded,
	/// Exhausted retries or missed the fetch deadline.
	Failed,
}

/// Terminal result of a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
	pub run_id: RunId,
	pub started_at: DateTime<Utc>,
	/// Version (merge timestamp) of the snapshot this run produced.
	pub snapshot_version: DateTime<Utc>,
	/// Outcome per token, keyed by [`TokenId::key`].
	pub tokens: BTreeMap<String, TokenOutcome>,
	/// Outcome per configured source.
	pub sources: BTreeMap<String, SourceOutcome>,
	/// Whether the cache snapshot write succeeded.
	pub cache_persisted: bool,
	/// Whether the history append succeeded.
	pub history_persisted: bool,
}

impl RunOutcome {
	/// A run completes degraded when either persistence target failed.
	pub fn degraded(&self) -> bool {
		!self.cache_persisted || !self.history_persisted
	}

	pub fn token_outcome(&self, token: &TokenId) -> Option<TokenOutcome> {
		self.tokens.get(&token.key()).copied()
	}

	pub fn count(&self, outcome: TokenOutcome) -> usize {
		self.tokens.values().filter(|o| **o == outcome).count()
	}

	/// One-line operator summary for run-completion logging.
	pub fn summary(&self) -> String {
		format!(
			"run {}: {} priced, {} stale, {} missing; sources ok/degraded/failed {}/{}/{}; cache {} history {}",
			self.run_id,
			self.count(TokenOutcome::Priced),
			self.count(TokenOutcome::Stale),
			self.count(TokenOutcome::Missing),
			self.sources
				.values()
				.filter(|o| **o == SourceOutcome::Ok)
				.count(),
			self.sources
				.values()
				.filter(|o| **o == SourceOutcome::Degraded)
				.count(),
			self.sources
				.values()
				.filter(|o| **o == SourceOutcome::Failed)
				.count(),
			if self.cache_persisted { "ok" } else { "FAILED" },
			if self.history_persisted { "ok" } else { "FAILED" },
		)
	}
}
