//! Merge engine: reconciles per-source price observations into one
//! canonical price per token.
//!
//! The engine is pure and deterministic. Identical observation sets always
//! yield an identical `CanonicalPrice`, including the contributing-source
//! set, so the orchestrator may retry the merge step independently of the
//! fetch step. The merge timestamp is an explicit input for the same
//! reason.
//!
//! The canonical price is a weighted median rather than a mean so a single
//! outlier source has bounded influence; observations deviating from the
//! first-pass median beyond a configured tolerance are excluded and the
//! median recomputed once over the survivors.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use oracle_types::{CanonicalPrice, PriceObservation, SourceId, TokenId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// Errors from the merge step.
///
/// Divergence is contained per token by the orchestrator; it never aborts
/// a run on its own.
#[derive(Debug, Error)]
pub enum MergeError {
	/// Observations were present but none survived the tolerance check
	/// against the first-pass median.
	#[error("{observations} observations for {token} diverge beyond tolerance {tolerance}")]
	Divergence {
		token: TokenId,
		observations: usize,
		tolerance: Decimal,
	},
}

/// Deterministic per-token price reconciliation.
#[derive(Debug, Clone)]
pub struct MergeEngine {
	quorum: usize,
	tolerance: Decimal,
	max_observation_age: ChronoDuration,
	staleness_threshold: ChronoDuration,
	/// Per-source trust weights; sources not listed weigh 1.
	weights: BTreeMap<SourceId, Decimal>,
}

impl MergeEngine {
	pub fn new(
		quorum: usize,
		tolerance: Decimal,
		max_observation_age: Duration,
		staleness_threshold: Duration,
	) -> Self {
		Self {
			quorum,
			tolerance,
			max_observation_age: ChronoDuration::from_std(max_observation_age)
				.unwrap_or(ChronoDuration::MAX),
			staleness_threshold: ChronoDuration::from_std(staleness_threshold)
				.unwrap_or(ChronoDuration::MAX),
			weights: BTreeMap::new(),
		}
	}

	/// Set the configured trust weight for a source.
	pub fn with_source_weight(mut self, source: SourceId, weight: Decimal) -> Self {
		self.weights.insert(source, weight);
		self
	}

	/// Merge one token's observations gathered in a single run.
	///
	/// Returns `Ok(None)` when no fresh observation remains — the caller
	/// keeps the prior cached value for the token in that case.
	pub fn merge_token(
		&self,
		token: &TokenId,
		observations: &[PriceObservation],
		now: DateTime<Utc>,
	) -> Result<Option<CanonicalPrice>, MergeError> {
		let mut fresh: Vec<&PriceObservation> = observations
			.iter()
			.filter(|o| o.token == *token)
			.filter(|o| o.price > Decimal::ZERO)
			.filter(|o| now - o.observed_at <= self.max_observation_age)
			.collect();

		if fresh.is_empty() {
			return Ok(None);
		}

		// Deterministic order regardless of fetch completion order.
		fresh.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.source.cmp(&b.source)));

		if fresh.len() == 1 {
			let obs = fresh[0];
			let stale = self.quorum > 1 || self.is_aged(obs.observed_at, now);
			return Ok(Some(CanonicalPrice {
				token: token.clone(),
				price: obs.price,
				sources: BTreeSet::from([obs.source.clone()]),
				merged_at: now,
				stale,
			}));
		}

		let first_pass = self.weighted_median(&fresh);
		let accepted: Vec<&PriceObservation> = fresh
			.iter()
			.filter(|o| self.within_tolerance(o.price, first_pass))
			.copied()
			.collect();

		if accepted.is_empty() {
			return Err(MergeError::Divergence {
				token: token.clone(),
				observations: fresh.len(),
				tolerance: self.tolerance,
			});
		}

		let price = self.weighted_median(&accepted);
		let sources: BTreeSet<SourceId> = accepted.iter().map(|o| o.source.clone()).collect();
		let freshest = accepted
			.iter()
			.map(|o| o.observed_at)
			.max()
			.unwrap_or(now);
		let stale = sources.len() < self.quorum || self.is_aged(freshest, now);

		Ok(Some(CanonicalPrice {
			token: token.clone(),
			price,
			sources,
			merged_at: now,
			stale,
		}))
	}

	/// Weighted median over observations sorted by price.
	///
	/// Walks the cumulative weight up to half the total; when it lands
	/// exactly on half, the median is the midpoint of that price and the
	/// next, so two equally-trusted sources at 100.0 and 101.0 merge to
	/// 100.5.
	fn weighted_median(&self, sorted: &[&PriceObservation]) -> Decimal {
		let total: Decimal = sorted.iter().map(|o| self.weight_of(o)).sum();
		let half = total / Decimal::TWO;

		let mut cumulative = Decimal::ZERO;
		for (i, obs) in sorted.iter().enumerate() {
			cumulative += self.weight_of(obs);
			if cumulative > half {
				return obs.price;
			}
			if cumulative == half {
				let next = sorted[i + 1];
				return (obs.price + next.price) / Decimal::TWO;
			}
		}

		// Unreachable for non-empty input; the cumulative weight always
		// crosses half before the slice ends.
		sorted[sorted.len() - 1].price
	}

	/// Observation weight: reported weight first, then the configured
	/// per-source trust weight, then 1.
	fn weight_of(&self, obs: &PriceObservation) -> Decimal {
		obs.weight
			.or_else(|| self.weights.get(&obs.source).copied())
			.unwrap_or(Decimal::ONE)
	}

	fn within_tolerance(&self, price: Decimal, median: Decimal) -> bool {
		if median.is_zero() {
			return false;
		}
		((price - median).abs() / median) <= self.tolerance
	}

	fn is_aged(&self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
		now - observed_at > self.staleness_threshold
	}
}

/// Group a run's observations by token for per-token merging.
pub fn group_observations(
	observations: Vec<PriceObservation>,
) -> BTreeMap<TokenId, Vec<PriceObservation>> {
	let mut grouped: BTreeMap<TokenId, Vec<PriceObservation>> = BTreeMap::new();
	for obs in observations {
		grouped.entry(obs.token.clone()).or_default().push(obs);
	}
	grouped
}
