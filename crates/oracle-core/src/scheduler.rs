//! Recurring run scheduler.
//!
//! Drives the pipeline on a fixed interval with an outer per-run
//! deadline. Runs execute inline on the scheduler task, so at most one
//! run is ever in flight; when a run overruns its slot the next tick is
//! delayed rather than stacked.

use crate::pipeline::Pipeline;
use oracle_config::ScheduleConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct Scheduler {
	pipeline: Arc<Pipeline>,
	interval: Duration,
	run_deadline: Duration,
}

impl Scheduler {
	pub fn new(pipeline: Arc<Pipeline>, schedule: &ScheduleConfig) -> Self {
		Self {
			pipeline,
			interval: schedule.interval(),
			run_deadline: schedule.run_deadline(),
		}
	}

	/// Run the schedule until a shutdown signal arrives.
	///
	/// The first run fires immediately; later runs fire every interval.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
		info!(
			"Scheduler started: interval {:?}, run deadline {:?}",
			self.interval, self.run_deadline
		);
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					self.run_once().await;
				}
				_ = shutdown.recv() => {
					info!("Scheduler received shutdown signal");
					break;
				}
			}
		}
	}

	/// Execute one run under the configured deadline.
	///
	/// Scheduler-level failures are logged and swallowed; the next tick
	/// gets a fresh attempt either way.
	pub async fn run_once(&self) {
		match tokio::time::timeout(self.run_deadline, self.pipeline.run()).await {
			Ok(Ok(_)) => {}
			Ok(Err(e)) => warn!("Run failed: {}", e),
			Err(_) => warn!("Run exceeded deadline of {:?}, abandoned", self.run_deadline),
		}
	}
}
