// oracle-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Source error: {0}")]
	Source(String),

	#[error("History store error: {0}")]
	History(String),

	/// The merge produced nothing and no prior snapshot exists to carry
	/// forward. The only error that aborts a run outright.
	#[error("No price data: merge produced an empty snapshot and no prior snapshot exists")]
	NoPriceData,
}
