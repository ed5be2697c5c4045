//! Configuration for the price oracle pipeline.
//!
//! All tunables live here: the static token list, the upstream source
//! table with per-source trust weights, merge thresholds, retry policies
//! and persistence settings. Configuration is loaded once at startup and
//! passed into the pipeline at construction; nothing is discovered at
//! runtime.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;
