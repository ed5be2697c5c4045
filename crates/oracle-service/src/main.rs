use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oracle_cache::{CacheStore, FileCache};
use oracle_config::{ConfigLoader, OracleConfig};
use oracle_core::{Pipeline, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "price-oracle")]
#[command(about = "Wrapped-asset price oracle pipeline", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Path to configuration file
	#[arg(short, long, value_name = "FILE", env = "ORACLE_CONFIG", default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, env = "ORACLE_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the recurring pipeline
	Start,
	/// Execute a single fetch→merge→persist cycle and exit
	RunOnce,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::RunOnce) => run_once(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn build_pipeline(config: &OracleConfig) -> Result<Arc<Pipeline>> {
	let cache = Arc::new(FileCache::new(config.cache.path.clone()));

	// Cold-path read: report the last-known-good snapshot, if any.
	match cache.read().await {
		Ok(snapshot) => info!(
			"Found cached snapshot versioned {} with {} tokens",
			snapshot.merged_at,
			snapshot.len()
		),
		Err(_) => info!("No usable cached snapshot, starting cold"),
	}

	let pipeline = Pipeline::from_config(config, cache)
		.await
		.context("Failed to build pipeline")?;
	Ok(Arc::new(pipeline))
}

async fn start_service(cli: Cli) -> Result<()> {
	let config = ConfigLoader::from_file(&cli.config).context("Failed to load configuration")?;

	info!("Starting price oracle '{}'", config.oracle.name);
	info!(
		"{} tokens, {} sources, interval {}s",
		config.tokens.len(),
		config.enabled_sources().count(),
		config.schedule.interval_secs
	);

	let pipeline = build_pipeline(&config).await?;
	let scheduler = Scheduler::new(pipeline, &config.schedule);

	let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
	let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

	shutdown_signal().await;
	info!("Shutdown signal received, stopping scheduler...");

	// Ignore send errors: the scheduler may already be gone.
	let _ = shutdown_tx.send(());
	scheduler_handle.await.context("Scheduler task panicked")?;

	info!("Price oracle stopped");
	Ok(())
}

async fn run_once(cli: Cli) -> Result<()> {
	let config = ConfigLoader::from_file(&cli.config).context("Failed to load configuration")?;

	let pipeline = build_pipeline(&config).await?;
	let outcome = tokio::time::timeout(config.schedule.run_deadline(), pipeline.run())
		.await
		.context("Run exceeded deadline")?
		.context("Run failed")?;

	println!("{}", outcome.summary());
	if outcome.degraded() {
		anyhow::bail!("Run completed degraded");
	}
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	let config = ConfigLoader::from_file(&cli.config).context("Configuration is invalid")?;

	info!("Configuration is valid");
	info!("Oracle name: {}", config.oracle.name);
	for token in &config.tokens {
		info!("  Token: {} on chain {}", token.symbol, token.chain_id);
	}
	for (name, source) in config.enabled_sources() {
		info!("  Source: {} ({})", name, source.kind);
	}
	info!("  History backend: {}", config.history.backend);

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
