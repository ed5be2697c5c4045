//! Postgres-backed history store.
//!
//! One row per token per run with a composite primary key on
//! `(symbol, chain_id, recorded_at)`; retried appends land on
//! `ON CONFLICT DO NOTHING` instead of duplicating rows.

use crate::{HistoryError, HistoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_types::{CanonicalPrice, ChainId, PriceHistoryRecord, SourceId, TokenId};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

/// Postgres history store over a pooled connection.
pub struct PostgresHistory {
	pool: PgPool,
}

impl PostgresHistory {
	/// Connect to the database.
	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, HistoryError> {
		let pool = PgPoolOptions::new()
			.max_connections(max_connections)
			.connect(database_url)
			.await
			.map_err(|e| HistoryError::Backend(e.to_string()))?;

		info!("Connected to history database");
		Ok(Self { pool })
	}

	/// Provision the schema. Called once at startup.
	pub async fn ensure_schema(&self) -> Result<(), HistoryError> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS price_history (
				symbol      TEXT        NOT NULL,
				chain_id    BIGINT      NOT NULL,
				price       NUMERIC     NOT NULL,
				recorded_at TIMESTAMPTZ NOT NULL,
				sources     TEXT[]      NOT NULL,
				PRIMARY KEY (symbol, chain_id, recorded_at)
			)
			"#,
		)
		.execute(&self.pool)
		.await
		.map_err(|e| HistoryError::Backend(e.to_string()))?;

		info!("History schema ready");
		Ok(())
	}

	fn row_to_record(row: &sqlx::postgres::PgRow) -> PriceHistoryRecord {
		let symbol: String = row.get("symbol");
		let chain_id: i64 = row.get("chain_id");
		let price: Decimal = row.get("price");
		let recorded_at: DateTime<Utc> = row.get("recorded_at");
		let sources: Vec<String> = row.get("sources");

		PriceHistoryRecord {
			token: TokenId::new(symbol, ChainId(chain_id as u64)),
			price,
			recorded_at,
			sources: sources.into_iter().map(SourceId::new).collect(),
		}
	}
}

#[async_trait]
impl HistoryStore for PostgresHistory {
	async fn append(&self, records: &[PriceHistoryRecord]) -> Result<(), HistoryError> {
		let mut tx = self
			.pool
			.begin()
			.await
			.map_err(|e| HistoryError::Backend(e.to_string()))?;

		for record in records {
			let sources: Vec<String> =
				record.sources.iter().map(|s| s.0.clone()).collect();

			sqlx::query(
				r#"
				INSERT INTO price_history (symbol, chain_id, price, recorded_at, sources)
				VALUES ($1, $2, $3, $4, $5)
				ON CONFLICT (symbol, chain_id, recorded_at) DO NOTHING
				"#,
			)
			.bind(&record.token.symbol)
			.bind(record.token.chain.0 as i64)
			.bind(record.price)
			.bind(record.recorded_at)
			.bind(&sources)
			.execute(&mut *tx)
			.await
			.map_err(|e| HistoryError::Backend(e.to_string()))?;
		}

		tx.commit()
			.await
			.map_err(|e| HistoryError::Backend(e.to_string()))?;

		debug!("Appended {} history records", records.len());
		Ok(())
	}

	async fn latest(&self, token: &TokenId) -> Result<CanonicalPrice, HistoryError> {
		let row = sqlx::query(
			r#"
			SELECT symbol, chain_id, price, recorded_at, sources
			FROM price_history
			WHERE symbol = $1 AND chain_id = $2
			ORDER BY recorded_at DESC
			LIMIT 1
			"#,
		)
		.bind(&token.symbol)
		.bind(token.chain.0 as i64)
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| HistoryError::Backend(e.to_string()))?
		.ok_or(HistoryError::NotFound)?;

		let record = Self::row_to_record(&row);
		Ok(CanonicalPrice {
			token: record.token,
			price: record.price,
			sources: record.sources,
			merged_at: record.recorded_at,
			stale: false,
		})
	}

	async fn history(
		&self,
		token: &TokenId,
		from: DateTime<Utc>,
		to: DateTime<Utc>,
	) -> Result<Vec<PriceHistoryRecord>, HistoryError> {
		let rows = sqlx::query(
			r#"
			SELECT symbol, chain_id, price, recorded_at, sources
			FROM price_history
			WHERE symbol = $1 AND chain_id = $2
			  AND recorded_at >= $3 AND recorded_at <= $4
			ORDER BY recorded_at ASC
			"#,
		)
		.bind(&token.symbol)
		.bind(token.chain.0 as i64)
		.bind(from)
		.bind(to)
		.fetch_all(&self.pool)
		.await
		.map_err(|e| HistoryError::Backend(e.to_string()))?;

		Ok(rows.iter().map(Self::row_to_record).collect())
	}
}
