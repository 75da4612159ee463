//! PostgreSQL implementation of the `AggregateStore` trait.
//!
//! Bulk inserts are split into chunks and written as multi-row
//! `INSERT ... ON CONFLICT DO NOTHING` statements, so a replayed round is
//! silently skipped instead of failing the whole batch.

use crate::error::StorageError;
use crate::traits::{AggregateStore, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Config, ConfigId, Feed, GlobalAggregate, LocalAggregate, Proof};
use config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

const INSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct ConfigRow {
    id: i32,
    name: String,
    fetch_interval: i32,
    aggregate_interval: i32,
    submit_interval: i32,
    feed_data_freshness: Option<i32>,
}

impl ConfigRow {
    fn into_domain(self) -> Config {
        Config {
            id: self.id,
            name: self.name,
            fetch_interval: self.fetch_interval,
            aggregate_interval: self.aggregate_interval,
            submit_interval: self.submit_interval,
            feed_data_freshness: self.feed_data_freshness,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FeedRow {
    id: i32,
    name: String,
    definition: serde_json::Value,
    config_id: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct LocalAggregateRow {
    config_id: i32,
    value: i64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct GlobalAggregateRow {
    config_id: i32,
    value: i64,
    round: i64,
    timestamp: DateTime<Utc>,
}

/// PostgreSQL-backed aggregate store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_url())
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to database: {}", e)))?;

        info!(host = %config.host, database = %config.database, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> StorageResult<()> {
        let migration_sql = include_str!("../../../migrations/001_create_oracle_tables.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(format!("Migration failed: {}", e)))?;
        info!("Database migrations completed successfully");
        Ok(())
    }
}

fn query_error(context: &str) -> impl FnOnce(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::Query(format!("{}: {}", context, e))
}

#[async_trait]
impl AggregateStore for PostgresStore {
    #[instrument(skip(self))]
    async fn load_configs(&self) -> StorageResult<Vec<Config>> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            "SELECT id, name, fetch_interval, aggregate_interval, submit_interval, feed_data_freshness \
             FROM configs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to load configs"))?;

        Ok(rows.into_iter().map(ConfigRow::into_domain).collect())
    }

    async fn load_feeds(&self, config_id: ConfigId) -> StorageResult<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, definition, config_id FROM feeds WHERE config_id = $1 ORDER BY id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to load feeds"))?;

        Ok(rows
            .into_iter()
            .map(|r| Feed {
                id: r.id,
                name: r.name,
                definition: r.definition,
                config_id: r.config_id,
            })
            .collect())
    }

    async fn latest_local_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<LocalAggregate>> {
        let row = sqlx::query_as::<_, LocalAggregateRow>(
            "SELECT config_id, value, timestamp FROM local_aggregates \
             WHERE config_id = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get latest local aggregate"))?;

        Ok(row.map(|r| LocalAggregate {
            config_id: r.config_id,
            value: r.value,
            timestamp: r.timestamp,
        }))
    }

    #[instrument(skip(self, aggregates), fields(count = aggregates.len()))]
    async fn insert_local_aggregates(&self, aggregates: &[LocalAggregate]) -> StorageResult<u64> {
        let mut inserted = 0u64;
        for chunk in aggregates.chunks(INSERT_CHUNK_SIZE) {
            let mut query: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO local_aggregates (config_id, value, timestamp) ");
            query.push_values(chunk, |mut row, a| {
                row.push_bind(a.config_id)
                    .push_bind(a.value)
                    .push_bind(a.timestamp);
            });
            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to insert local aggregates"))?;
            inserted += result.rows_affected();
        }
        debug!(inserted, "Local aggregates inserted");
        Ok(inserted)
    }

    async fn latest_global_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<GlobalAggregate>> {
        let row = sqlx::query_as::<_, GlobalAggregateRow>(
            "SELECT config_id, value, round, timestamp FROM global_aggregates \
             WHERE config_id = $1 ORDER BY round DESC LIMIT 1",
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get latest global aggregate"))?;

        Ok(row.map(|r| GlobalAggregate {
            config_id: r.config_id,
            value: r.value,
            round: r.round,
            timestamp: r.timestamp,
        }))
    }

    #[instrument(skip(self, aggregates), fields(count = aggregates.len()))]
    async fn insert_global_aggregates(
        &self,
        aggregates: &[GlobalAggregate],
    ) -> StorageResult<u64> {
        let mut inserted = 0u64;
        for chunk in aggregates.chunks(INSERT_CHUNK_SIZE) {
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO global_aggregates (config_id, value, round, timestamp) ",
            );
            query.push_values(chunk, |mut row, a| {
                row.push_bind(a.config_id)
                    .push_bind(a.value)
                    .push_bind(a.round)
                    .push_bind(a.timestamp);
            });
            query.push(" ON CONFLICT (config_id, round) DO NOTHING");
            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to insert global aggregates"))?;
            inserted += result.rows_affected();
        }
        debug!(inserted, "Global aggregates inserted");
        Ok(inserted)
    }

    #[instrument(skip(self, proofs), fields(count = proofs.len()))]
    async fn insert_proofs(&self, proofs: &[Proof]) -> StorageResult<u64> {
        let mut inserted = 0u64;
        for chunk in proofs.chunks(INSERT_CHUNK_SIZE) {
            let mut query: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO proofs (config_id, round, proof) ");
            query.push_values(chunk, |mut row, p| {
                row.push_bind(p.config_id)
                    .push_bind(p.round)
                    .push_bind(p.proof.clone());
            });
            query.push(" ON CONFLICT (config_id, round) DO NOTHING");
            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to insert proofs"))?;
            inserted += result.rows_affected();
        }
        debug!(inserted, "Proofs inserted");
        Ok(inserted)
    }
}
