//! Postgres-backed reporting store.
//!
//! Every logical collection lives in one of three JSONB tables keyed by the
//! collection name, so adding a domain never needs new DDL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ergo_core::{Checkpoint, Document, Domain};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use crate::{stage_documents, CheckpointStore, DocumentSink, Result};

/// Idempotent DDL for the reporting tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    natural_key JSONB NOT NULL,
    document JSONB NOT NULL,
    synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (collection, key_hash)
);

CREATE TABLE IF NOT EXISTS realtime_documents (
    id BIGSERIAL PRIMARY KEY,
    collection TEXT NOT NULL,
    document JSONB NOT NULL,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_realtime_documents_collection ON realtime_documents (collection);

CREATE TABLE IF NOT EXISTS checkpoints (
    id BIGSERIAL PRIMARY KEY,
    collection TEXT NOT NULL,
    start_date TIMESTAMPTZ NOT NULL,
    end_date TIMESTAMPTZ NOT NULL,
    extracted_at TIMESTAMPTZ NOT NULL,
    row_count BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_collection ON checkpoints (collection, extracted_at DESC, id DESC);
";

/// Rows per multi-row upsert statement; keeps binds under the protocol limit.
pub const UPSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the reporting tables when missing. Safe to run on every start.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_TABLES).execute(&self.pool).await?;
        info!("reporting schema ready");
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgDocumentStore {
    async fn get_last(&self, domain: Domain) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT start_date, end_date, extracted_at, row_count
              FROM checkpoints
             WHERE collection = $1
             ORDER BY extracted_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .bind(domain.checkpoint_collection())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let rows: i64 = row.try_get("row_count")?;
        Ok(Some(Checkpoint {
            start_date: row.try_get::<DateTime<Utc>, _>("start_date")?,
            end_date: row.try_get::<DateTime<Utc>, _>("end_date")?,
            extracted_at: row.try_get::<DateTime<Utc>, _>("extracted_at")?,
            rows: u64::try_from(rows).unwrap_or_default(),
        }))
    }

    async fn put(&self, domain: Domain, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (collection, start_date, end_date, extracted_at, row_count)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(domain.checkpoint_collection())
        .bind(checkpoint.start_date)
        .bind(checkpoint.end_date)
        .bind(checkpoint.extracted_at)
        .bind(i64::try_from(checkpoint.rows).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for PgDocumentStore {
    async fn upsert(&self, domain: Domain, documents: &[Document]) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let collection = domain.durable_collection();
        let staged = stage_documents(documents)?;
        let mut tx = self.pool.begin().await?;
        for chunk in staged.chunks(UPSERT_CHUNK_SIZE) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO documents (collection, key_hash, natural_key, document, synced_at) ",
            );
            query.push_values(chunk, |mut row, doc| {
                row.push_bind(collection)
                    .push_bind(&doc.key_hash)
                    .push_bind(&doc.natural_key)
                    .push_bind(&doc.body)
                    .push("NOW()");
            });
            query.push(
                " ON CONFLICT (collection, key_hash) DO UPDATE SET \
                 natural_key = EXCLUDED.natural_key, \
                 document = EXCLUDED.document, \
                 synced_at = EXCLUDED.synced_at",
            );
            query.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(
            collection,
            written = documents.len(),
            distinct = staged.len(),
            "upserted documents"
        );
        Ok(documents.len() as u64)
    }

    async fn replace_all(&self, domain: Domain, documents: &[Document]) -> Result<u64> {
        let collection = domain.realtime_collection();
        let deleted = sqlx::query("DELETE FROM realtime_documents WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if documents.is_empty() {
            debug!(collection, deleted, "realtime mirror emptied");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for doc in documents {
            sqlx::query("INSERT INTO realtime_documents (collection, document) VALUES ($1, $2)")
                .bind(collection)
                .bind(doc.to_json()?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(collection, deleted, inserted = documents.len(), "realtime mirror replaced");
        Ok(documents.len() as u64)
    }
}
