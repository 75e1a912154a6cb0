// Storage seam for persisted answer records
//
// Implementations:
// - SqlStore::Sqlite (sqlx SqlitePool)
// - SqlStore::Postgres (sqlx PgPool)
//
// Both issue a single INSERT .. ON CONFLICT upsert per batch. Opening the pool
// and provisioning the `answers` table is the host's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

/// Table written by the upsert.
pub const ANSWERS_TABLE: &str = "answers";

// Highest bind-parameter index each dialect accepts in one statement.
const SQLITE_MAX_BIND_PARAMS: usize = 32_766;
const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;
const BINDS_PER_RECORD: usize = 3;

/// One row of the `answers` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors raised while persisting a batch
#[derive(Debug, Error)]
pub enum StoreError {
    /// The upsert statement could not be built for this batch
    #[error("failed to build upsert for {records} records: {reason}")]
    StatementBuild { records: usize, reason: String },

    /// The database rejected or could not run the statement
    #[error("failed to execute upsert: {0}")]
    Execute(#[from] sqlx::Error),
}

impl StoreError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatementBuild { .. } => "statement_build",
            Self::Execute(_) => "execute",
        }
    }
}

/// Destination for batches of answer records.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Insert every record, or on `domain` conflict only advance `updated_at`.
    ///
    /// Records arrive already sorted by domain; implementations must write
    /// them in that order.
    async fn upsert(&self, records: &[AnswerRecord]) -> Result<(), StoreError>;
}

/// sqlx-backed store for the supported SQL dialects.
#[derive(Debug, Clone)]
pub enum SqlStore {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl SqlStore {
    pub fn dialect(&self) -> &'static str {
        match self {
            SqlStore::Sqlite(_) => "sqlite",
            SqlStore::Postgres(_) => "postgres",
        }
    }

    fn max_records(&self) -> usize {
        let max_params = match self {
            SqlStore::Sqlite(_) => SQLITE_MAX_BIND_PARAMS,
            SqlStore::Postgres(_) => POSTGRES_MAX_BIND_PARAMS,
        };
        max_params / BINDS_PER_RECORD
    }

    /// Close the underlying pool. Only call once the pipeline has stopped.
    pub async fn close(&self) {
        match self {
            SqlStore::Sqlite(pool) => pool.close().await,
            SqlStore::Postgres(pool) => pool.close().await,
        }
    }
}

fn upsert_head() -> String {
    format!(
        r#"INSERT INTO "{}" ("domain", "created_at", "updated_at") "#,
        ANSWERS_TABLE
    )
}

// `updated_at` only moves forward, even if the clock steps back between batches.
const SQLITE_UPSERT_TAIL: &str = r#" ON CONFLICT ("domain") DO UPDATE SET "updated_at" = MAX("answers"."updated_at", EXCLUDED."updated_at")"#;
const POSTGRES_UPSERT_TAIL: &str = r#" ON CONFLICT ("domain") DO UPDATE SET "updated_at" = GREATEST("answers"."updated_at", EXCLUDED."updated_at")"#;

#[async_trait]
impl AnswerStore for SqlStore {
    async fn upsert(&self, records: &[AnswerRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let max_records = self.max_records();
        if records.len() > max_records {
            return Err(StoreError::StatementBuild {
                records: records.len(),
                reason: format!(
                    "{} dialect allows at most {} records per statement",
                    self.dialect(),
                    max_records
                ),
            });
        }

        match self {
            SqlStore::Sqlite(pool) => {
                let mut query = QueryBuilder::<Sqlite>::new(upsert_head());
                query.push_values(records, |mut row, record| {
                    row.push_bind(record.domain.as_str())
                        .push_bind(record.created_at)
                        .push_bind(record.updated_at);
                });
                query.push(SQLITE_UPSERT_TAIL);
                query.build().execute(pool).await?;
            }
            SqlStore::Postgres(pool) => {
                let mut query = QueryBuilder::<Postgres>::new(upsert_head());
                query.push_values(records, |mut row, record| {
                    row.push_bind(record.domain.as_str())
                        .push_bind(record.created_at)
                        .push_bind(record.updated_at);
                });
                query.push(POSTGRES_UPSERT_TAIL);
                query.build().execute(pool).await?;
            }
        }

        Ok(())
    }
}
