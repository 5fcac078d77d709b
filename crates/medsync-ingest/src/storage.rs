//! Medication persistence
//!
//! A full replace runs inside one database transaction: the old rows are
//! deleted and the new ones inserted through a [`ReplaceSession`], and nothing
//! becomes visible until [`ReplaceSession::commit`]. Dropping a session without
//! committing rolls everything back, so a failed run leaves the previous dataset
//! in place.

use crate::config::{DatabaseConfig, DEFAULT_INSERT_CHUNK_SIZE, MAX_INSERT_CHUNK_SIZE};
use crate::error::Result;
use crate::models::MedicationRecord;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

/// Store holding the medication dataset
#[async_trait]
pub trait MedicationStore: Send + Sync {
    /// Open a replace session with exclusive write access to the dataset
    async fn begin_replace(&self) -> Result<Box<dyn ReplaceSession>>;
}

/// One in-flight full replace
#[async_trait]
pub trait ReplaceSession: Send {
    /// Delete every stored medication, returning how many were removed
    async fn clear(&mut self) -> Result<u64>;

    /// Insert medications in order, returning how many were written
    async fn insert_all(&mut self, medications: &[MedicationRecord]) -> Result<usize>;

    /// Make the replace visible
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgMedicationStore {
    db: PgPool,
    chunk_size: usize,
}

impl PgMedicationStore {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }

    /// Connect a pool using `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        Ok(Self::new(db))
    }

    /// Rows per INSERT statement, kept between 1 and [`MAX_INSERT_CHUNK_SIZE`]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_INSERT_CHUNK_SIZE);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.db).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl MedicationStore for PgMedicationStore {
    async fn begin_replace(&self) -> Result<Box<dyn ReplaceSession>> {
        let tx = self.db.begin().await?;
        debug!("Opened replace transaction");

        Ok(Box::new(PgReplaceSession {
            tx,
            chunk_size: self.chunk_size,
        }))
    }
}

/// Replace session bound to a PostgreSQL transaction
pub struct PgReplaceSession {
    tx: Transaction<'static, Postgres>,
    chunk_size: usize,
}

impl PgReplaceSession {
    async fn insert_chunk(&mut self, medications: &[MedicationRecord]) -> Result<()> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO medications (
                drugbank_id,
                name,
                description,
                synonyms,
                drug_class,
                indication
            )
            "#,
        );

        query_builder.push_values(medications, |mut b, medication| {
            b.push_bind(&medication.drugbank_id)
                .push_bind(&medication.name)
                .push_bind(&medication.description)
                .push_bind(&medication.synonyms)
                .push_bind(&medication.drug_class)
                .push_bind(&medication.indication);
        });

        query_builder.build().execute(&mut *self.tx).await?;

        Ok(())
    }
}

#[async_trait]
impl ReplaceSession for PgReplaceSession {
    async fn clear(&mut self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM medications")
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_all(&mut self, medications: &[MedicationRecord]) -> Result<usize> {
        let total_chunks = medications.len().div_ceil(self.chunk_size);
        let mut stored = 0;

        for (chunk_idx, chunk) in medications.chunks(self.chunk_size).enumerate() {
            debug!(
                "Storing medications chunk {} / {} ({} rows)",
                chunk_idx + 1,
                total_chunks,
                chunk.len()
            );

            self.insert_chunk(chunk).await?;
            stored += chunk.len();
        }

        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
