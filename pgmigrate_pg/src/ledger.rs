//! This module defines the `PgLedger`, the PostgreSQL implementation of the migration ledger.
//!
//! The ledger lives in two relations, `pg_migrate` (one row per tool-version tuple) and
//! `pg_migrations` (one row per applied migration), inside the configured schema.

use crate::config::{LedgerConfig, MIGRATIONS_TABLE, RUNS_TABLE, quote_ident};
use crate::transaction::{PgLedgerTransaction, PgMigrationRow, PgRunRow};
use async_trait::async_trait;
use log::{debug, info};
use pgmigrate_core::prelude::*;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;

/// Errors returned by the PostgreSQL ledger.
#[derive(Debug, thiserror::Error)]
pub enum PgLedgerError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The configured schema name is not a usable identifier.
    #[error("Invalid ledger schema name: {0:?}")]
    InvalidIdentifier(String),

    /// A configured timeout is zero, which PostgreSQL would read as no limit.
    #[error("Invalid ledger {0}: zero disables the limit, use None instead")]
    InvalidTimeout(&'static str),
}

fn db_error(e: sqlx::Error) -> MigrationError<PgLedgerError> {
    MigrationError::Backend(PgLedgerError::Database(e))
}

/// A PostgreSQL migration ledger.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    config: LedgerConfig,
    runs_table: String,
    migrations_table: String,
}

impl PgLedger {
    /// Creates a ledger in the default `pgmigrate` schema.
    pub fn new(pool: PgPool) -> Self {
        Self::build(pool, LedgerConfig::default())
    }

    /// Creates a ledger with the given configuration.
    pub fn with_config(pool: PgPool, config: LedgerConfig) -> Result<Self, PgLedgerError> {
        config.validate()?;
        Ok(Self::build(pool, config))
    }

    fn build(pool: PgPool, config: LedgerConfig) -> Self {
        debug!("Creating a new PgLedger");
        Self {
            runs_table: config.qualify(RUNS_TABLE),
            migrations_table: config.qualify(MIGRATIONS_TABLE),
            pool,
            config,
        }
    }

    /// The configuration of this ledger.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The connection pool of this ledger.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether the namespace and both relations exist.
    ///
    /// Fails with `duplicate_catalog_entry` if the catalog lists any of them more than once.
    async fn ledger_present(
        &self,
        conn: &mut PgConnection,
    ) -> Result<bool, MigrationError<PgLedgerError>> {
        if let Some(schema) = &self.config.schema {
            if !self.namespace_present(conn, schema).await? {
                return Ok(false);
            }
        }
        Ok(self.relation_present(conn, RUNS_TABLE).await?
            && self.relation_present(conn, MIGRATIONS_TABLE).await?)
    }

    async fn namespace_present(
        &self,
        conn: &mut PgConnection,
        schema: &str,
    ) -> Result<bool, MigrationError<PgLedgerError>> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pg_catalog.pg_namespace WHERE nspname = $1")
                .bind(schema)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
        catalog_presence(schema, count)
    }

    async fn relation_present(
        &self,
        conn: &mut PgConnection,
        relation: &str,
    ) -> Result<bool, MigrationError<PgLedgerError>> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1
              AND c.relkind = 'r'
              AND n.nspname = COALESCE($2, current_schema())
            "#,
        )
        .bind(relation)
        .bind(self.config.schema.as_deref())
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;
        catalog_presence(relation, count)
    }

    /// Creates whatever is missing, serialized against other provisioners by an advisory lock.
    async fn provision(&self) -> Result<(), MigrationError<PgLedgerError>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let lock_key = format!(
            "pgmigrate:{}",
            self.config.schema.as_deref().unwrap_or("<search_path>")
        );
        sqlx::query(
            r#"
            SELECT pg_advisory_xact_lock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(&lock_key)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if let Some(schema) = &self.config.schema {
            if !self.namespace_present(&mut *tx, schema).await? {
                info!("Creating migration ledger schema {}", schema);
                let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
                sqlx::query(&sql).execute(&mut *tx).await.map_err(db_error)?;
            }
        }

        if !self.relation_present(&mut *tx, RUNS_TABLE).await? {
            info!("Creating migration ledger relation {}", self.runs_table);
            let create_table = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    template_version VARCHAR(255) NOT NULL,
                    builder_version VARCHAR(255) NOT NULL,
                    migrator_version VARCHAR(255) NOT NULL,
                    database_version VARCHAR(1024) NOT NULL
                )
                "#,
                self.runs_table
            );
            sqlx::query(&create_table)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            let create_index = format!(
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS pg_migrate_unique_index
                ON {} (template_version, builder_version, migrator_version, database_version)
                "#,
                self.runs_table
            );
            sqlx::query(&create_index)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        if !self.relation_present(&mut *tx, MIGRATIONS_TABLE).await? {
            info!("Creating migration ledger relation {}", self.migrations_table);
            let create_table = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    name VARCHAR(255) PRIMARY KEY,
                    ordinal INTEGER NOT NULL,
                    created TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
                    finalized SMALLINT NOT NULL DEFAULT 1,
                    pg_migrate_id INTEGER NOT NULL REFERENCES {}(id)
                )
                "#,
                self.migrations_table, self.runs_table
            );
            sqlx::query(&create_table)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

/// Whole milliseconds for a `SET LOCAL` timeout, rounded up.
///
/// Zero disables the timeout in PostgreSQL, so any non-zero duration maps to at least 1.
fn timeout_millis(timeout: Duration) -> u128 {
    let millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis + 1
    } else {
        millis
    }
}

/// Maps a catalog count to presence; more than one entry is a broken catalog.
fn catalog_presence(object: &str, count: i64) -> Result<bool, MigrationError<PgLedgerError>> {
    match count {
        0 => Ok(false),
        1 => Ok(true),
        count => Err(MigrationError::DuplicateCatalogEntry {
            object: object.to_string(),
            count: count as usize,
        }),
    }
}

#[async_trait]
impl LedgerBackend for PgLedger {
    type Error = PgLedgerError;
    type Transaction = PgLedgerTransaction;

    async fn ensure_ledger_exists(&self) -> Result<(), MigrationError<Self::Error>> {
        {
            let mut conn = self.pool.acquire().await.map_err(db_error)?;
            if self.ledger_present(&mut *conn).await? {
                return Ok(());
            }
        }
        self.provision().await
    }

    async fn begin(&self) -> Result<PgLedgerTransaction, Self::Error> {
        let mut tx = self.pool.begin().await?;

        // Nothing that takes a snapshot may run before the lock: the serializable snapshot
        // has to include the commit of the previous lock holder.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        if let Some(timeout) = self.config.lock_timeout {
            let sql = format!("SET LOCAL lock_timeout = {}", timeout_millis(timeout));
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        if let Some(timeout) = self.config.statement_timeout {
            let sql = format!("SET LOCAL statement_timeout = {}", timeout_millis(timeout));
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        let lock = format!(
            "LOCK TABLE {} IN ACCESS EXCLUSIVE MODE",
            self.migrations_table
        );
        sqlx::query(&lock).execute(&mut *tx).await?;
        debug!("Acquired migration ledger lock on {}", self.migrations_table);

        Ok(PgLedgerTransaction::new(
            tx,
            self.runs_table.clone(),
            self.migrations_table.clone(),
        ))
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>, Self::Error> {
        let sql = format!(
            r#"
            SELECT name, ordinal, created, finalized, pg_migrate_id
            FROM {}
            ORDER BY ordinal ASC
            "#,
            self.migrations_table
        );
        let rows: Vec<PgMigrationRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn runs(&self) -> Result<Vec<MigrationRun>, Self::Error> {
        let sql = format!(
            r#"
            SELECT id, template_version, builder_version, migrator_version, database_version
            FROM {}
            ORDER BY id ASC
            "#,
            self.runs_table
        );
        let rows: Vec<PgRunRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
