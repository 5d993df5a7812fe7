//! PostgreSQL ledger transaction.
//!
//! A [`PgLedgerTransaction`] is handed to migration bodies. Access to the underlying connection
//! is provided via `Deref` and `DerefMut`, allowing use as a sqlx executor (e.g. `&mut **tx`).

use crate::ledger::PgLedgerError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use pgmigrate_core::prelude::*;
use pgmigrate_core::ProvenanceTuple;
use sqlx::{FromRow, PgConnection, Postgres};

/// Postgres representation of a migration record
#[derive(Debug, FromRow)]
pub(crate) struct PgMigrationRow {
    name: String,
    ordinal: i32,
    created: NaiveDateTime,
    finalized: i16,
    pg_migrate_id: i32,
}

impl From<PgMigrationRow> for MigrationRecord {
    fn from(row: PgMigrationRow) -> Self {
        MigrationRecord {
            name: row.name,
            ordinal: row.ordinal,
            created: row.created,
            finalized: row.finalized != 0,
            run_id: row.pg_migrate_id,
        }
    }
}

/// Postgres representation of a migration run
#[derive(Debug, FromRow)]
pub(crate) struct PgRunRow {
    id: i32,
    template_version: String,
    builder_version: String,
    migrator_version: String,
    database_version: String,
}

impl From<PgRunRow> for MigrationRun {
    fn from(row: PgRunRow) -> Self {
        MigrationRun {
            id: row.id,
            provenance: ProvenanceTuple {
                template_version: row.template_version,
                builder_version: row.builder_version,
                migrator_version: row.migrator_version,
                database_version: row.database_version,
            },
        }
    }
}

/// A serializable transaction holding the exclusive lock on the migration-records relation.
///
/// Dropping it without committing rolls it back.
pub struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    runs_table: String,
    migrations_table: String,
}

impl PgLedgerTransaction {
    pub(crate) fn new(
        tx: sqlx::Transaction<'static, Postgres>,
        runs_table: String,
        migrations_table: String,
    ) -> Self {
        Self {
            tx,
            runs_table,
            migrations_table,
        }
    }
}

impl std::ops::Deref for PgLedgerTransaction {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl std::ops::DerefMut for PgLedgerTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    type Error = PgLedgerError;

    async fn find_migrations(&mut self, name: &str) -> Result<Vec<MigrationRecord>, Self::Error> {
        let sql = format!(
            r#"
            SELECT name, ordinal, created, finalized, pg_migrate_id
            FROM {}
            WHERE name = $1
            "#,
            self.migrations_table
        );
        let rows: Vec<PgMigrationRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn last_ordinal(&mut self) -> Result<Option<i32>, Self::Error> {
        let sql = format!("SELECT MAX(ordinal) FROM {}", self.migrations_table);
        let (last,): (Option<i32>,) = sqlx::query_as(&sql).fetch_one(&mut *self.tx).await?;
        Ok(last)
    }

    async fn database_version(&mut self) -> Result<String, Self::Error> {
        let (version,): (String,) = sqlx::query_as("SELECT version()")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(version)
    }

    async fn upsert_run(&mut self, provenance: &ProvenanceTuple) -> Result<(), Self::Error> {
        let sql = format!(
            r#"
            INSERT INTO {} (template_version, builder_version, migrator_version, database_version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (template_version, builder_version, migrator_version, database_version)
            DO NOTHING
            "#,
            self.runs_table
        );
        sqlx::query(&sql)
            .bind(&provenance.template_version)
            .bind(&provenance.builder_version)
            .bind(&provenance.migrator_version)
            .bind(&provenance.database_version)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_runs(
        &mut self,
        provenance: &ProvenanceTuple,
    ) -> Result<Vec<MigrationRun>, Self::Error> {
        let sql = format!(
            r#"
            SELECT id, template_version, builder_version, migrator_version, database_version
            FROM {}
            WHERE template_version = $1
              AND builder_version = $2
              AND migrator_version = $3
              AND database_version = $4
            "#,
            self.runs_table
        );
        let rows: Vec<PgRunRow> = sqlx::query_as(&sql)
            .bind(&provenance.template_version)
            .bind(&provenance.builder_version)
            .bind(&provenance.migrator_version)
            .bind(&provenance.database_version)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_migration(
        &mut self,
        name: &str,
        ordinal: i32,
        run_id: i32,
    ) -> Result<(), Self::Error> {
        let sql = format!(
            r#"
            INSERT INTO {} (name, ordinal, finalized, pg_migrate_id)
            VALUES ($1, $2, 1, $3)
            "#,
            self.migrations_table
        );
        sqlx::query(&sql)
            .bind(name)
            .bind(ordinal)
            .bind(run_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Error> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Migration<PgLedgerTransaction> for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    async fn up(&self, tx: &mut PgLedgerTransaction) -> Result<(), BoxError> {
        // Unprepared simple query, so a script may hold several statements.
        let conn: &mut PgConnection = tx;
        sqlx::Executor::execute(conn, self.sql.as_str()).await?;
        Ok(())
    }
}
