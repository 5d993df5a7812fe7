//! This module defines the ledger rows (`MigrationRun`, `MigrationRecord`), the provenance tuple
//! that identifies the tooling behind a run, and the backend traits a storage engine implements
//! so the application protocol can drive it.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Versions of the tooling that produced a migration script.
///
/// Supplied by the caller. The database version is not part of it: it is read from the live
/// session when a migration is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolVersions {
    /// Version of the template the script was rendered from.
    pub template_version: String,
    /// Version of the build tool that rendered the script.
    pub builder_version: String,
    /// Version of the migrator running the script.
    pub migrator_version: String,
}

impl ToolVersions {
    /// Creates a new set of tool versions.
    pub fn new(
        template_version: impl Into<String>,
        builder_version: impl Into<String>,
        migrator_version: impl Into<String>,
    ) -> Self {
        Self {
            template_version: template_version.into(),
            builder_version: builder_version.into(),
            migrator_version: migrator_version.into(),
        }
    }

    /// Completes the tuple with the version reported by the database engine.
    pub fn with_database_version(&self, database_version: impl Into<String>) -> ProvenanceTuple {
        ProvenanceTuple {
            template_version: self.template_version.clone(),
            builder_version: self.builder_version.clone(),
            migrator_version: self.migrator_version.clone(),
            database_version: database_version.into(),
        }
    }
}

/// The (template, builder, migrator, database) versions identifying a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvenanceTuple {
    /// Version of the template the script was rendered from.
    pub template_version: String,
    /// Version of the build tool that rendered the script.
    pub builder_version: String,
    /// Version of the migrator running the script.
    pub migrator_version: String,
    /// Version string reported by the database engine.
    pub database_version: String,
}

impl fmt::Display for ProvenanceTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(template={}, builder={}, migrator={}, database={})",
            self.template_version, self.builder_version, self.migrator_version, self.database_version
        )
    }
}

/// A row of the run-metadata relation: one unique provenance tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRun {
    /// Auto-assigned identity.
    pub id: i32,
    /// The tooling versions of this run.
    #[serde(flatten)]
    pub provenance: ProvenanceTuple,
}

/// A row of the migration-records relation: one successfully applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Unique migration name.
    pub name: String,
    /// Position of the migration in the total application order.
    pub ordinal: i32,
    /// When the record was inserted (UTC).
    pub created: NaiveDateTime,
    /// Completion flag. Always set by the current protocol.
    pub finalized: bool,
    /// The `MigrationRun` that applied this migration.
    pub run_id: i32,
}

/// A ledger transaction.
///
/// Implementations open the transaction at serializable isolation and hold an exclusive lock
/// on the migration-records relation for the whole of its lifetime. Dropping a transaction
/// without calling [`LedgerTransaction::commit`] must discard every change made through it.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// The error returned by the storage engine.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns every record whose name equals `name`.
    async fn find_migrations(&mut self, name: &str) -> Result<Vec<MigrationRecord>, Self::Error>;

    /// Returns the highest recorded ordinal, `None` if nothing has been recorded yet.
    async fn last_ordinal(&mut self) -> Result<Option<i32>, Self::Error>;

    /// Returns the version string of the database engine this transaction runs on.
    async fn database_version(&mut self) -> Result<String, Self::Error>;

    /// Inserts a run row for the tuple unless one already exists.
    async fn upsert_run(&mut self, provenance: &ProvenanceTuple) -> Result<(), Self::Error>;

    /// Returns every run row matching all four versions of the tuple.
    async fn find_runs(
        &mut self,
        provenance: &ProvenanceTuple,
    ) -> Result<Vec<MigrationRun>, Self::Error>;

    /// Appends a finalized migration record owned by the run `run_id`.
    async fn insert_migration(
        &mut self,
        name: &str,
        ordinal: i32,
        run_id: i32,
    ) -> Result<(), Self::Error>;

    /// Commits the transaction, releasing the lock.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Rolls the transaction back, releasing the lock.
    async fn rollback(self) -> Result<(), Self::Error>;
}

/// A storage engine holding the migration ledger.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// The error returned by the storage engine.
    type Error: std::error::Error + Send + Sync + 'static;
    /// The transaction type handed to migration bodies.
    type Transaction: LedgerTransaction<Error = Self::Error>;

    /// Creates whichever of the ledger namespace and relations are missing.
    ///
    /// Must be idempotent and safe to call concurrently.
    async fn ensure_ledger_exists(&self) -> Result<(), crate::MigrationError<Self::Error>>;

    /// Opens a serializable transaction and takes the exclusive ledger lock before returning.
    async fn begin(&self) -> Result<Self::Transaction, Self::Error>;

    /// Lists every applied migration ordered by ordinal.
    async fn applied(&self) -> Result<Vec<MigrationRecord>, Self::Error>;

    /// Lists every run row ordered by identity.
    async fn runs(&self) -> Result<Vec<MigrationRun>, Self::Error>;
}
