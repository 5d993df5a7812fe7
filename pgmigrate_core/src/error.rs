//! Error vocabulary of the migration protocol.

use crate::ledger::ProvenanceTuple;
use std::fmt;

/// Boxed error returned by migration bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The structured codes the protocol exposes to callers and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// A new migration's ordinal is not the successor of the last recorded ordinal.
    MissingMigration,
    /// A recorded migration's ordinal differs from the one proposed for it.
    IncorrectOrdinal,
    /// More than one migration record carries the same name.
    MigrationsUniqueness,
    /// More than one run row carries the same provenance tuple.
    RunUniqueness,
    /// The migration is already recorded. Not a failure.
    MigrationExists,
    /// The ledger is ahead of the manifest being applied.
    OldManifest,
    /// The catalog lists a ledger object more than once.
    DuplicateCatalogEntry,
}

impl ErrorCode {
    /// The wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingMigration => "missing_migration",
            ErrorCode::IncorrectOrdinal => "incorrect_ordinal",
            ErrorCode::MigrationsUniqueness => "pg_migrations_uniqueness_error",
            ErrorCode::RunUniqueness => "pg_migrate_uniqueness_error",
            ErrorCode::MigrationExists => "migration_exists",
            ErrorCode::OldManifest => "old_manifest",
            ErrorCode::DuplicateCatalogEntry => "duplicate_catalog_entry",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn display_ordinal(ordinal: &Option<i32>) -> String {
    match ordinal {
        Some(o) => o.to_string(),
        None => "none".to_string(),
    }
}

/// Errors that abort a migration attempt.
///
/// Every variant except [`MigrationError::Backend`], [`MigrationError::MigrationFailed`] and
/// [`MigrationError::InvalidManifest`] is an invariant violation of the ledger and carries an
/// [`ErrorCode`]. None of them are worth retrying unchanged.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError<E>
where
    E: std::error::Error + 'static,
{
    /// The proposed ordinal does not follow the last recorded one.
    #[error(
        "missing_migration: migration {name} has ordinal {proposed_ordinal} but the last applied ordinal is {}",
        display_ordinal(.last_ordinal)
    )]
    MissingMigration {
        /// The migration being applied.
        name: String,
        /// The ordinal the caller proposed.
        proposed_ordinal: i32,
        /// The highest recorded ordinal, `None` for an empty ledger.
        last_ordinal: Option<i32>,
    },

    /// The ledger recorded the migration under a different ordinal.
    #[error(
        "incorrect_ordinal: migration {name} is recorded with ordinal {expected} but was proposed with {actual}"
    )]
    IncorrectOrdinal {
        /// The migration being applied.
        name: String,
        /// The ordinal stored in the ledger.
        expected: i32,
        /// The ordinal the caller proposed.
        actual: i32,
    },

    /// The records relation holds more than one row for a name.
    #[error("pg_migrations_uniqueness_error: {count} records found for migration {name}")]
    MigrationsUniqueness {
        /// The duplicated migration name.
        name: String,
        /// How many rows were found.
        count: usize,
    },

    /// The run relation holds more than one row for a provenance tuple.
    #[error("pg_migrate_uniqueness_error: {count} runs found for {provenance}")]
    RunUniqueness {
        /// The duplicated tuple.
        provenance: ProvenanceTuple,
        /// How many rows were found.
        count: usize,
    },

    /// The ledger has already moved past the manifest.
    #[error(
        "old_manifest: manifest ends at ordinal {manifest_ordinal} but the ledger has applied up to {last_ordinal}"
    )]
    OldManifest {
        /// The highest ordinal in the manifest.
        manifest_ordinal: i32,
        /// The highest ordinal in the ledger.
        last_ordinal: i32,
    },

    /// The catalog lists a ledger object more than once.
    #[error("duplicate_catalog_entry: {count} catalog entries found for {object}")]
    DuplicateCatalogEntry {
        /// The namespace or relation looked up.
        object: String,
        /// How many entries were found.
        count: usize,
    },

    /// The manifest handed to the migrator is not a valid sequence.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest {
        /// Why the manifest was rejected.
        reason: String,
    },

    /// A migration body failed. Its effects were rolled back.
    #[error("Migration {name} (ordinal {ordinal}) failed: {source}")]
    MigrationFailed {
        /// The failed migration.
        name: String,
        /// Its ordinal.
        ordinal: i32,
        /// The error raised by the body.
        #[source]
        source: BoxError,
    },

    /// The storage engine failed.
    #[error("Ledger backend error: {0}")]
    Backend(#[source] E),
}

impl<E> MigrationError<E>
where
    E: std::error::Error + 'static,
{
    /// The structured code of this error, if it is an invariant violation.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MigrationError::MissingMigration { .. } => Some(ErrorCode::MissingMigration),
            MigrationError::IncorrectOrdinal { .. } => Some(ErrorCode::IncorrectOrdinal),
            MigrationError::MigrationsUniqueness { .. } => Some(ErrorCode::MigrationsUniqueness),
            MigrationError::RunUniqueness { .. } => Some(ErrorCode::RunUniqueness),
            MigrationError::OldManifest { .. } => Some(ErrorCode::OldManifest),
            MigrationError::DuplicateCatalogEntry { .. } => Some(ErrorCode::DuplicateCatalogEntry),
            MigrationError::InvalidManifest { .. }
            | MigrationError::MigrationFailed { .. }
            | MigrationError::Backend(_) => None,
        }
    }

    /// Whether this error reports a broken ledger invariant.
    pub fn is_invariant_violation(&self) -> bool {
        self.code().is_some()
    }
}
