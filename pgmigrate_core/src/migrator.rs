//! The application protocol.
//!
//! Every attempt runs in one serializable transaction that takes the exclusive ledger lock
//! before reading anything:
//!
//! ```text
//! begin + lock -> gate --(already applied)--------------------------> commit
//!                      \--(proceed)--> verify -> body -> record ----> commit
//! ```
//!
//! Any error after `begin` rolls the whole attempt back, the body's effects included.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pgmigrate_core::{Migrator, ToolVersions, SqlMigration};
//! use pgmigrate_pg::PgLedger;
//!
//! let migrator = Migrator::new(PgLedger::new(pool), ToolVersions::new("1", "0.4.2", "0.1.0"));
//! let init = SqlMigration::new("init", 0, "CREATE TABLE users (id INT)");
//!
//! match migrator.apply(&init).await? {
//!     ApplyOutcome::Applied { .. } => println!("applied"),
//!     ApplyOutcome::AlreadyApplied => println!("nothing to do"),
//! }
//! ```

use crate::error::{ErrorCode, MigrationError};
use crate::gate::{GateDecision, check_and_gate};
use crate::ledger::{LedgerBackend, LedgerTransaction, MigrationRecord, MigrationRun, ToolVersions};
use crate::migration::Migration;
use crate::recorder::record;
use crate::verifier::{verify, verify_manifest_is_not_old};
use std::collections::HashSet;

/// Result of a single migration attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The body ran and the migration was recorded under the run `run_id`.
    Applied {
        /// Identity of the run row the record points at.
        run_id: i32,
    },
    /// The migration was already recorded; the body did not run.
    AlreadyApplied,
}

impl ApplyOutcome {
    /// The signal code of a skip, `None` when the body ran.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ApplyOutcome::Applied { .. } => None,
            ApplyOutcome::AlreadyApplied => Some(ErrorCode::MigrationExists),
        }
    }
}

/// What a manifest run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Names of the migrations whose bodies ran, in order.
    pub applied: Vec<String>,
    /// Names of the migrations that were already recorded.
    pub skipped: Vec<String>,
}

/// Applies migrations against a ledger backend.
#[derive(Debug, Clone)]
pub struct Migrator<B> {
    backend: B,
    versions: ToolVersions,
}

impl<B> Migrator<B>
where
    B: LedgerBackend,
{
    /// Creates a migrator recording `versions` as the provenance of what it applies.
    pub fn new(backend: B, versions: ToolVersions) -> Self {
        Self { backend, versions }
    }

    /// The ledger backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The tool versions recorded with every applied migration.
    pub fn versions(&self) -> &ToolVersions {
        &self.versions
    }

    /// Applies a single migration exactly once.
    ///
    /// Provisions the ledger, then runs the gate, the ordinal check, the body and the recorder
    /// in one locked serializable transaction.
    pub async fn apply(
        &self,
        migration: &dyn Migration<B::Transaction>,
    ) -> Result<ApplyOutcome, MigrationError<B::Error>> {
        self.backend.ensure_ledger_exists().await?;

        let mut tx = self.backend.begin().await.map_err(MigrationError::Backend)?;
        match self.apply_locked(&mut tx, migration).await {
            Ok(outcome) => {
                tx.commit().await.map_err(MigrationError::Backend)?;
                if let ApplyOutcome::Applied { .. } = outcome {
                    log::info!(
                        "Migration {} (ordinal {}) applied successfully",
                        migration.name(),
                        migration.ordinal()
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                log::warn!(
                    "Migration {} (ordinal {}) aborted: {}",
                    migration.name(),
                    migration.ordinal(),
                    e
                );
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!(
                        "Rollback of migration {} failed: {}",
                        migration.name(),
                        rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_locked(
        &self,
        tx: &mut B::Transaction,
        migration: &dyn Migration<B::Transaction>,
    ) -> Result<ApplyOutcome, MigrationError<B::Error>> {
        let name = migration.name();
        let ordinal = migration.ordinal();

        if check_and_gate(tx, name).await? == GateDecision::AlreadyApplied {
            log::debug!(
                "Skipping migration {} (ordinal {}): already applied",
                name,
                ordinal
            );
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        verify(tx, name, ordinal).await?;

        log::info!("Running migration {} (ordinal {})...", name, ordinal);
        migration
            .up(tx)
            .await
            .map_err(|source| MigrationError::MigrationFailed {
                name: name.to_string(),
                ordinal,
                source,
            })?;

        let run_id = record(tx, name, ordinal, &self.versions).await?;
        Ok(ApplyOutcome::Applied { run_id })
    }

    /// Fails with `old_manifest` if the ledger has recorded an ordinal beyond `manifest_ordinal`.
    pub async fn verify_manifest_is_not_old(
        &self,
        manifest_ordinal: i32,
    ) -> Result<(), MigrationError<B::Error>> {
        self.backend.ensure_ledger_exists().await?;

        let mut tx = self.backend.begin().await.map_err(MigrationError::Backend)?;
        match verify_manifest_is_not_old(&mut tx, manifest_ordinal).await {
            Ok(()) => tx.commit().await.map_err(MigrationError::Backend),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback of manifest check failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Applies a manifest in order.
    ///
    /// The manifest must list unique names with strictly increasing ordinals. It is rejected
    /// with `old_manifest` before anything runs if the ledger is already past its last ordinal.
    /// Each migration is applied in its own transaction; the first failure stops the run and
    /// leaves the migrations applied before it committed.
    pub async fn run(
        &self,
        manifest: &[&dyn Migration<B::Transaction>],
    ) -> Result<RunSummary, MigrationError<B::Error>> {
        validate_manifest(manifest)?;

        let mut summary = RunSummary::default();
        let Some(last) = manifest.last() else {
            return Ok(summary);
        };

        self.verify_manifest_is_not_old(last.ordinal()).await?;

        for migration in manifest {
            match self.apply(*migration).await? {
                ApplyOutcome::Applied { .. } => summary.applied.push(migration.name().to_string()),
                ApplyOutcome::AlreadyApplied => {
                    summary.skipped.push(migration.name().to_string())
                }
            }
        }

        log::info!(
            "Manifest run finished: {} applied, {} already applied",
            summary.applied.len(),
            summary.skipped.len()
        );

        Ok(summary)
    }

    /// Returns the manifest entries that are not recorded yet.
    pub async fn pending<'m>(
        &self,
        manifest: &[&'m dyn Migration<B::Transaction>],
    ) -> Result<Vec<&'m dyn Migration<B::Transaction>>, MigrationError<B::Error>> {
        let applied: HashSet<String> = self.applied().await?.into_iter().map(|m| m.name).collect();

        Ok(manifest
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .copied()
            .collect())
    }

    /// Lists every applied migration ordered by ordinal.
    pub async fn applied(&self) -> Result<Vec<MigrationRecord>, MigrationError<B::Error>> {
        self.backend.ensure_ledger_exists().await?;
        self.backend.applied().await.map_err(MigrationError::Backend)
    }

    /// Returns the highest applied ordinal, `None` if nothing was applied.
    pub async fn last_ordinal(&self) -> Result<Option<i32>, MigrationError<B::Error>> {
        Ok(self.applied().await?.last().map(|m| m.ordinal))
    }

    /// Lists every run row ordered by identity.
    pub async fn runs(&self) -> Result<Vec<MigrationRun>, MigrationError<B::Error>> {
        self.backend.ensure_ledger_exists().await?;
        self.backend.runs().await.map_err(MigrationError::Backend)
    }
}

fn validate_manifest<T, E>(manifest: &[&dyn Migration<T>]) -> Result<(), MigrationError<E>>
where
    E: std::error::Error + 'static,
{
    let mut names = HashSet::new();
    let mut previous: Option<i32> = None;

    for migration in manifest {
        if !names.insert(migration.name()) {
            return Err(MigrationError::InvalidManifest {
                reason: format!("migration {} is listed more than once", migration.name()),
            });
        }
        if let Some(prev) = previous {
            if migration.ordinal() <= prev {
                return Err(MigrationError::InvalidManifest {
                    reason: format!(
                        "migration {} has ordinal {} which does not follow {}",
                        migration.name(),
                        migration.ordinal(),
                        prev
                    ),
                });
            }
        }
        previous = Some(migration.ordinal());
    }

    Ok(())
}
