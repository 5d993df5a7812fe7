//! In-memory ledger transaction.
//!
//! The transaction owns the ledger mutex for its whole lifetime and works on a private copy of
//! the state. Commit swaps the copy in; rollback, or dropping the transaction, discards it.

use crate::ledger::{LedgerState, MemLedgerError};
use async_trait::async_trait;
use pgmigrate_core::prelude::*;
use pgmigrate_core::{ProvenanceTuple, SqlMigration};
use tokio::sync::OwnedMutexGuard;

/// A transaction on a [`crate::MemLedger`].
///
/// # Isolation Level
///
/// Only one transaction runs at a time, which is stricter than serializable isolation and
/// matches what the exclusive ledger lock gives on PostgreSQL.
pub struct MemTransaction {
    /// Lock guard held for the transaction duration, holding the committed state
    guard: OwnedMutexGuard<LedgerState>,
    /// Working copy of the state
    pending: LedgerState,
    database_version: String,
    /// Whether the transaction has been consumed (committed or rolled back)
    consumed: bool,
}

impl MemTransaction {
    pub(crate) fn new(guard: OwnedMutexGuard<LedgerState>, database_version: String) -> Self {
        let pending = guard.clone();
        Self {
            guard,
            pending,
            database_version,
            consumed: false,
        }
    }

    /// Executes a statement. The statement lands in the ledger journal on commit.
    pub fn execute(&mut self, statement: impl Into<String>) {
        self.pending.journal.push(statement.into());
    }

    /// Statements executed so far, including uncommitted ones.
    pub fn journal(&self) -> &[String] {
        &self.pending.journal
    }
}

#[async_trait]
impl LedgerTransaction for MemTransaction {
    type Error = MemLedgerError;

    async fn find_migrations(&mut self, name: &str) -> Result<Vec<MigrationRecord>, Self::Error> {
        Ok(self
            .pending
            .migrations
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect())
    }

    async fn last_ordinal(&mut self) -> Result<Option<i32>, Self::Error> {
        Ok(self.pending.migrations.iter().map(|m| m.ordinal).max())
    }

    async fn database_version(&mut self) -> Result<String, Self::Error> {
        Ok(self.database_version.clone())
    }

    async fn upsert_run(&mut self, provenance: &ProvenanceTuple) -> Result<(), Self::Error> {
        if self
            .pending
            .runs
            .iter()
            .any(|r| &r.provenance == provenance)
        {
            return Ok(());
        }
        let id = self.pending.runs.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        self.pending.runs.push(MigrationRun {
            id,
            provenance: provenance.clone(),
        });
        Ok(())
    }

    async fn find_runs(
        &mut self,
        provenance: &ProvenanceTuple,
    ) -> Result<Vec<MigrationRun>, Self::Error> {
        Ok(self
            .pending
            .runs
            .iter()
            .filter(|r| &r.provenance == provenance)
            .cloned()
            .collect())
    }

    async fn insert_migration(
        &mut self,
        name: &str,
        ordinal: i32,
        run_id: i32,
    ) -> Result<(), Self::Error> {
        if self.pending.migrations.iter().any(|m| m.name == name) {
            return Err(MemLedgerError::DuplicateMigration(name.to_string()));
        }
        if !self.pending.runs.iter().any(|r| r.id == run_id) {
            return Err(MemLedgerError::UnknownRun(run_id));
        }
        self.pending.migrations.push(MigrationRecord {
            name: name.to_string(),
            ordinal,
            created: chrono::Utc::now().naive_utc(),
            finalized: true,
            run_id,
        });
        Ok(())
    }

    async fn commit(mut self) -> Result<(), Self::Error> {
        self.consumed = true;
        *self.guard = std::mem::take(&mut self.pending);
        // Lock is released when self is dropped
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), Self::Error> {
        self.consumed = true;
        Ok(())
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if !self.consumed {
            log::debug!(
                "MemTransaction dropped without commit() or rollback(). \
                 Changes were discarded (implicit rollback)."
            );
        }
    }
}

#[async_trait]
impl Migration<MemTransaction> for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    async fn up(&self, tx: &mut MemTransaction) -> Result<(), BoxError> {
        for statement in self.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            tx.execute(statement);
        }
        Ok(())
    }
}
