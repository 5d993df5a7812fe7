//! A scriptable ledger transaction for unit tests.
//!
//! Unlike a real engine it enforces no constraints, so tests can seed the duplicate rows the
//! defensive branches guard against.

use crate::ledger::{LedgerTransaction, MigrationRecord, MigrationRun, ProvenanceTuple};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("fake ledger error")]
pub(crate) struct FakeError;

#[derive(Debug, Default)]
pub(crate) struct FakeTx {
    pub migrations: Vec<MigrationRecord>,
    pub runs: Vec<MigrationRun>,
    pub database_version: String,
    /// When set, `upsert_run` never inserts, to simulate duplicates seeded elsewhere.
    pub skip_upsert: bool,
}

impl FakeTx {
    pub fn new() -> Self {
        Self {
            database_version: "FakeSQL 1.0".to_string(),
            ..Default::default()
        }
    }

    pub fn with_records(ordinals: &[(&str, i32)]) -> Self {
        let mut tx = Self::new();
        for (name, ordinal) in ordinals {
            tx.migrations.push(record(name, *ordinal, 1));
        }
        tx
    }
}

pub(crate) fn record(name: &str, ordinal: i32, run_id: i32) -> MigrationRecord {
    MigrationRecord {
        name: name.to_string(),
        ordinal,
        created: chrono::Utc::now().naive_utc(),
        finalized: true,
        run_id,
    }
}

#[async_trait]
impl LedgerTransaction for FakeTx {
    type Error = FakeError;

    async fn find_migrations(&mut self, name: &str) -> Result<Vec<MigrationRecord>, FakeError> {
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect())
    }

    async fn last_ordinal(&mut self) -> Result<Option<i32>, FakeError> {
        Ok(self.migrations.iter().map(|m| m.ordinal).max())
    }

    async fn database_version(&mut self) -> Result<String, FakeError> {
        Ok(self.database_version.clone())
    }

    async fn upsert_run(&mut self, provenance: &ProvenanceTuple) -> Result<(), FakeError> {
        if self.skip_upsert || self.runs.iter().any(|r| &r.provenance == provenance) {
            return Ok(());
        }
        let id = self.runs.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        self.runs.push(MigrationRun {
            id,
            provenance: provenance.clone(),
        });
        Ok(())
    }

    async fn find_runs(
        &mut self,
        provenance: &ProvenanceTuple,
    ) -> Result<Vec<MigrationRun>, FakeError> {
        Ok(self
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
    ) -> Result<(), FakeError> {
        self.migrations.push(record(name, ordinal, run_id));
        Ok(())
    }

    async fn commit(self) -> Result<(), FakeError> {
        Ok(())
    }

    async fn rollback(self) -> Result<(), FakeError> {
        Ok(())
    }
}
