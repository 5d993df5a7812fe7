use crate::transaction::MemTransaction;
use async_trait::async_trait;
use pgmigrate_core::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Configuration of the in-memory ledger.
#[derive(Debug, Clone)]
pub struct MemLedgerConfig {
    /// The version string reported as the database version.
    pub database_version: String,
}

impl Default for MemLedgerConfig {
    fn default() -> Self {
        Self {
            database_version: format!("pgmigrate_mem {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// The committed contents of the in-memory database.
#[derive(Debug, Clone, Default)]
pub(crate) struct LedgerState {
    pub(crate) provisioned: bool,
    pub(crate) runs: Vec<MigrationRun>,
    pub(crate) migrations: Vec<MigrationRecord>,
    /// Statements executed by migration bodies, standing in for their effects.
    pub(crate) journal: Vec<String>,
}

/// An in-memory migration ledger.
///
/// Useful for testing migration orchestration without a database. The whole state sits behind
/// one mutex: a transaction holds it from `begin` until commit or rollback, which gives the
/// exclusive-lock, serial-order behavior of the PostgreSQL backend.
#[derive(Clone, Debug)]
pub struct MemLedger {
    state: Arc<Mutex<LedgerState>>,
    config: MemLedgerConfig,
}

impl MemLedger {
    /// Creates an empty, unprovisioned ledger.
    pub fn new() -> Self {
        Self::with_config(MemLedgerConfig::default())
    }

    /// Creates an empty, unprovisioned ledger with the given configuration.
    pub fn with_config(config: MemLedgerConfig) -> Self {
        log::debug!("Creating a new MemLedger");
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            config,
        }
    }

    /// A handle on the same data that reports a different database version, as after an
    /// engine upgrade.
    pub fn with_database_version(&self, database_version: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            config: MemLedgerConfig {
                database_version: database_version.into(),
            },
        }
    }

    /// Statements committed by migration bodies, in execution order.
    pub async fn journal(&self) -> Vec<String> {
        self.state.lock().await.journal.clone()
    }
}

impl Default for MemLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned by the in-memory ledger.
#[derive(Debug, thiserror::Error)]
pub enum MemLedgerError {
    /// The ledger relations were used before `ensure_ledger_exists`.
    #[error("Ledger relations do not exist")]
    NotProvisioned,
    /// A record with the same name already exists.
    #[error("Duplicate migration name: {0}")]
    DuplicateMigration(String),
    /// A record referenced a run that does not exist.
    #[error("Unknown migration run: {0}")]
    UnknownRun(i32),
}

#[async_trait]
impl LedgerBackend for MemLedger {
    type Error = MemLedgerError;
    type Transaction = MemTransaction;

    async fn ensure_ledger_exists(&self) -> Result<(), MigrationError<Self::Error>> {
        let mut state = self.state.lock().await;
        if !state.provisioned {
            log::info!("Provisioning in-memory migration ledger");
            state.provisioned = true;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<MemTransaction, Self::Error> {
        let guard = self.state.clone().lock_owned().await;
        if !guard.provisioned {
            return Err(MemLedgerError::NotProvisioned);
        }
        Ok(MemTransaction::new(
            guard,
            self.config.database_version.clone(),
        ))
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>, Self::Error> {
        let state = self.state.lock().await;
        if !state.provisioned {
            return Err(MemLedgerError::NotProvisioned);
        }
        let mut migrations = state.migrations.clone();
        migrations.sort_by_key(|m| m.ordinal);
        Ok(migrations)
    }

    async fn runs(&self) -> Result<Vec<MigrationRun>, Self::Error> {
        let state = self.state.lock().await;
        if !state.provisioned {
            return Err(MemLedgerError::NotProvisioned);
        }
        Ok(state.runs.clone())
    }
}
