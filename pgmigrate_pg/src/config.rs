//! Configuration types for the PostgreSQL ledger.

use crate::PgLedgerError;
use std::time::Duration;

/// Namespace holding the ledger relations by default.
pub const DEFAULT_SCHEMA: &str = "pgmigrate";

/// Name of the run-metadata relation.
pub const RUNS_TABLE: &str = "pg_migrate";

/// Name of the migration-records relation.
pub const MIGRATIONS_TABLE: &str = "pg_migrations";

/// PostgreSQL limit on identifier length, in bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Configuration for the PostgreSQL ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Schema holding the ledger relations.
    ///
    /// `None` places the relations unqualified, in the first schema of the session's
    /// `search_path`.
    pub schema: Option<String>,

    /// Maximum time a migration attempt waits for the ledger lock.
    ///
    /// An attempt that times out is rolled back before it reads or writes anything and can be
    /// retried as a whole. `None` waits indefinitely. Sub-millisecond values round up to 1 ms;
    /// zero is rejected.
    pub lock_timeout: Option<Duration>,

    /// Maximum duration of any single statement inside a migration attempt, the migration body
    /// included. `None` applies no limit; zero is rejected.
    pub statement_timeout: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            schema: Some(DEFAULT_SCHEMA.to_string()),
            lock_timeout: None,
            statement_timeout: None,
        }
    }
}

impl LedgerConfig {
    /// Configuration placing the ledger in `schema`.
    pub fn with_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            ..Default::default()
        }
    }

    /// Configuration placing the ledger on the session's `search_path`.
    pub fn unqualified() -> Self {
        Self {
            schema: None,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PgLedgerError> {
        if let Some(schema) = &self.schema {
            if schema.is_empty() || schema.len() > MAX_IDENTIFIER_LEN || schema.contains('\0') {
                return Err(PgLedgerError::InvalidIdentifier(schema.clone()));
            }
        }
        if self.lock_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PgLedgerError::InvalidTimeout("lock_timeout"));
        }
        if self.statement_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PgLedgerError::InvalidTimeout("statement_timeout"));
        }
        Ok(())
    }

    /// The SQL name of `relation`, qualified with the configured schema.
    pub(crate) fn qualify(&self, relation: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(relation)),
            None => quote_ident(relation),
        }
    }
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
