//! # pgmigrate core
//!
//! The migration ledger and its exactly-once, strictly ordered application protocol,
//! independent of the storage engine.
//!
//! Backends implement [`LedgerBackend`] and [`LedgerTransaction`]; the [`Migrator`] drives
//! them through the [`gate`], [`verifier`] and [`recorder`] steps.

#![deny(missing_docs)]

mod error;
mod ledger;
mod migration;
mod migrator;

/// The idempotency gate
pub mod gate;
/// Ledger writes
pub mod recorder;
/// Ordering checks
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use error::{BoxError, ErrorCode, MigrationError};
pub use gate::GateDecision;
pub use ledger::{
    LedgerBackend, LedgerTransaction, MigrationRecord, MigrationRun, ProvenanceTuple,
    ToolVersions,
};
pub use migration::{Migration, SqlMigration};
pub use migrator::{ApplyOutcome, Migrator, RunSummary};

pub mod prelude {
    //! The prelude module for the `pgmigrate_core` crate.
    pub use super::{
        ApplyOutcome, BoxError, ErrorCode, LedgerBackend, LedgerTransaction, Migration,
        MigrationError, MigrationRecord, MigrationRun, Migrator, SqlMigration, ToolVersions,
    };
}
