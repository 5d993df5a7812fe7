//! # pgmigrate memory ledger
//!
//! An in-memory implementation of the migration ledger, primarily for testing.
//!
//! # Transaction Support
//!
//! [`MemTransaction`] holds the ledger lock from `begin` until it is committed, rolled back or
//! dropped, so concurrent migration attempts run one after another exactly as they do against
//! PostgreSQL:
//!
//! ```ignore
//! use pgmigrate_core::{Migrator, SqlMigration, ToolVersions};
//! use pgmigrate_mem::MemLedger;
//!
//! let migrator = Migrator::new(MemLedger::new(), ToolVersions::new("1", "1", "1"));
//! let init = SqlMigration::new("init", 0, "CREATE TABLE users (id INT)");
//!
//! migrator.apply(&init).await?;
//! ```
//!
//! Migration bodies call [`MemTransaction::execute`]; executed statements become visible
//! through [`MemLedger::journal`] only once their transaction commits.

#![deny(missing_docs)]

mod ledger;
mod transaction;

pub use ledger::*;
pub use transaction::*;
