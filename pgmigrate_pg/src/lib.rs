//! # pgmigrate postgres ledger
//!
//! PostgreSQL implementation of the migration ledger.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pgmigrate_core::{Migrator, SqlMigration, ToolVersions};
//! use pgmigrate_pg::PgLedger;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://...").await?;
//! let migrator = Migrator::new(PgLedger::new(pool), ToolVersions::new("1", "0.4.2", "0.1.0"));
//!
//! let manifest = [
//!     SqlMigration::new("create_users", 0, "CREATE TABLE users (id INT PRIMARY KEY)"),
//!     SqlMigration::new("add_email", 1, "ALTER TABLE users ADD COLUMN email TEXT"),
//! ];
//! let manifest: Vec<_> = manifest.iter().map(|m| m as _).collect();
//!
//! let summary = migrator.run(&manifest).await?;
//! println!("Applied {} migrations", summary.applied.len());
//! ```
//!
//! Every attempt runs in a `SERIALIZABLE` transaction whose first statement after the
//! transaction settings is `LOCK TABLE pg_migrations IN ACCESS EXCLUSIVE MODE`, so concurrent
//! migrators queue up behind each other and each sees the ledger as the previous one left it.

#![deny(missing_docs)]

/// Ledger configuration
pub mod config;

/// The ledger backend
pub mod ledger;

/// The ledger transaction
pub mod transaction;

pub use config::LedgerConfig;
pub use ledger::{PgLedger, PgLedgerError};
pub use transaction::PgLedgerTransaction;
