//! # pgmigrate
//!
//! Exactly-once, strictly ordered application of named migrations, safe under concurrent
//! invocation.

#![deny(missing_docs)]

pub use pgmigrate_core::*;

#[cfg(feature = "in-memory")]
/// In-memory ledger backend.
pub mod mem {
    //! Contains the in-memory ledger, mostly useful for tests.
    pub use pgmigrate_mem::*;
}

#[cfg(feature = "postgres")]
/// PostgreSQL ledger backend.
pub mod pg {
    //! Contains the PostgreSQL ledger.
    pub use pgmigrate_pg::*;
}

pub mod prelude {
    //! The prelude module for the `pgmigrate` crate.
    pub use pgmigrate_core::prelude::*;

    #[cfg(feature = "in-memory")]
    pub use super::mem::{MemLedger, MemTransaction};
    #[cfg(feature = "postgres")]
    pub use super::pg::{LedgerConfig, PgLedger, PgLedgerTransaction};
}
