//! Migration definitions.

use crate::error::BoxError;
use async_trait::async_trait;

/// A single migration: a unique name, its ordinal and a body.
///
/// `T` is the ledger transaction the body runs in. The body's effects commit together with
/// the migration record, or not at all.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use pgmigrate_core::{BoxError, Migration};
/// use pgmigrate_pg::PgLedgerTransaction;
///
/// pub struct CreateUsers;
///
/// #[async_trait]
/// impl Migration<PgLedgerTransaction> for CreateUsers {
///     fn name(&self) -> &str { "create_users" }
///
///     fn ordinal(&self) -> i32 { 0 }
///
///     async fn up(&self, tx: &mut PgLedgerTransaction) -> Result<(), BoxError> {
///         sqlx::query("CREATE TABLE users (id INT)")
///             .execute(&mut **tx)
///             .await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Migration<T>: Send + Sync {
    /// Unique name, e.g. `create_users`.
    fn name(&self) -> &str;

    /// Position in the total application order, starting at 0.
    fn ordinal(&self) -> i32;

    /// Executes the body inside the provided transaction.
    ///
    /// The transaction is managed by the migrator - do not commit or rollback.
    async fn up(&self, tx: &mut T) -> Result<(), BoxError>;
}

/// A finished migration script.
///
/// Backends implement [`Migration`] for it by executing `sql` as-is, which may contain several
/// statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    /// Unique migration name.
    pub name: String,
    /// Position in the total application order.
    pub ordinal: i32,
    /// The script body.
    pub sql: String,
}

impl SqlMigration {
    /// Creates a new script migration.
    pub fn new(name: impl Into<String>, ordinal: i32, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal,
            sql: sql.into(),
        }
    }
}
