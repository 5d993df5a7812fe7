//! The idempotency gate: decides whether a migration body must run.

use crate::error::{ErrorCode, MigrationError};
use crate::ledger::LedgerTransaction;

/// Outcome of the idempotency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The migration is not recorded; its body must run.
    Proceed,
    /// The migration is already recorded; skip the body but still commit.
    AlreadyApplied,
}

impl GateDecision {
    /// The signal code of a skip, `None` when the migration proceeds.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::AlreadyApplied => Some(ErrorCode::MigrationExists),
        }
    }
}

/// Looks up `name` in the ledger and decides whether its body must run.
///
/// Must be called with the ledger lock held, which every [`LedgerTransaction`] does.
pub async fn check_and_gate<T>(
    tx: &mut T,
    name: &str,
) -> Result<GateDecision, MigrationError<T::Error>>
where
    T: LedgerTransaction,
{
    let found = tx
        .find_migrations(name)
        .await
        .map_err(MigrationError::Backend)?;

    match found.len() {
        0 => Ok(GateDecision::Proceed),
        1 => {
            log::debug!("Migration {} is already recorded, skipping", name);
            Ok(GateDecision::AlreadyApplied)
        }
        count => Err(MigrationError::MigrationsUniqueness {
            name: name.to_string(),
            count,
        }),
    }
}
