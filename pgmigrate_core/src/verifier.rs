//! Ordering checks against the ledger history.

use crate::error::MigrationError;
use crate::ledger::LedgerTransaction;

/// Verifies that `name` may be applied at `proposed_ordinal`.
///
/// A migration the ledger has never seen must take the ordinal right after the last recorded
/// one (0 on an empty ledger). A recorded migration must keep the ordinal it was recorded with.
pub async fn verify<T>(
    tx: &mut T,
    name: &str,
    proposed_ordinal: i32,
) -> Result<(), MigrationError<T::Error>>
where
    T: LedgerTransaction,
{
    let found = tx
        .find_migrations(name)
        .await
        .map_err(MigrationError::Backend)?;

    match found.as_slice() {
        [] => {
            let last_ordinal = tx.last_ordinal().await.map_err(MigrationError::Backend)?;
            let expected = match last_ordinal {
                None => Some(0),
                Some(last) => last.checked_add(1),
            };
            if expected != Some(proposed_ordinal) {
                return Err(MigrationError::MissingMigration {
                    name: name.to_string(),
                    proposed_ordinal,
                    last_ordinal,
                });
            }
            Ok(())
        }
        [existing] => {
            if existing.ordinal != proposed_ordinal {
                return Err(MigrationError::IncorrectOrdinal {
                    name: name.to_string(),
                    expected: existing.ordinal,
                    actual: proposed_ordinal,
                });
            }
            Ok(())
        }
        many => Err(MigrationError::MigrationsUniqueness {
            name: name.to_string(),
            count: many.len(),
        }),
    }
}

/// Rejects a manifest whose highest ordinal is behind the ledger.
pub async fn verify_manifest_is_not_old<T>(
    tx: &mut T,
    manifest_ordinal: i32,
) -> Result<(), MigrationError<T::Error>>
where
    T: LedgerTransaction,
{
    match tx.last_ordinal().await.map_err(MigrationError::Backend)? {
        Some(last_ordinal) if last_ordinal > manifest_ordinal => Err(MigrationError::OldManifest {
            manifest_ordinal,
            last_ordinal,
        }),
        _ => Ok(()),
    }
}
