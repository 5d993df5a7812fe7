//! Provenance recording: the sole writer of both ledger relations.

use crate::error::MigrationError;
use crate::ledger::{LedgerTransaction, ToolVersions};

/// Records a completed migration.
///
/// Finds or creates the run row for the caller's tool versions plus the live database version,
/// then appends the migration record pointing at it. Runs after the body and before commit, so
/// the record and the body's effects land together.
///
/// Returns the identity of the run the record belongs to.
pub async fn record<T>(
    tx: &mut T,
    name: &str,
    ordinal: i32,
    versions: &ToolVersions,
) -> Result<i32, MigrationError<T::Error>>
where
    T: LedgerTransaction,
{
    let database_version = tx
        .database_version()
        .await
        .map_err(MigrationError::Backend)?;
    let provenance = versions.with_database_version(database_version);

    tx.upsert_run(&provenance)
        .await
        .map_err(MigrationError::Backend)?;
    let runs = tx
        .find_runs(&provenance)
        .await
        .map_err(MigrationError::Backend)?;

    let run_id = match runs.as_slice() {
        [run] => run.id,
        // The upsert leaves at least one row behind, so an empty result is as broken as two rows.
        other => {
            return Err(MigrationError::RunUniqueness {
                provenance,
                count: other.len(),
            });
        }
    };

    tx.insert_migration(name, ordinal, run_id)
        .await
        .map_err(MigrationError::Backend)?;

    log::debug!(
        "Recorded migration {} (ordinal {}) under run {}",
        name,
        ordinal,
        run_id
    );

    Ok(run_id)
}
