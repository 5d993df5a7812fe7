//! Applies a small manifest twice against the in-memory ledger.
//!
//! The second run finds every migration recorded and skips it.

use pgmigrate::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let migrator = Migrator::new(MemLedger::new(), ToolVersions::new("1", "0.4.2", "0.1.0"));

    let migrations = [
        SqlMigration::new("create_users", 0, "CREATE TABLE users (id INT PRIMARY KEY)"),
        SqlMigration::new("add_email", 1, "ALTER TABLE users ADD COLUMN email TEXT"),
    ];
    let manifest: Vec<&dyn Migration<MemTransaction>> = migrations
        .iter()
        .map(|m| m as &dyn Migration<MemTransaction>)
        .collect();

    let first = migrator.run(&manifest).await?;
    println!("First run applied: {:?}", first.applied);

    let second = migrator.run(&manifest).await?;
    println!("Second run skipped: {:?}", second.skipped);

    for record in migrator.applied().await? {
        println!("{} -> ordinal {} (run {})", record.name, record.ordinal, record.run_id);
    }

    Ok(())
}
