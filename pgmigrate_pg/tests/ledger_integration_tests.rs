mod common;

use pgmigrate_core::prelude::*;
use pgmigrate_pg::{LedgerConfig, PgLedger, PgLedgerError, PgLedgerTransaction};
use serial_test::serial;
use sqlx::PgPool;
use std::time::Duration;

const TEST_TABLES: &[&str] = &[
    "pgm_test_users",
    "pgm_test_orders",
    "pgm_test_items",
    "pgm_test_half",
    "pgm_test_race",
];

async fn teardown(pool: &PgPool) {
    for table in TEST_TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(pool)
            .await
            .expect("Failed to drop test table");
    }
    sqlx::query("DROP SCHEMA IF EXISTS pgmigrate CASCADE")
        .execute(pool)
        .await
        .expect("Failed to drop ledger schema");
    // Unqualified variant
    sqlx::query("DROP TABLE IF EXISTS pg_migrations CASCADE")
        .execute(pool)
        .await
        .expect("Failed to drop migrations table");
    sqlx::query("DROP TABLE IF EXISTS pg_migrate CASCADE")
        .execute(pool)
        .await
        .expect("Failed to drop runs table");
}

fn versions() -> ToolVersions {
    ToolVersions::new("1", "0.4.2", "0.1.0")
}

fn migrator(pool: &PgPool) -> Migrator<PgLedger> {
    Migrator::new(PgLedger::new(pool.clone()), versions())
}

fn manifest() -> Vec<SqlMigration> {
    vec![
        SqlMigration::new(
            "create_users",
            0,
            "CREATE TABLE pgm_test_users (id INT PRIMARY KEY)",
        ),
        SqlMigration::new(
            "create_orders",
            1,
            "CREATE TABLE pgm_test_orders (id INT PRIMARY KEY, user_id INT REFERENCES pgm_test_users(id))",
        ),
        SqlMigration::new(
            "create_items",
            2,
            "CREATE TABLE pgm_test_items (id INT); CREATE INDEX ON pgm_test_items (id)",
        ),
    ]
}

fn as_manifest(migrations: &[SqlMigration]) -> Vec<&dyn Migration<PgLedgerTransaction>> {
    migrations
        .iter()
        .map(|m| m as &dyn Migration<PgLedgerTransaction>)
        .collect()
}

async fn table_count(pool: &PgPool, schema_sql: &str, table: &str) -> i64 {
    let sql = format!(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = {schema_sql} AND table_name = $1"
    );
    let (count,): (i64,) = sqlx::query_as(&sql)
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("Failed to query information_schema");
    count
}

#[tokio::test]
#[serial]
async fn test_provisions_ledger_relations() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let ledger = PgLedger::new(pool.clone());
    ledger.ensure_ledger_exists().await.expect("Should provision");
    ledger
        .ensure_ledger_exists()
        .await
        .expect("Should provision again");

    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 1);
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrate").await, 1);

    let (columns,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM information_schema.columns
        WHERE table_schema = 'pgmigrate'
          AND table_name = 'pg_migrations'
          AND column_name IN ('name', 'ordinal', 'created', 'finalized', 'pg_migrate_id')
        "#,
    )
    .fetch_one(&pool)
    .await
    .expect("Failed to query columns");
    assert_eq!(columns, 5);

    let (unique_index,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM pg_indexes WHERE schemaname = 'pgmigrate' AND indexname = 'pg_migrate_unique_index'",
    )
    .fetch_one(&pool)
    .await
    .expect("Failed to query indexes");
    assert_eq!(unique_index, 1);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_provisioning() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let ledger = PgLedger::new(pool.clone());
    let (a, b, c) = tokio::join!(
        ledger.ensure_ledger_exists(),
        ledger.ensure_ledger_exists(),
        ledger.ensure_ledger_exists()
    );
    a.expect("First provisioner should succeed");
    b.expect("Second provisioner should succeed");
    c.expect("Third provisioner should succeed");

    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 1);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_missing_relation_is_recreated() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    migrator
        .backend()
        .ensure_ledger_exists()
        .await
        .expect("Should provision");

    sqlx::query("DROP TABLE pgmigrate.pg_migrations")
        .execute(&pool)
        .await
        .expect("Failed to drop migrations table");
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 0);

    migrator
        .backend()
        .ensure_ledger_exists()
        .await
        .expect("Should recreate the missing relation");
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 1);
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrate").await, 1);
    assert!(migrator.applied().await.unwrap().is_empty());

    let migrations = manifest();
    let outcome = migrator
        .apply(&migrations[0])
        .await
        .expect("Recreated ledger should record migrations");
    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    assert_eq!(migrator.last_ordinal().await.unwrap(), Some(0));

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_empty_schema_is_provisioned() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    sqlx::query("CREATE SCHEMA pgmigrate")
        .execute(&pool)
        .await
        .expect("Failed to create ledger schema");

    let migrator = migrator(&pool);
    migrator
        .backend()
        .ensure_ledger_exists()
        .await
        .expect("Should provision into the existing schema");
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 1);
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrate").await, 1);

    let migrations = manifest();
    let summary = migrator
        .run(&as_manifest(&migrations))
        .await
        .expect("Should apply manifest");
    assert_eq!(summary.applied.len(), 3);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_run_applies_manifest_once() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    let migrations = manifest();
    let manifest = as_manifest(&migrations);

    let summary = migrator.run(&manifest).await.expect("Should run manifest");
    assert_eq!(
        summary.applied,
        vec!["create_users", "create_orders", "create_items"]
    );
    assert!(summary.skipped.is_empty());

    assert_eq!(table_count(&pool, "current_schema()", "pgm_test_items").await, 1);

    let summary = migrator.run(&manifest).await.expect("Should run manifest again");
    assert!(summary.applied.is_empty());
    assert_eq!(summary.skipped.len(), 3);

    let applied = migrator.applied().await.expect("Should list applied");
    let ordinals: Vec<i32> = applied.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    assert!(applied.iter().all(|m| m.finalized));
    assert_eq!(migrator.last_ordinal().await.unwrap(), Some(2));
    assert!(migrator.pending(&manifest).await.unwrap().is_empty());

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_ordering_violations_are_rejected() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    let migrations = manifest();

    let err = migrator
        .apply(&migrations[1])
        .await
        .expect_err("Ordinal 1 on an empty ledger should fail");
    assert_eq!(err.code(), Some(ErrorCode::MissingMigration));

    migrator.apply(&migrations[0]).await.unwrap();
    migrator.apply(&migrations[1]).await.unwrap();

    let gap = SqlMigration::new("create_later", 3, "CREATE TABLE pgm_test_items (id INT)");
    let err = migrator.apply(&gap).await.expect_err("Gap should fail");
    assert!(matches!(
        err,
        MigrationError::MissingMigration {
            proposed_ordinal: 3,
            last_ordinal: Some(1),
            ..
        }
    ));
    assert_eq!(table_count(&pool, "current_schema()", "pgm_test_items").await, 0);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_failed_body_rolls_back() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    let broken = SqlMigration::new(
        "half_done",
        0,
        "CREATE TABLE pgm_test_half (id INT); CREATE TABL oops (id INT)",
    );

    let err = migrator.apply(&broken).await.expect_err("Should fail");
    assert!(matches!(err, MigrationError::MigrationFailed { ordinal: 0, .. }));

    assert_eq!(table_count(&pool, "current_schema()", "pgm_test_half").await, 0);
    assert!(migrator.applied().await.unwrap().is_empty());
    assert!(migrator.runs().await.unwrap().is_empty());

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_attempts_apply_once() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    // Provision first so both attempts race on the lock, not on provisioning.
    PgLedger::new(pool.clone())
        .ensure_ledger_exists()
        .await
        .unwrap();

    let attempt = |pool: PgPool| {
        tokio::spawn(async move {
            let migration = SqlMigration::new(
                "create_race",
                0,
                "CREATE TABLE pgm_test_race (id INT); SELECT pg_sleep(0.2)",
            );
            migrator(&pool).apply(&migration).await
        })
    };

    let (a, b) = tokio::join!(attempt(pool.clone()), attempt(pool.clone()));
    let mut outcomes = vec![
        a.unwrap().expect("First attempt should not fail"),
        b.unwrap().expect("Second attempt should not fail"),
    ];
    outcomes.sort_by_key(|o| o.code().is_some());

    assert!(matches!(outcomes[0], ApplyOutcome::Applied { .. }));
    assert_eq!(outcomes[1], ApplyOutcome::AlreadyApplied);

    let migrator = migrator(&pool);
    assert_eq!(migrator.applied().await.unwrap().len(), 1);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_provenance_is_deduplicated() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    let migrations = manifest();
    migrator.apply(&migrations[0]).await.unwrap();
    migrator.apply(&migrations[1]).await.unwrap();

    let runs = migrator.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].provenance.database_version.starts_with("PostgreSQL"));
    assert_eq!(runs[0].provenance.builder_version, "0.4.2");

    let other = Migrator::new(
        PgLedger::new(pool.clone()),
        ToolVersions::new("1", "0.5.0", "0.1.0"),
    );
    other.apply(&migrations[2]).await.unwrap();

    let runs = migrator.runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    let run_ids: Vec<i32> = migrator
        .applied()
        .await
        .unwrap()
        .iter()
        .map(|m| m.run_id)
        .collect();
    assert_eq!(run_ids, vec![runs[0].id, runs[0].id, runs[1].id]);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_stale_manifest_is_rejected() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let migrator = migrator(&pool);
    let migrations = manifest();
    migrator.run(&as_manifest(&migrations)).await.unwrap();

    let stale = as_manifest(&migrations[..2]);
    let err = migrator.run(&stale).await.expect_err("Stale manifest should fail");
    assert_eq!(err.code(), Some(ErrorCode::OldManifest));
    assert_eq!(
        err.to_string(),
        "old_manifest: manifest ends at ordinal 1 but the ledger has applied up to 2"
    );

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_unqualified_ledger() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let ledger = PgLedger::with_config(pool.clone(), LedgerConfig::unqualified())
        .expect("Unqualified config is valid");
    let migrator = Migrator::new(ledger, versions());
    let migrations = manifest();
    migrator.apply(&migrations[0]).await.unwrap();

    assert_eq!(table_count(&pool, "current_schema()", "pg_migrations").await, 1);
    assert_eq!(table_count(&pool, "'pgmigrate'", "pg_migrations").await, 0);
    assert_eq!(migrator.applied().await.unwrap().len(), 1);

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_lock_timeout_aborts_waiting_attempt() {
    let pool = common::get_pg_pool().await;
    teardown(&pool).await;

    let holder = PgLedger::new(pool.clone());
    holder.ensure_ledger_exists().await.unwrap();
    let held = holder.begin().await.expect("Should take the ledger lock");

    let config = LedgerConfig {
        lock_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let impatient = Migrator::new(
        PgLedger::with_config(pool.clone(), config).unwrap(),
        versions(),
    );
    let migrations = manifest();

    let err = impatient
        .apply(&migrations[0])
        .await
        .expect_err("Should time out waiting for the lock");
    assert!(matches!(
        err,
        MigrationError::Backend(PgLedgerError::Database(_))
    ));
    assert_eq!(err.code(), None);

    held.rollback().await.unwrap();

    let outcome = impatient.apply(&migrations[0]).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));

    teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_invalid_schema_is_rejected() {
    let pool = common::get_pg_pool().await;
    let err = PgLedger::with_config(pool, LedgerConfig::with_schema("")).unwrap_err();
    assert!(matches!(err, PgLedgerError::InvalidIdentifier(_)));
}
