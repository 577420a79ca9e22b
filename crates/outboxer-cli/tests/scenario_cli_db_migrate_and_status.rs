//! Scenario: `outboxer db migrate` followed by `outboxer db status` against
//! a real database. Skipped (not failed) when `OUTBOXER_DATABASE_URL` is not
//! set, same gating convention as `mqk-cli`'s `scenario_cli_*` tests.

#[tokio::test]
async fn migrate_then_status_reports_schema_version() -> anyhow::Result<()> {
    let url = match std::env::var(outboxer_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", outboxer_db::ENV_DB_URL);
            return Ok(());
        }
    };

    sqlx::any::install_default_drivers();
    match sqlx::any::AnyPoolOptions::new().max_connections(2).connect(&url).await {
        Ok(pool) => drop(pool),
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };

    let mut migrate_cmd = assert_cmd::Command::cargo_bin("outboxer")?;
    migrate_cmd
        .env(outboxer_db::ENV_DB_URL, &url)
        .args(["db", "migrate"]);
    migrate_cmd
        .assert()
        .success()
        .stdout(predicates::str::contains("migrations_applied=true"));

    let mut status_cmd = assert_cmd::Command::cargo_bin("outboxer")?;
    status_cmd.env(outboxer_db::ENV_DB_URL, &url).args(["db", "status"]);
    status_cmd
        .assert()
        .success()
        .stdout(predicates::str::contains("db_ok=true"));

    Ok(())
}
