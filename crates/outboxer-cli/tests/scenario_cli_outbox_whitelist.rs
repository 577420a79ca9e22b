//! Scenario: `outboxer outbox whitelist <id>` un-blocklists a real row
//! (§7, §12.1). Skipped when `OUTBOXER_DATABASE_URL` is not set.

use outboxer_db::{migrate, PersistorConfig, SqlxPersistor};
use outboxer_schemas::Entry;

#[tokio::test]
async fn whitelist_clears_blocklisted_flag_through_the_cli() -> anyhow::Result<()> {
    let url = match std::env::var(outboxer_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", outboxer_db::ENV_DB_URL);
            return Ok(());
        }
    };

    let dialect = outboxer_db::dialect_for_url(&url);
    let pool = match outboxer_db::connect(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };
    migrate(&pool, &dialect, "txno_outbox").await?;

    let persistor = SqlxPersistor::new(dialect, PersistorConfig::default());
    let mut entry = Entry::new_pending(
        "cli-whitelist-1".into(),
        "{}".into(),
        None,
        chrono::Utc::now(),
    );
    entry.attempts = 5;
    entry.blocklisted = true;
    persistor.save(&pool, &entry).await?;

    let mut cmd = assert_cmd::Command::cargo_bin("outboxer")?;
    cmd.env(outboxer_db::ENV_DB_URL, &url)
        .args(["outbox", "whitelist", "cli-whitelist-1"]);
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("whitelisted=true"));

    Ok(())
}
