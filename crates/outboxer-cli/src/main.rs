//! `outboxer-cli`: a thin operator CLI over the outbox (§10, §12).
//!
//! Grounded on `mqk-cli/src/main.rs`'s `#[derive(Parser)]`/`#[derive(Subcommand)]`
//! shape and its `Db { Status, Migrate }` nested-subcommand pattern. No
//! reflective proxy exists in this rewrite (§9), so `outbox schedule` takes
//! an explicit `--target`/`--method` pair rather than a generated surrogate.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use outboxer_db::{dialect_for_url, migrate, status};
use outboxer_runtime::OutboxBuilder;
use outboxer_schemas::{ArgValue, Invocation, ScheduleOptions};

#[derive(Parser)]
#[command(name = "outboxer")]
#[command(about = "Transactional outbox operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database schema commands.
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
    /// Outbox operations: schedule, flush, whitelist, GC.
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity and schema-version check (§12.2).
    Status,
    /// Apply the outbox schema, idempotently (§4.2 `migrate`).
    Migrate,
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Enqueue one invocation as a standalone business transaction —
    /// mainly useful for smoke-testing a deployment by hand (§4.4).
    Schedule {
        /// Registered dispatch target name.
        #[arg(long)]
        target: String,
        /// Method name on that target.
        #[arg(long)]
        method: String,
        /// Optional idempotency key (§3's `uniqueRequestId`).
        #[arg(long)]
        unique_request_id: Option<String>,
        /// A single string argument forwarded to the handler, if any.
        #[arg(long)]
        arg: Option<String>,
    },
    /// Run one due-batch scan-and-dispatch cycle and exit (§4.6, §12).
    FlushOnce,
    /// Un-blocklist an entry, resetting its retry count (§7, §12.1).
    Whitelist {
        /// Entry id to un-blocklist.
        id: String,
    },
    /// Run one expired/processed-row GC sweep and exit (§4.2).
    Gc,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let url = std::env::var(outboxer_db::ENV_DB_URL)?;
            let dialect = dialect_for_url(&url);
            let pool = outboxer_db::connect(&url).await?;
            match cmd {
                DbCmd::Status => {
                    let s = status(&pool, "txno_outbox").await?;
                    println!(
                        "db_ok={} has_outbox_table={} schema_version={:?}",
                        s.ok, s.has_outbox_table, s.schema_version
                    );
                }
                DbCmd::Migrate => {
                    migrate(&pool, &dialect, "txno_outbox").await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Outbox { cmd } => {
            let url = std::env::var(outboxer_db::ENV_DB_URL)?;
            let dialect = dialect_for_url(&url);
            let pool = outboxer_db::connect(&url).await?;
            let outbox = Arc::new(OutboxBuilder::new(dialect, pool).build());

            match cmd {
                OutboxCmd::Schedule {
                    target,
                    method,
                    unique_request_id,
                    arg,
                } => {
                    let mut invocation = Invocation::new(target, method);
                    if let Some(arg) = arg {
                        invocation = invocation.with_arg("str", ArgValue::Str(arg));
                    }
                    let mut options = ScheduleOptions::default();
                    if let Some(id) = unique_request_id {
                        options = options.unique_request_id(id);
                    }

                    let mut tx = outbox.begin().await?;
                    let id = outbox.schedule(&mut tx, invocation, options).await?;
                    tx.commit().await?;
                    println!("entry_id={id}");
                }
                OutboxCmd::FlushOnce => {
                    let dispatched = outbox.flush_once().await?;
                    println!("dispatched={dispatched}");
                }
                OutboxCmd::Whitelist { id } => {
                    let whitelisted = outbox.whitelist(&id).await?;
                    println!("whitelisted={whitelisted}");
                }
                OutboxCmd::Gc => {
                    let reaped = outbox.sweep_expired_once().await?;
                    println!("reaped={reaped}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}
