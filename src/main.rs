use anyhow::Result;
use clap::Parser;
use slip_ledger::approve::{ApprovalCoordinator, SqliteLedger};
use slip_ledger::lookup::LookupTables;
use slip_ledger::queue::PendingQueue;
use slip_ledger::server::{self, AppState};
use slip_ledger::{config, db};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/slip-ledger.db?mode=rwc", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let tables = Arc::new(LookupTables::build());
    let coordinator = Arc::new(ApprovalCoordinator::new(
        tables.clone(),
        Arc::new(SqliteLedger),
    ));
    let queue = Arc::new(PendingQueue::new(
        pool,
        tables,
        coordinator,
        Duration::from_secs(cfg.app.dedup_window_seconds),
    ));

    let addr: SocketAddr = cfg.bind_addr().parse()?;
    let state = AppState::new(queue, cfg.server.allowed_groups.clone());

    info!("starting slip-ledger ingestion server");
    server::serve(addr, state).await
}
