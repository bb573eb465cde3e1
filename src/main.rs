use cardauth::application::approvals::ApprovalQueue;
use cardauth::application::engine::AuthorizationEngine;
use cardauth::application::guard::AuthenticationGuard;
use cardauth::application::limits::LimitTracker;
use cardauth::config::EngineConfig;
use cardauth::domain::card::Card;
use cardauth::domain::ports::{ApprovalStoreRef, CardStoreRef, CredentialVerifierRef};
use cardauth::domain::session::Capability;
use cardauth::infrastructure::in_memory::{
    InMemoryApprovalStore, InMemoryCardStore, InMemoryCredentialStore,
};
use cardauth::interfaces::http::{AppState, router};
use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Engine configuration JSON file (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cards and users to load at startup (optional JSON file)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

/// Startup data: cards and users. Credentials here are for operator-seeded
/// deployments; production backends plug in their own `CredentialVerifier`.
#[derive(Deserialize)]
struct Seed {
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    users: Vec<SeedUser>,
}

#[derive(Deserialize)]
struct SeedUser {
    id: String,
    password: String,
    second_factor: Option<String>,
    #[serde(default)]
    capabilities: HashSet<Capability>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };

    let (cards, approvals) = build_stores(&cli)?;

    let credentials = InMemoryCredentialStore::new();
    if let Some(path) = &cli.seed {
        let contents = std::fs::read_to_string(path).into_diagnostic()?;
        let seed: Seed = serde_json::from_str(&contents).into_diagnostic()?;
        for card in seed.cards {
            cards.store(card).await.into_diagnostic()?;
        }
        for user in seed.users {
            credentials
                .add_user(
                    &user.id,
                    &user.password,
                    user.second_factor.as_deref(),
                    user.capabilities,
                )
                .await;
        }
    }
    let verifier: CredentialVerifierRef = Arc::new(credentials);

    let tracker = Arc::new(LimitTracker::new(
        config.reservation_hold(),
        Arc::clone(&cards),
    ));
    let queue = Arc::new(ApprovalQueue::new(approvals, Arc::clone(&tracker)));
    let engine = Arc::new(AuthorizationEngine::new(
        cards,
        Arc::clone(&tracker),
        Arc::clone(&queue),
        config.clone(),
    ));
    let guard = Arc::new(AuthenticationGuard::new(
        verifier,
        config.max_failed_attempts,
        config.lockout(),
        config.session_idle(),
    ));

    spawn_sweeper(
        Arc::clone(&tracker),
        Arc::clone(&queue),
        Arc::clone(&guard),
        config.sweep_interval_secs,
    );

    let app = router(AppState {
        engine,
        queue,
        guard,
    });

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %cli.addr, "listening");
    axum::serve(listener, app).await.into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn build_stores(cli: &Cli) -> Result<(CardStoreRef, ApprovalStoreRef)> {
    use cardauth::infrastructure::rocksdb::RocksDbStore;

    if let Some(db_path) = &cli.db_path {
        let store = RocksDbStore::open(db_path).into_diagnostic()?;
        Ok((Arc::new(store.clone()), Arc::new(store)))
    } else {
        Ok(in_memory_stores())
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn build_stores(_cli: &Cli) -> Result<(CardStoreRef, ApprovalStoreRef)> {
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (CardStoreRef, ApprovalStoreRef) {
    (
        Arc::new(InMemoryCardStore::new()),
        Arc::new(InMemoryApprovalStore::new()),
    )
}

/// Background expiry of stale holds, overdue approvals and idle sessions.
fn spawn_sweeper(
    tracker: Arc<LimitTracker>,
    queue: Arc<ApprovalQueue>,
    guard: Arc<AuthenticationGuard>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let now = Utc::now();
            tracker.sweep_expired(now).await;
            if let Err(e) = queue.sweep_expired(now).await {
                tracing::error!(error = %e, "approval sweep failed");
            }
            guard.expire_idle(now);
        }
    });
}
