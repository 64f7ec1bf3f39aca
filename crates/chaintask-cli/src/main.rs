//! chaintask - オンチェーンのタスクリストをミラーする API サーバー
//!
//! # 構成
//! - EventSource: JSON-RPC でログをポーリングし Reconciler に流す
//! - REST API / WebSocket: axum
//! - ReminderLoop: 期限前のリマインダー
//!
//! # 終了順序
//! シグナル受信 → EventSource 停止（処理中のバッチを待つ）→ ReminderLoop 停止
//! → HTTP の graceful shutdown

mod config;
mod error;
mod http;
mod ws;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use chaintask_core::app::{Mirror, MirrorBuilder, ReminderHandle};
use chaintask_core::decode::signatures::{SIGNATURES, topic0};
use chaintask_core::impls::{JsonRpcLogSource, RoomHub, SqliteStore};
use chaintask_core::ports::{IdGenerator, SystemClock, UlidGenerator};

use crate::config::Config;
use crate::http::AppState;

#[derive(Parser, Debug)]
#[command(name = "chaintask")]
#[command(version, about = "Mirrors on-chain task lists into a REST and websocket API", long_about = None)]
struct Args {
    /// Path to chaintask.toml
    #[arg(short, long, env = "CHAINTASK_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Overrides server.bind
    #[arg(long)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the mirror and the API (default)
    Serve,
    /// Print the event signatures and their topic hashes
    Topics,
}

fn init_tracing(level: &str) {
    // RUST_LOG wins; a broken filter falls back instead of aborting startup
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match args.command.unwrap_or(Command::Serve) {
        Command::Topics => {
            print_topics();
            Ok(())
        }
        Command::Serve => {
            let mut config = Config::load(args.config.as_deref())?;
            config.apply_env(|key| std::env::var(key).ok());
            if let Some(bind) = args.bind {
                config.server.bind = bind;
            }
            config.validate()?;
            serve(config).await
        }
    }
}

fn print_topics() {
    for signature in SIGNATURES {
        let topic: String = topic0(signature.canonical)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        println!("{:<20} 0x{topic}  {}", signature.name, signature.canonical);
    }
}

async fn serve(config: Config) -> Result<()> {
    let store = if config.store.path.as_os_str() == ":memory:" {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(&config.store.path)
    }
    .with_context(|| format!("opening store {}", config.store.path.display()))?;

    let rpc = JsonRpcLogSource::new(config.chain.rpc_url.clone(), config.chain.request_timeout())
        .context("creating json-rpc client")?;
    let hub = Arc::new(RoomHub::new());
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::new(SystemClock)));

    let mut mirror = MirrorBuilder::new()
        .contract(config.chain.contract()?)
        .task_store(Arc::new(store.clone()))
        .user_store(Arc::new(store))
        .log_source(Arc::new(rpc))
        .notifier(hub.clone())
        .id_generator(Arc::clone(&ids))
        .jwt_secret(config.auth.jwt_secret.as_bytes())
        .token_ttl(config.auth.token_ttl())
        .source_config(config.chain.source_config())
        .reminder_config(config.reminders.reminder_config())
        .build()?;

    let reminders = match mirror.take_reminders() {
        Some(reminders) if config.reminders.enabled => Some(reminders.spawn()),
        _ => {
            tracing::info!("deadline reminders disabled");
            None
        }
    };
    let mirror = Arc::new(mirror);
    mirror.source.start().await;

    let app = http::router(
        AppState {
            mirror: Arc::clone(&mirror),
            hub,
            ids,
        },
        &config.server.cors_origin,
    );
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(
        addr = %config.server.bind,
        contract = %mirror.contract(),
        rpc = %config.chain.rpc_url,
        "chaintask listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(Arc::clone(&mirror), reminders))
        .await
        .context("http server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves once the background work is down, which starts the HTTP drain.
async fn shutdown(mirror: Arc<Mirror>, reminders: Option<ReminderHandle>) {
    wait_for_signal().await;
    mirror.source.stop().await;
    if let Some(reminders) = reminders {
        reminders.shutdown_and_join().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("could not register unix signal handlers, falling back to ctrl-c");
            ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler failed");
        // never resolve rather than shutting down on a broken handler
        std::future::pending::<()>().await;
    }
    tracing::info!("received ctrl-c");
}
