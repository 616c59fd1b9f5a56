//! lp-daemon entry point.
//!
//! This file is intentionally thin: it loads config, sets up tracing,
//! connects and migrates the database, starts the reconcile worker and
//! serves the HTTP API until SIGINT/SIGTERM. Handlers live in `routes.rs`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use lp_accrual::{AccrualClient, AccrualConfig};
use lp_config::{AppConfig, Overrides};
use lp_daemon::{auth::AuthConfig, routes, state::AppState};
use lp_db::PgLedger;
use lp_reconcile::{ReconcileConfig, ReconcileWorker};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

/// Loyalty points ledger service.
#[derive(Debug, Parser)]
#[command(name = "lp-daemon", version)]
struct Args {
    /// Listen address, e.g. `:8080` or `127.0.0.1:8080`.
    #[arg(short = 'a', long = "address")]
    address: Option<String>,

    /// Accrual authority base URL.
    #[arg(short = 'r', long = "accrual-address")]
    accrual_address: Option<String>,

    /// Postgres connection URI.
    #[arg(short = 'd', long = "database-uri")]
    database_uri: Option<String>,

    /// Log level / filter directive.
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,

    /// Optional YAML config file.
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    let overrides = Overrides {
        run_address: args.address,
        accrual_address: args.accrual_address,
        database_uri: args.database_uri,
        log_level: args.log_level,
    };
    let loaded = lp_config::load_from_path(
        args.config.as_deref(),
        |k| std::env::var(k).ok(),
        &overrides,
    )?;
    let cfg = loaded.settings;

    init_tracing(&cfg.log.level);
    info!(config_hash = %loaded.config_hash, "config loaded");

    let secrets = lp_config::resolve_secrets(&cfg, |k| std::env::var(k).ok())?;

    if cfg.database.uri.trim().is_empty() {
        bail!("CONFIG_INVALID database uri is required (-d or DATABASE_URI)");
    }
    let pool = lp_db::connect(&cfg.database.uri, cfg.database.max_connections).await?;
    lp_db::migrate(&pool).await?;
    info!("database migrated");

    let ledger = Arc::new(PgLedger::with_claim_lease(
        pool,
        cfg.reconcile.claim_lease_secs,
    ));

    let accrual = AccrualClient::new(accrual_config(&cfg)).context("accrual client init failed")?;
    let worker = ReconcileWorker::new(
        ledger.clone(),
        Arc::new(accrual),
        ReconcileConfig {
            page_size: cfg.reconcile.page_size,
            idle_delay: cfg.reconcile.idle_delay(),
        },
    )
    .spawn();

    let shared = Arc::new(AppState::new(
        ledger,
        AuthConfig {
            jwt_secret: secrets.jwt_secret,
            access_ttl: chrono::Duration::seconds(cfg.auth.access_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(cfg.auth.refresh_ttl_secs),
            bcrypt_cost: cfg.auth.bcrypt_cost,
        },
    ));

    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = cfg.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("lp-daemon listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed");

    info!("http server stopped, waiting for reconcile worker");
    worker.shutdown().await;

    served
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .init();
}

fn accrual_config(cfg: &AppConfig) -> AccrualConfig {
    AccrualConfig {
        base_url: cfg.accrual.address.clone(),
        timeout: cfg.accrual.timeout(),
        retry_count: cfg.accrual.retry_count,
        retry_wait: cfg.accrual.retry_wait(),
        retry_max_wait: cfg.accrual.retry_max_wait(),
        rate_limit_delay: cfg.accrual.rate_limit_delay(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
