//! mbguard proxy
//!
//! Inline Modbus TCP firewall:
//! - Relay: client <-> backend PLC, one backend connection per client
//! - Policy: function codes, write gating, rate limiting, replay
//! - Audit: one decision record per inspected request
//! - Ops: /healthz, /readyz, /metrics, /api/stats, /api/decisions

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mbguard_core::error::Result;
use mbguard_proxy::{app_state::AppState, audit::TracingSink, config, router, transport::ProxyServer};

#[derive(Debug, Parser)]
#[command(name = "mbguard-proxy", about = "Inline Modbus TCP protocol firewall")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "mbguard.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, code = e.code().as_str(), "mbguard-proxy failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_from_file(&cli.config)?;
    let app = AppState::from_config(&cfg)?;
    tracing::info!(
        config = %cli.config,
        listen = %cfg.proxy.listen,
        backend = %cfg.proxy.backend,
        policy = %app.policy().summary(),
        "mbguard-proxy starting"
    );

    let drain = app
        .audit()
        .spawn_drain(Arc::new(TracingSink), app.subscribe_shutdown());

    if let Some(ops_listen) = cfg.ops.listen.as_deref() {
        let ops = tokio::net::TcpListener::bind(ops_listen).await?;
        tracing::info!(listen = %ops_listen, "ops endpoints listening");
        let router = router::build_router(app.clone());
        let mut stop = app.subscribe_shutdown();
        tokio::spawn(async move {
            let served = axum::serve(ops, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "ops server failed");
            }
        });
    }

    #[cfg(unix)]
    spawn_reload_on_sighup(app.clone(), cli.config.clone())?;

    let server = ProxyServer::bind(app.clone(), &cfg.proxy.listen).await?;

    let signal_app = app.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_app.shutdown();
        }
    });

    server.serve().await?;

    if drain.await.is_err() {
        tracing::warn!("audit drain task ended abnormally");
    }
    tracing::info!(
        emitted = app.audit().emitted(),
        dropped = app.audit().dropped(),
        "mbguard-proxy stopped"
    );
    Ok(())
}

/// Re-read the config on SIGHUP and swap in the new policy.
///
/// Only the `policy` section is live; relay settings need a restart. A bad
/// file leaves the running policy in place.
#[cfg(unix)]
fn spawn_reload_on_sighup(app: AppState, path: String) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = signal(SignalKind::hangup())?;
    let mut stop = app.subscribe_shutdown();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                r = hup.recv() => {
                    if r.is_none() {
                        break;
                    }
                }
                _ = stop.recv() => break,
            }
            match config::load_from_file(&path).and_then(|cfg| {
                mbguard_proxy::policy::PolicySnapshot::compile(&cfg.policy)
            }) {
                Ok(snapshot) => app.replace_policy(snapshot),
                Err(e) => tracing::warn!(error = %e, path = %path, "config reload rejected; keeping current policy"),
            }
        }
    });
    Ok(())
}
