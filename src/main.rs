use clap::Parser; // for cli
use key_relay::config::{self, Args};
use key_relay::server;
use key_relay::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// this is main async function with tokio
#[tokio::main]
async fn main() {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(&args.log_level);

    let cfg = match config::load_from_path(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, path = %args.config.display(), "failed to load config");
            std::process::exit(1);
        }
    };
    info!(
        domain = %cfg.domain,
        keys = cfg.key_quotas.len(),
        proxies = cfg.proxies.len(),
        direct = cfg.direct_access.is_some(),
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();

    // creating shared state, an empty outbound pool stops us here
    let state = match AppState::from_config(&cfg, shutdown.clone()) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(%err, "cannot start");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %args.listen, "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Some(addr) = args.metrics_listen {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(admin) => {
                info!(%addr, "serving /health and /metrics");
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = server::serve_admin(admin, token).await {
                        error!(%err, "admin listener failed");
                    }
                });
            }
            Err(err) => warn!(%err, %addr, "failed to bind metrics listener, continuing without it"),
        }
    }

    tokio::spawn(wait_for_signal(shutdown.clone()));

    info!(address = %args.listen, log_level = %args.log_level, "starting server");
    if let Err(err) = server::serve(listener, state, shutdown).await {
        error!(%err, "server error");
        std::process::exit(1);
    }
    info!("server stopped gracefully");
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
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
                error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down gracefully");
    shutdown.cancel();
}
