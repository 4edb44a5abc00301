#![forbid(unsafe_code)]

//! repowatch: keeps a merged view of local clones and their remote
//! counterparts, and streams changes to connected viewers.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use repowatch_daemon::{
    collect::{GhClient, GitScanner},
    config::{expand, Config, DEFAULT_CONFIG_PATH},
    events::Event,
    http,
    hub::Hub,
    scheduler::{stopped, Poller},
    store::Store,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "repowatch", version, about = "Repository monitoring daemon")]
struct Args {
    /// Config file (TOML). Created on first `PUT /api/config`.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override the configured state directory.
    #[arg(long)]
    state_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = expand(&args.config);
    let mut config = Config::load_from(&config_path)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    config.validate()?;
    info!(config = %config_path.display(), ?config, "starting repowatch");

    let listen: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen))?;
    let grace = config.shutdown_grace();
    let store = Store::new(config.state_root());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hub, hub_task) = Hub::<Event>::spawn(config.subscriber_queue, shutdown_rx.clone());

    let poller = Arc::new(Poller::new(
        Arc::new(RwLock::new(config.clone())),
        store,
        hub,
        Arc::new(GitScanner::default()),
        Arc::new(GhClient::new(config.enrich_concurrency)),
    ));
    let loops = poller.spawn_loops(shutdown_rx.clone());

    let app = http::router(http::AppState::new(Arc::clone(&poller), config_path));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!("listening on http://{listen}");

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopped(&mut server_shutdown).await })
        .await?;

    // Loops finish their in-flight cycle before observing the flag.
    let drain = async {
        for task in loops {
            let _ = task.await;
        }
        let _ = hub_task.await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "in-flight work did not finish within the grace period");
    }
    info!("stopped");
    Ok(())
}
