//! Standalone engine host.
//!
//! Loads an engine configuration, installs logging and metrics, follows
//! configuration changes on disk and serves the admin API until SIGINT or
//! SIGTERM. Applications normally embed [`resilience_engine::Engine`]
//! directly; this binary hosts the monitoring side on its own.
//!
//! # Startup Order
//! ```text
//! load config → logging → metrics → engine → config watcher → admin API
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use resilience_engine::config::{load_config, watcher::ConfigWatcher};
use resilience_engine::observability::{logging, metrics};
use resilience_engine::{admin, Engine};

#[derive(Parser)]
#[command(name = "resilience-engine")]
#[command(about = "Host a resilience engine with its admin API", long_about = None)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, default_value = "engine.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(path = %args.config.display(), "resilience-engine v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = Engine::new(config.clone())?;

    let (watcher, updates) = ConfigWatcher::new(&args.config);
    let _watcher = watcher.run()?;
    engine.follow_config_updates(updates);

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        Some(tokio::spawn(admin::serve(engine.clone(), listener)))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    wait_for_signal().await;
    engine.shutdown();

    if let Some(admin) = admin {
        admin.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received");
}
