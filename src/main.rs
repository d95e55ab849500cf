use echogate::config::Config;
use echogate::server::{AppState, Server, PKG_NAME, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                format!("echogate={}", config.log_level)
                    .parse()
                    .expect("valid log directive"),
            ),
        )
        .init();

    print_startup_banner(&config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState::new(config.name.clone()));
    let listen_addr = config.listen_addr();
    let server = Server::bind(listen_addr.as_str(), Arc::clone(&state), shutdown_rx)
        .await
        .map_err(|e| {
            error!(addr = %listen_addr, error = %e, "Failed to bind listener");
            anyhow::anyhow!("Failed to bind {}: {}", listen_addr, e)
        })?
        .with_keep_alive_timeout(config.keep_alive_timeout);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for the accept loop to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!(in_flight = state.in_flight(), "Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting diagnostic server");
    info!(
        host = %config.host,
        port = config.port,
        display_name = config.name.as_deref().unwrap_or(""),
        keep_alive_timeout_secs = config.keep_alive_timeout.as_secs(),
        log_level = %config.log_level,
        "Server configuration"
    );
}
