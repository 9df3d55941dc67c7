use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use device_agent::secret::SecretString;
use device_agent::server::{self, AppState, AuthCredentials};
use device_agent::store::DeviceStore;

fn init_logger() {
    // Use LOG_LEVEL env var (fall back to RUST_LOG for backwards compatibility)
    let filter = env::var("LOG_LEVEL")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_target(false)
        .init();
}

#[derive(Parser)]
#[command(name = "device-agent")]
#[command(about = "Device registration and telemetry endpoint agent", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "AGENT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "AGENT_PORT", default_value_t = 8080)]
    port: u16,

    /// Basic auth username for the registration endpoint
    #[arg(long, env = "AGENT_AUTH_USERNAME", default_value = "cvedix")]
    auth_username: String,

    /// Basic auth password for the registration endpoint
    #[arg(long, env = "AGENT_AUTH_PASSWORD", default_value = "cvedix")]
    auth_password: String,

    /// Preferred registration file path
    #[arg(
        long,
        env = "DEVICE_REGISTRATION_FILE",
        default_value = "./device_registered.json"
    )]
    registration_file: PathBuf,

    /// Fallback registration file path
    #[arg(
        long,
        env = "DEVICE_REGISTRATION_FALLBACK",
        default_value = "/etc/device_registered.json"
    )]
    registration_fallback: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    tracing::info!(
        build_date = device_agent::device::build_date(),
        "Device agent starting"
    );

    let store = Arc::new(DeviceStore::new(vec![
        args.registration_file,
        args.registration_fallback,
    ]));

    // Prime the record off the request path; first load may shell out for
    // the system UUID
    {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.load())
            .await
            .context("Initial configuration load failed")?;
    }

    let app = Arc::new(AppState {
        store,
        auth: AuthCredentials {
            username: args.auth_username,
            password: SecretString::new(args.auth_password),
        },
        started: Instant::now(),
    });

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, server::router(app))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Device agent stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT shutdown signal.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On non-Unix platforms, just wait for Ctrl+C
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        tracing::info!("Received Ctrl+C");
    }
}
