//! # ReArise Protocol Server Binary
//!
//! Runs the protocol server with configuration from command-line arguments
//! and environment variables, structured logging, and graceful shutdown on
//! SIGINT, SIGTERM or SIGHUP.
//!
//! ## Usage
//!
//! ```bash
//! # Basic usage with development keys
//! rearise-server
//!
//! # Custom configuration
//! rearise-server --bind 127.0.0.1:8080 --app-version 1.2.0 \
//!     --master-manifest /srv/master_manifest.json
//!
//! # With environment variables
//! export REARISE_TOKEN_KEY=00112233445566778899aabbccddeeff
//! export REARISE_HMAC_KEY=ffeeddccbbaa99887766554433221100
//! export LOG_LEVEL=debug
//! rearise-server
//! ```

use rearise_wire::{server::ServerConfig, shutdown::Shutdown, GameServer};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Main entry point for the protocol server
///
/// The runtime is built by hand so `--worker-threads` sizes it.
///
/// ## Exit Codes
/// - 0: Clean shutdown
/// - 1: Configuration error
/// - 2: Server startup error
/// - 3: Runtime error
fn main() {
    let config = ServerConfig::from_args();

    if let Err(e) = setup_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    info!("Starting ReArise protocol server v{}", rearise_wire::VERSION);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e.internal_message());
        process::exit(1);
    }

    display_startup_info(&config);

    let runtime = match config.build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Runtime startup failed: {}", e.internal_message());
            process::exit(2);
        }
    };

    let code = runtime.block_on(run(config));
    drop(runtime);
    process::exit(code);
}

/// Serve until a shutdown signal arrives, returning the exit code
async fn run(config: ServerConfig) -> i32 {
    let server = match GameServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {}", e.internal_message());
            return 2;
        }
    };

    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            warn!("Signal handling unavailable: {}", e.internal_message());
        }
    });

    match server.start(shutdown).await {
        Ok(()) => {
            info!("Server shut down cleanly");
            0
        }
        Err(e) => {
            error!("Server error: {}", e.internal_message());
            if e.is_critical() {
                2
            } else {
                3
            }
        }
    }
}

/// Setup structured logging based on configuration
///
/// ## Log Format
/// - **Development**: Pretty-printed with colors
/// - **Production** (`ENVIRONMENT=production`): JSON
fn setup_logging(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let is_production = std::env::var("ENVIRONMENT")
        .map(|env| env.to_lowercase() == "production")
        .unwrap_or(false);

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.inner().into())
        .from_env()?
        .add_directive("hyper=info".parse()?)
        .add_directive("tokio=info".parse()?)
        .add_directive("runtime=info".parse()?)
        .add_directive("mio=warn".parse()?);

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();

        info!("Initialized structured JSON logging for production");
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();

        info!("Initialized pretty-printed logging for development");
    }

    Ok(())
}

/// Log a configuration summary on startup
fn display_startup_info(config: &ServerConfig) {
    info!("=== ReArise Protocol Server Configuration ===");
    info!("Version: {}", rearise_wire::VERSION);
    info!("Bind Address: {}", config.bind_addr);
    info!("Public URL: {}", config.public_base_url);
    info!("App Version: {}", config.app_version);
    info!(
        "Master Manifest: {}",
        config
            .master_manifest
            .as_ref()
            .map_or_else(|| "none".to_string(), |path| path.display().to_string())
    );
    info!(
        "Resource Manifest: {}",
        config
            .resource_manifest
            .as_ref()
            .map_or_else(|| "none".to_string(), |path| path.display().to_string())
    );
    info!("Log Level: {}", config.log_level);
    info!("Max Payload Size: {} bytes", config.max_payload_size);
    info!("Request Timeout: {}ms", config.request_timeout_ms);
    info!("Worker Threads: {}", config.get_worker_threads());

    if config.enable_health_check {
        info!("Health endpoint: http://{}/health", config.bind_addr);
    }
    info!("API endpoint: http://{}/api/", config.bind_addr);
    info!("=============================================");
}
