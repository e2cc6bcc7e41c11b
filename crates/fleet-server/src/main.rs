//! Binary entry point: parses the CLI, loads and validates config, then
//! starts the REST+WebSocket API, the MCP stdio server, or both depending
//! on `--mode`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use fleet_server::api::RateLimiter;
use fleet_server::config::{ConfigError, ConfigService};
use fleet_server::mcp::McpAdapter;
use fleet_server::services::Services;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_STARTUP_FAILURE: u8 = 3;

const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Http,
    Mcp,
    Hybrid,
}

/// Fleet control plane: REST+WebSocket API and/or an MCP stdio server
/// brokering commands onto real or simulated drones.
#[derive(Debug, Parser)]
#[command(name = "fleet-server", version)]
struct Cli {
    /// Which external surface(s) to start.
    #[arg(long, value_enum, default_value = "hybrid")]
    mode: Mode,

    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Load and validate the config, print the result, then exit without
    /// starting anything.
    #[arg(long)]
    validate_config: bool,

    /// Run the startup sequence (config load + service bootstrap) without
    /// binding any socket or reading stdin, then exit. Intended for
    /// container healthchecks run against the image rather than a live
    /// process.
    #[arg(long)]
    health_check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Both the HTTP and MCP surfaces may run in the same process
    // (`--mode hybrid`), and MCP's JSON-RPC framing owns stdout, so every
    // log line goes to stderr regardless of mode.
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .unwrap();
    let log_format = std::env::var("FLEET_LOG_FORMAT").unwrap_or_default();
    if log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let (config, env_settings) = match ConfigService::load_or_default(&cli.config) {
        Ok(loaded) => loaded,
        Err(err) => {
            report_config_error(&err);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if cli.validate_config {
        println!("config at {:?} is valid ({} drone(s) configured)", cli.config, config.drones.len());
        return ExitCode::from(EXIT_OK);
    }

    if cli.health_check {
        return match Services::bootstrap(config, env_settings).await {
            Ok(services) => {
                services.shutdown().await;
                println!("{{\"status\":\"ok\"}}");
                ExitCode::from(EXIT_OK)
            }
            Err(err) => {
                eprintln!("{{\"status\":\"error\",\"message\":{:?}}}", err.technical_message);
                ExitCode::from(EXIT_STARTUP_FAILURE)
            }
        };
    }

    info!(mode = ?cli.mode, config = ?cli.config, "starting fleet control plane");

    let services = match Services::bootstrap(config, env_settings).await {
        Ok(services) => services,
        Err(err) => {
            error!(error = %err, "failed to bootstrap fleet services");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    services.spawn_background_loops();

    let result = match cli.mode {
        Mode::Http => run_http(Arc::clone(&services)).await,
        Mode::Mcp => run_mcp(Arc::clone(&services)).await,
        Mode::Hybrid => {
            let http = run_http(Arc::clone(&services));
            let mcp = run_mcp(Arc::clone(&services));
            let (http_result, mcp_result) = tokio::join!(http, mcp);
            http_result.and(mcp_result)
        }
    };

    services.shutdown().await;

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            error!(error = %err, "fleet control plane exited with an error");
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

async fn run_http(services: Arc<Services>) -> anyhow::Result<()> {
    let rate_limiter = RateLimiter::new(
        services.config.performance.limits.rate_limit_rps,
        services.config.performance.limits.rate_limit_enabled,
    );
    let app = fleet_server::api::build(Arc::clone(&services), rate_limiter);

    let port = std::env::var("FLEET_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "REST+WebSocket surface listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut shutdown = services.shutdown_receiver();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn run_mcp(services: Arc<Services>) -> anyhow::Result<()> {
    info!("MCP stdio surface listening");
    let adapter = Arc::new(McpAdapter::new(services.clone()));
    adapter.run(services.shutdown_receiver()).await;
    Ok(())
}

fn report_config_error(err: &ConfigError) {
    eprintln!("config error: {err}");
}
