//! CLI: serve the endpoints of a JSON gateway configuration.
//!
//! Usage: `gateway [OPTIONS] --config <FILE>`
//!
//! Set RUST_LOG=streamweave_gateway=trace for TRACE-level spans of the producer tree.

use clap::Parser;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use streamweave_gateway::{GatewayConfig, server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Serve API gateway endpoints.
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(
  after_help = r#"Environment variables (override the flags when set):
  GATEWAY_CONFIG   Path to the JSON configuration.
  GATEWAY_LISTEN   Socket address to listen on.

Examples:
  gateway --config gateway.json
  gateway --config gateway.json --listen 127.0.0.1:9000"#
)]
struct Args {
  /// Path to the JSON configuration. Overridden by GATEWAY_CONFIG if set.
  #[arg(long, short, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Socket address to listen on. Overridden by GATEWAY_LISTEN if set.
  #[arg(long, short, value_name = "ADDR", default_value = DEFAULT_LISTEN)]
  listen: String,

  /// Compile the configuration and exit without serving.
  #[arg(long)]
  check: bool,
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(error = %e, "installing ctrl-c handler");
  }
  info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let Some(config_path) = env::var("GATEWAY_CONFIG")
    .ok()
    .map(PathBuf::from)
    .or(args.config)
  else {
    eprintln!("Error: no configuration given (use --config or GATEWAY_CONFIG)");
    process::exit(2);
  };
  let listen = env::var("GATEWAY_LISTEN").unwrap_or(args.listen);

  let endpoints = match GatewayConfig::load(&config_path).and_then(|c| c.build()) {
    Ok(endpoints) => endpoints,
    Err(e) => {
      eprintln!("Error in {}: {}", config_path.display(), e);
      process::exit(1);
    }
  };
  info!(config = %config_path.display(), endpoints = endpoints.len(), "configuration loaded");

  let app = match server::router(endpoints) {
    Ok(app) => app,
    Err(e) => {
      eprintln!("Error in {}: {}", config_path.display(), e);
      process::exit(1);
    }
  };
  if args.check {
    println!("configuration OK");
    return;
  }

  let addr: SocketAddr = match listen.parse() {
    Ok(addr) => addr,
    Err(e) => {
      eprintln!("Error: invalid listen address {listen:?}: {e}");
      process::exit(2);
    }
  };
  let listener = match tokio::net::TcpListener::bind(addr).await {
    Ok(listener) => listener,
    Err(e) => {
      eprintln!("Error binding {addr}: {e}");
      process::exit(1);
    }
  };
  info!(%addr, "gateway listening");

  if let Err(e) = axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
  {
    error!(error = %e, "server error");
    process::exit(1);
  }
  info!("gateway stopped");
}
