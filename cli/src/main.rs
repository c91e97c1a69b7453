//! chainwire CLI: send JSON-RPC calls over any transport from the terminal.
//!
//! Usage:
//! ```bash
//! # Send a raw JSON-RPC call
//! chainwire call --endpoint https://cloudflare-eth.com --method eth_blockNumber
//!
//! # Same call over WebSocket, with params
//! chainwire call --endpoint wss://node.example --method eth_getBalance \
//!     --params '["0x0000000000000000000000000000000000000000", "latest"]'
//!
//! # Check an endpoint is reachable
//! chainwire ping --endpoint /var/run/geth.ipc
//! ```

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use chainwire::{CallOptions, Provider, ProviderConfig};

#[derive(Parser)]
#[command(
    name = "chainwire",
    about = "JSON-RPC over HTTP, WebSocket and IPC",
    long_about = "
Send JSON-RPC calls to a blockchain node over HTTP, WebSocket or IPC.
The transport is picked from the endpoint: http(s)://, ws(s)://, ipc:// or a socket path.

ENVIRONMENT VARIABLES:
  RUST_LOG                 Log filter (default: warn)
  CHAINWIRE_TIMEOUT_MS     Default request timeout
  CHAINWIRE_MAX_RETRIES    Retry budget for read-only methods
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a JSON-RPC call and print the result
    Call {
        /// http(s)://, ws(s)://, ipc:// or socket path
        #[arg(long)]
        endpoint: String,
        /// JSON-RPC method
        #[arg(long)]
        method: String,
        /// Positional params as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
        /// Per-request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Check an endpoint responds (status, latency)
    Ping {
        /// Endpoint to probe
        #[arg(long)]
        endpoint: String,
        /// Method used for the check
        #[arg(long, default_value = "eth_blockNumber")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Call {
            endpoint,
            method,
            params,
            timeout_ms,
        } => cmd_call(&endpoint, &method, &params, timeout_ms).await,
        Commands::Ping { endpoint, method } => cmd_ping(&endpoint, &method).await,
    }
}

async fn cmd_call(endpoint: &str, method: &str, params: &str, timeout_ms: Option<u64>) -> Result<()> {
    let params = parse_params(params)?;
    let mut options = CallOptions::new();
    if let Some(ms) = timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }

    let provider = connect(endpoint).await?;
    tracing::debug!(%provider, method, "sending call");
    let result = provider.make_request_with(method, params, &options).await;
    provider.close().await;

    let value = result.with_context(|| format!("{method} failed"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_ping(endpoint: &str, method: &str) -> Result<()> {
    let provider = connect(endpoint).await?;
    println!("Pinging {provider} via {}...", provider.kind());

    let start = Instant::now();
    let result = provider.make_request(method, Vec::new()).await;
    let latency = start.elapsed();
    let health = provider.health();
    provider.close().await;

    let value = result.with_context(|| format!("{method} failed"))?;
    println!("  Status:   OK");
    println!("  Result:   {value}");
    println!("  Latency:  {}ms", latency.as_millis());
    println!("  Health:   {health}");
    Ok(())
}

async fn connect(endpoint: &str) -> Result<Provider> {
    Provider::builder(endpoint)
        .config(ProviderConfig::from_env())
        .build()
        .await
        .with_context(|| format!("cannot connect to {endpoint}"))
}

fn parse_params(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(raw).context("--params must be valid JSON")? {
        Value::Array(items) => Ok(items),
        other => bail!("--params must be a JSON array, got {other}"),
    }
}
