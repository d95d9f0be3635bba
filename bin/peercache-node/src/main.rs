//! Peercache node daemon
//!
//! Wires the block store, peer selector, fetch orchestrator, and
//! serving endpoint together and runs until interrupted.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::NodeConfig;
use peercache_fetch::{FetchConfig, FetchOrchestrator, HttpRangeSource, RangeSource};
use peercache_route::PeerSelector;
use peercache_server::{BlobServer, ServeConfig};
use peercache_store::{BlockStore, StoreConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Peercache node CLI arguments
#[derive(Parser, Debug)]
#[command(name = "peercache-node")]
#[command(author, version, about = "Peer-assisted content cache node", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root node address (`host:port`); repeatable
    #[arg(short = 'r', long = "root")]
    roots: Vec<String>,

    /// Serving port
    #[arg(short, long)]
    port: Option<u16>,

    /// Advertised address (`host:port`); autodetected when omitted
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Address dialed to discover the outbound IP
    #[arg(long)]
    detect_addr: Option<String>,

    /// On-disk media root for cached blocks
    #[arg(short = 'c', long)]
    media: Option<PathBuf>,

    /// Cache byte bound
    #[arg(short = 'm', long)]
    cache_bytes: Option<u64>,

    /// Cache entry bound
    #[arg(short = 'e', long)]
    max_entries: Option<u64>,

    /// Prefetch worker-pool size; 0 disables prefetch
    #[arg(long)]
    prefetch_workers: Option<usize>,

    /// Shared cluster credential
    #[arg(long)]
    auth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    setup_logging(&config.log_level)?;
    config.validate()?;

    info!(
        roots = config.roots.len(),
        port = config.port,
        media = %config.media.display(),
        cache_bytes = config.cache_bytes,
        max_entries = config.max_entries,
        "peercache node starting"
    );

    let advertise_addr = if config.advertise_addr.is_empty() {
        let ip = detect_outbound_ip(&config.detect_addr)?;
        info!(ip = %ip, detect_addr = %config.detect_addr, "autodetected outbound address");
        format!("{}:{}", ip, config.port)
    } else {
        config.advertise_addr.clone()
    };

    let store = Arc::new(
        BlockStore::open(StoreConfig {
            media: config.media.clone(),
            cache_bytes: config.cache_bytes,
            max_entries: config.max_entries,
        })
        .await?,
    );
    let selector = PeerSelector::new(config.roots.clone(), advertise_addr.clone());
    let source = Arc::new(HttpRangeSource::new(&config.auth_token)?) as Arc<dyn RangeSource>;
    let orchestrator = FetchOrchestrator::new(
        store,
        selector,
        source,
        FetchConfig {
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            prefetch_workers: config.prefetch_workers,
            ..FetchConfig::default()
        },
    );

    let listen = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    let server = BlobServer::bind(
        ServeConfig {
            listen,
            auth_token: config.auth_token.clone(),
            advertise_addr,
        },
        orchestrator,
    )
    .await?;

    tokio::select! {
        result = server.run() => {
            result.context("serving endpoint failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("peercache node stopped");
    Ok(())
}

/// Load the config file (if given) and layer CLI flags on top.
fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if !args.roots.is_empty() {
        config.roots = args.roots.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(advertise_addr) = &args.advertise_addr {
        config.advertise_addr = advertise_addr.clone();
    }
    if let Some(detect_addr) = &args.detect_addr {
        config.detect_addr = detect_addr.clone();
    }
    if let Some(media) = &args.media {
        config.media = media.clone();
    }
    if let Some(cache_bytes) = args.cache_bytes {
        config.cache_bytes = cache_bytes;
    }
    if let Some(max_entries) = args.max_entries {
        config.max_entries = max_entries;
    }
    if let Some(prefetch_workers) = args.prefetch_workers {
        config.prefetch_workers = prefetch_workers;
    }
    if let Some(auth_token) = &args.auth_token {
        config.auth_token = auth_token.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }

    Ok(config)
}

/// Initialize tracing subscriber for logging.
fn setup_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Discover the IP the kernel would route external traffic from.
///
/// Connecting a UDP socket sends no packets; it only binds the local
/// end to the interface that routes toward `detect_addr`.
fn detect_outbound_ip(detect_addr: &str) -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind detection socket")?;
    socket
        .connect(detect_addr)
        .with_context(|| format!("failed to route toward detect address {detect_addr}"))?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test Case: CLI flags override config file values
    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "peercache-node",
            "-r",
            "10.0.0.1:19145",
            "-r",
            "10.0.0.2:19145",
            "-p",
            "20000",
            "-m",
            "1048576",
            "--auth-token",
            "secret",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.port, 20000);
        assert_eq!(config.cache_bytes, 1_048_576);
        assert_eq!(config.auth_token, "secret");
        // Untouched fields keep their defaults.
        assert_eq!(config.media, PathBuf::from("/tmp/cache"));
        assert_eq!(config.prefetch_workers, 64);
    }

    /// Test Case: Outbound detection yields a usable local address
    #[test]
    fn test_detect_outbound_ip_loopback() {
        let ip = detect_outbound_ip("127.0.0.1:80").unwrap();
        assert!(ip.is_loopback());
    }
}
