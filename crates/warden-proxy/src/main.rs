use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_proxy::events::{FanoutSink, MetricsSink, TracingSink};
use warden_proxy::{Config, ProxyServer};

/// Forward proxy with an IP whitelist and time-windowed site blacklist
#[derive(Parser, Debug)]
#[command(name = "warden", author, version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the plain HTTP listener port
    #[arg(long)]
    http_port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.validate().context("Invalid configuration")?;

    if args.check {
        info!(
            "Configuration OK: {} whitelisted IPs, {} blacklist rules",
            config.ip_whitelist.len(),
            config.site_blacklist.len()
        );
        return Ok(());
    }

    let sink = FanoutSink::new().with(TracingSink).with(MetricsSink);
    let server = ProxyServer::new(config, Arc::new(sink))?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Proxy stopped: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    }
}
