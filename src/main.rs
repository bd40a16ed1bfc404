use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{AuthorityMode, GatekeeperConfig};
use gatekeeper::http::HttpServer;
use gatekeeper::ratelimit::{build_authority, Authority, Limiter, Registry};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Tag-scoped admission control")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the rate limit authority over HTTP
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Set the rule for a tag
    SetRules {
        #[command(flatten)]
        target: Target,
        /// Rule specification, e.g. "limit=10;reset=1m"
        #[arg(long)]
        rule: String,
    },
    /// Count one request for a key
    Inc(KeyTarget),
    /// Check whether a key may proceed
    Allow(KeyTarget),
    /// Count one request and decide on it atomically
    Admit(KeyTarget),
}

#[derive(Debug, Args)]
struct Target {
    /// Rate limit domain
    #[arg(long)]
    tag: String,
    /// Remote authority address, overriding the configuration
    #[arg(long)]
    remote: Option<String>,
}

#[derive(Debug, Args)]
struct KeyTarget {
    #[command(flatten)]
    target: Target,
    /// Caller identifier within the tag
    #[arg(long)]
    key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = GatekeeperConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::SetRules { target, rule } => {
            let limiter = connect(&config, &target).await?;
            limiter.set_rules(&rule).await?;
            println!("ok");
            Ok(())
        }
        Command::Inc(KeyTarget { target, key }) => {
            let limiter = connect(&config, &target).await?;
            limiter.increment(&key).await?;
            println!("ok");
            Ok(())
        }
        Command::Allow(KeyTarget { target, key }) => {
            let limiter = connect(&config, &target).await?;
            println!("{}", limiter.allow(&key).await?);
            Ok(())
        }
        Command::Admit(KeyTarget { target, key }) => {
            let limiter = connect(&config, &target).await?;
            println!("{}", limiter.admit(&key).await?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: GatekeeperConfig, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    info!("Starting Gatekeeper rate limit authority");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(Registry::new());
    config
        .apply_rules(&registry)
        .context("Invalid preset rule")?;

    let addr = listen.unwrap_or(config.server.listen_addr);
    HttpServer::new(addr, registry)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Gatekeeper stopped");
    Ok(())
}

async fn connect(
    config: &GatekeeperConfig,
    target: &Target,
) -> anyhow::Result<Arc<dyn Limiter>> {
    let mut authority_config = config.authority.clone();
    if let Some(remote) = &target.remote {
        authority_config.mode = AuthorityMode::Remote;
        authority_config.remote_addr = Some(remote.clone());
    }

    let authority = build_authority(&authority_config)?;
    Ok(authority.get_or_create(&target.tag).await?)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
