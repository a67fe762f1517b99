//! EMP Auth - Entry Point

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use emp_auth::{AuthorizationServer, Config};

#[derive(Parser, Debug)]
#[command(name = "emp-auth")]
#[command(about = "OAuth 2.0 authorization server with PKCE and Google sign-in")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8080", env = "PORT")]
    port: u16,

    /// Public issuer URL (e.g., https://auth.example.com)
    #[arg(long, env = "EMP_OAUTH_ISSUER")]
    issuer: Option<String>,

    /// Run the cleanup sweep every N seconds (off when unset)
    #[arg(long)]
    cleanup_interval_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = Config::from_env()?;
    if let Some(issuer) = cli.issuer {
        config.set_issuer(issuer);
    }
    if let Some(secs) = cli.cleanup_interval_secs.filter(|secs| *secs > 0) {
        config.cleanup_interval = Some(Duration::from_secs(secs));
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        issuer = %config.issuer,
        auto_consent = config.auto_consent,
        "Starting EMP Auth"
    );
    if config.key_source.is_none() {
        tracing::warn!("No signing key configured; token issuance will fail until one is provided");
    }

    let server = AuthorizationServer::new(config)?;
    emp_auth::server::run_http(server, cli.port).await
}
