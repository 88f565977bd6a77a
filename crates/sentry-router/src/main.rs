mod config;
mod node;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{load_config_file, Cli, RuntimeConfig};
use node::Node;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("sentry-router: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Flags win over the config file, which wins over defaults.
    let file = load_config_file(cli.config.as_ref())?;
    let config = RuntimeConfig::from_cli_and_file(&cli, file)?;

    init_logging(&config.log_level);

    Node::new(config).run().await
}

/// RUST_LOG takes precedence over the configured level when set.
fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
