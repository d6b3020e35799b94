use clap::Parser;
use metrics_agent::config::{self, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match config::resolve(cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid agent configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = metrics_agent::run(config).await {
        tracing::error!(error = %err, "agent exited with an error");
        std::process::exit(1);
    }
}
