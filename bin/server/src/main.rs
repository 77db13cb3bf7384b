use agentflow_server::{
    app::App,
    cli::{self, Cli},
    config::ServerConfig,
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Cli::parse();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(in_memory = args.in_memory, "Loaded configuration");

    let app = if args.in_memory {
        App::in_memory(&config).expect("failed to wire in-memory engine")
    } else {
        App::connect(&config).await.expect("failed to wire engine")
    };

    if let Err(e) = cli::execute(&app, args.command).await {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
