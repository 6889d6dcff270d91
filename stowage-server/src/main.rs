mod config;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use server::run_server;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Replicated blob store node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a store node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        conf: String,
        /// Node id to run as; overrides current_node in the file
        #[arg(short, long)]
        node: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stowage=info,stowage_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { conf, node } => {
            tracing::info!("Starting stowage with config: {}", conf);

            let cfg = match Config::from_file(&conf).and_then(|cfg| cfg.resolve(node)) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            tracing::info!("Node ID: {}, Group: {}", cfg.current_node, cfg.group);

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
