//! terraform-provider-helm - Helm provider plugin binary
//!
//! Stdout carries the plugin protocol; logs go to stderr.

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tfhelm::Provider;

/// Env var holding the log filter
const LOG_ENV: &str = "TFHELM_LOG";

#[derive(Parser)]
#[command(name = "terraform-provider-helm")]
#[command(version)]
#[command(about = "Helm provider plugin: repositories, releases and Tiller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer plugin requests on stdin/stdout (default)
    Serve,

    /// Print the provider and resource schemas as JSON
    Schema,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Schema => {
            let schema = Provider::new().schema();
            let json = serde_json::to_string_pretty(&schema).into_diagnostic()?;
            println!("{}", json);
        }
        Commands::Serve => {
            let mut provider = Provider::new();
            let stdin = BufReader::new(tokio::io::stdin());
            tfhelm::server::serve(&mut provider, stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}
