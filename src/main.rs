use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use proxywarp_core::config::Settings;

#[derive(Parser)]
#[command(name = "proxywarp", version, about = "ProxyWarp - transparent reverse-proxy gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway in foreground
    Serve {
        /// Listen port (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Base domain whose wildcard children are proxied
        #[arg(long)]
        base_domain: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_ref())?;

    if let Some(Commands::Serve { port, base_domain }) = cli.command {
        if let Some(port) = port {
            settings.server.port = port;
        }
        if let Some(base_domain) = base_domain {
            settings.server.base_domain = base_domain;
        }
    }

    proxywarp_server::init_tracing();

    // serve() wires SIGINT/SIGTERM onto this token itself
    let shutdown = CancellationToken::new();
    proxywarp_server::serve(settings, shutdown).await?;

    Ok(())
}
