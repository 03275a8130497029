//! CLI for pollcast
//!
//! Subcommands:
//! - `server`: run the long-poll broker until Ctrl-C or the idle watchdog stops it

use clap::Parser;
use pollcast::config::{Settings, load_config, load_config_from};
use pollcast::transport::Server;
use pollcast::utils::{Error, logging};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pollcast", version)]
enum Command {
    /// Start the HTTP long-poll server
    Server {
        /// Configuration file to load instead of `config/default`
        #[arg(long)]
        config: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    match Command::parse() {
        Command::Server { config, port } => {
            let settings = match config {
                Some(path) => load_config_from(&path),
                None => load_config(),
            };
            let mut settings = match settings {
                Ok(settings) => settings,
                Err(e) => {
                    logging::init("info");
                    error!("Failed to load configuration: {}", e);
                    std::process::exit(1);
                }
            };
            if let Some(port) = port {
                settings.server.port = port;
            }
            logging::init(&settings.server.log_level);

            match run_server(settings).await {
                Ok(()) => {}
                Err(Error::AlreadyRunning { addr }) => {
                    warn!("A broker is already running on {}; exiting.", addr);
                }
                Err(e) => {
                    error!("Server failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), Error> {
    let server = Server::bind(settings).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                shutdown.cancel();
            }
        }
    });

    server.run().await?;
    info!("Server stopped.");
    Ok(())
}
