use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig, World};
use std::path::PathBuf;

/// Command line arguments. Flags override values from the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// TOML config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Port shared by the stream listener and datagram socket
    #[clap(short, long)]
    port: Option<u16>,
    /// Number of player slots
    #[clap(short, long)]
    max_slots: Option<usize>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_slots) = self.max_slots {
            config.max_slots = max_slots;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting server on {} with {} slots at {}Hz",
        config.bind_addr(),
        config.max_slots,
        config.tick_rate
    );

    let server = match Server::bind(&config, World::new()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server on {}: {}", config.bind_addr(), e);
            return Err(e.into());
        }
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
