use std::error::Error;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Relay-assisted, end-to-end encrypted file transfer", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Relay server address
    #[arg(long, global = true, default_value = skiff::RELAY_ADDR)]
    relay: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// Path to the file to send
        file_path: String,
    },
    /// Receive a file
    Receive {
        /// Optional 6-digit code (will prompt if not provided)
        code: Option<u32>,
    },
    /// Run as a relay server
    Relay {
        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Commands::Send { file_path } => skiff::commands::send::run(&file_path, &cli.relay)?,
        Commands::Receive { code } => skiff::commands::receive::run(code, &cli.relay)?,
        Commands::Relay { port } => skiff::commands::relay::run(port)?,
    }

    Ok(())
}
