//! ImageKiln CLI - command-line interface
//!
//! This binary provides a command-line interface to the ImageKiln library.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "imagekiln")]
#[command(about = "Derive sized and compressed image variants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process local source images into output variants
    Process(commands::process::ProcessArgs),
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Process(args) => commands::process::run(args).await,
        Commands::Version => commands::version::run(),
    };

    if let Err(err) = result {
        err.exit();
    }
}
