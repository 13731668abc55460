#![doc = include_str!("./README.md")]

/// Clap argument definitions
mod args;

/// Config command handler
mod config;

/// `join` command: the interactive collaboration loop
mod join;

use clap::Parser;

use draftsync_core::draft::derive_permlink;

pub use args::Cli;
use args::Commands;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let success = match cli.command {
        Commands::Join(args) => join::handle_join(args),
        Commands::Config {
            endpoint,
            account,
            public_key,
            show,
        } => config::handle_config_command(endpoint, account, public_key, show),
        Commands::Permlink { title } => {
            println!("{}", derive_permlink(&title.join(" ")));
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
}
