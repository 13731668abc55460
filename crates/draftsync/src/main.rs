//! `draftsync`: join a collaborative draft from the terminal.

/// CLI module - command-line interface for draftsync
mod cli;

fn main() {
    cli::run_cli();
}
