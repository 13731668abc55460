//! Command-line argument structures

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "draftsync")]
#[command(version)]
#[command(about = "Edit a draft collaboratively over a Y-sync server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Join a collaborative draft and edit it from stdin
    Join(JoinArgs),

    /// View or update the persisted configuration
    Config {
        /// Default collaboration server URL (ws:// or wss://)
        #[arg(long)]
        endpoint: Option<String>,

        /// Default account name
        #[arg(long)]
        account: Option<String>,

        /// Default public key identifier
        #[arg(long)]
        public_key: Option<String>,

        /// Print the configuration after applying changes
        #[arg(long)]
        show: bool,
    },

    /// Print the permlink derived from a title
    Permlink {
        /// Post title (words are joined with spaces)
        #[arg(required = true)]
        title: Vec<String>,
    },
}

#[derive(Args)]
pub struct JoinArgs {
    /// Owner of the draft
    #[arg(long)]
    pub owner: String,

    /// Permlink of the draft
    #[arg(long)]
    pub permlink: String,

    /// Collaboration server URL (defaults to the configured endpoint)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Account to authenticate as (defaults to the configured account)
    #[arg(long)]
    pub account: Option<String>,

    /// Public key identifier (defaults to the configured key)
    #[arg(long)]
    pub public_key: Option<String>,

    /// Signed challenge value
    #[arg(long)]
    pub challenge: String,

    /// Signature over the challenge
    #[arg(long)]
    pub signature: String,

    /// Display name shown to collaborators (defaults to the account)
    #[arg(long)]
    pub user: Option<String>,

    /// Print core events as JSON lines
    #[arg(long)]
    pub json: bool,
}
