//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Nestlink CLI - resilient GraphQL client
///
/// Runs queries, mutations and subscriptions against a GraphQL API with
/// automatic token refresh, retry and reconnection.
#[derive(Parser, Debug)]
#[command(
    name = "nestlink",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "NESTLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// GraphQL HTTP endpoint (overrides configuration)
    #[arg(short, long, global = true)]
    pub endpoint: Option<String>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a query or mutation
    Query(QueryArgs),

    /// Stream the payloads of a subscription
    Subscribe(SubscribeArgs),

    /// Manage the stored session
    Session(SessionArgs),

    /// Generate shell completions for the specified shell
    Completions(CompletionsArgs),
}

/// Arguments for the query command
#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// File containing the GraphQL document
    #[arg(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Variables as a JSON object
    #[arg(long)]
    pub vars: Option<String>,

    /// Operation to run when the document holds several
    #[arg(long)]
    pub operation_name: Option<String>,

    /// Send as a mutation even if the document does not say so
    #[arg(long)]
    pub mutation: bool,
}

/// Arguments for the subscribe command
#[derive(Parser, Debug)]
pub struct SubscribeArgs {
    /// File containing the subscription document
    #[arg(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Variables as a JSON object
    #[arg(long)]
    pub vars: Option<String>,

    /// Stop after this many payloads
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Arguments for the session command
#[derive(Parser, Debug)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub action: SessionAction,
}

/// Session management actions
#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Store a token pair from an external login
    Set(SessionSetArgs),

    /// Show the stored session with tokens redacted
    Show,

    /// Delete the stored session
    Clear,
}

/// Arguments for session set
#[derive(Parser, Debug)]
pub struct SessionSetArgs {
    #[arg(long, env = "NESTLINK_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    #[arg(long, env = "NESTLINK_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: String,

    /// Access token expiry in epoch seconds (read from the token if omitted)
    #[arg(long)]
    pub expires_at: Option<i64>,
}

/// Arguments for generating shell completions
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output
    Json,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Supported shells for completion generation
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level (considering quiet flag)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

impl Shell {
    /// Convert to clap_complete shell type
    pub fn to_clap_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}
