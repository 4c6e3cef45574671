//! Command-line argument parsing for covermatch
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// covermatch - Find the insurance plan documents that fit a client
#[derive(Parser, Debug)]
#[command(name = "covermatch")]
#[command(version)]
#[command(about = "Agentic retrieval over insurance plan documents", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search plan documents for a client profile
    Search {
        /// Client profile JSON file
        #[arg(short, long)]
        profile: PathBuf,

        /// Uploaded document ids to search, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        scope: Vec<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check that Ollama is reachable
    Health,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Verbosity {
    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "warn,covermatch=info",
            Verbosity::VeryVerbose => "info,covermatch=debug",
        }
    }
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_args() {
        let args = Args::try_parse_from([
            "covermatch",
            "search",
            "--profile",
            "client.json",
            "--scope",
            "up-1,up-2",
            "--json",
        ])
        .unwrap();

        match args.command {
            Commands::Search {
                profile,
                scope,
                json,
            } => {
                assert_eq!(profile, PathBuf::from("client.json"));
                assert_eq!(scope, vec!["up-1".to_string(), "up-2".to_string()]);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_scope_required() {
        assert!(Args::try_parse_from(["covermatch", "search", "--profile", "c.json"]).is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        let args = Args::try_parse_from(["covermatch", "health"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Normal);

        let args = Args::try_parse_from(["covermatch", "-vv", "health"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::VeryVerbose);

        let args = Args::try_parse_from(["covermatch", "health", "-q"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_config_init_force() {
        let args = Args::try_parse_from(["covermatch", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }
}
