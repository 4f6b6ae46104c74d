//! CLI argument definitions using clap
//!
//! Commands:
//! - docquery validate --models <dir> [--collection <name> --query <path>]
//! - docquery compile --models <dir> --collection <name> --query <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docquery - Compiles read queries into document-store pipelines
#[derive(Parser, Debug)]
#[command(name = "docquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load model descriptors and check a query's condition tree
    Validate {
        /// Directory of model descriptor files (*.json)
        #[arg(long)]
        models: PathBuf,

        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Collection the query targets
        #[arg(long, requires = "query")]
        collection: Option<String>,

        /// Query file: { "filter", "projection", "aggregation", "limit" }
        #[arg(long, requires = "collection")]
        query: Option<PathBuf>,
    },

    /// Lower a query into the stage list of its collection
    Compile {
        /// Directory of model descriptor files (*.json)
        #[arg(long)]
        models: PathBuf,

        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Collection the query targets
        #[arg(long)]
        collection: String,

        /// Query file: { "filter", "projection", "aggregation", "limit" }
        #[arg(long)]
        query: PathBuf,

        /// IANA timezone for date operators, overrides the configured default
        #[arg(long)]
        timezone: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Validate { .. } => "validate",
            Command::Compile { .. } => "compile",
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compile() {
        let cli = Cli::try_parse_from([
            "docquery",
            "compile",
            "--models",
            "models",
            "--collection",
            "Book_reviews",
            "--query",
            "query.json",
            "--timezone",
            "Europe/Paris",
        ])
        .unwrap();
        assert_eq!(cli.command.name(), "compile");
        match cli.command {
            Command::Compile {
                collection,
                timezone,
                config,
                ..
            } => {
                assert_eq!(collection, "Book_reviews");
                assert_eq!(timezone.as_deref(), Some("Europe/Paris"));
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validate_query_requires_collection() {
        assert!(Cli::try_parse_from(["docquery", "validate", "--models", "m"]).is_ok());
        assert!(
            Cli::try_parse_from(["docquery", "validate", "--models", "m", "--query", "q.json"])
                .is_err()
        );
    }
}
