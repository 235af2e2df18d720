//! CLI commands

use crate::config::BackendKind;
use crate::index::IndexOrder;
use clap::{Parser, Subcommand};

/// Datom-View CLI
#[derive(Parser, Debug)]
#[command(name = "datom-view")]
#[command(about = "Temporal views and raw index access over a sample film database")]
pub struct Cli {
    /// Backend variant; defaults to DATOM_BACKEND or in-process
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Read the database as of this t or tx id
    #[arg(long, global = true, conflicts_with = "since")]
    pub as_of: Option<u64>,

    /// Read only what was committed after this t or tx id
    #[arg(long, global = true)]
    pub since: Option<u64>,

    /// Show every assertion and retraction
    #[arg(long, global = true)]
    pub history: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk through time travel, speculation and range scans
    Demo,
    /// Prefix scan of one index
    Datoms {
        /// Index order (eavt, aevt, avet, vaet)
        #[arg(short, long, default_value = "eavt")]
        index: IndexOrder,
        /// Leading key components as EDN scalars, e.g. :movie/title "Commando"
        components: Vec<String>,
        /// Result cap; -1 for all
        #[arg(short, long, default_value_t = -1, allow_hyphen_values = true)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Value range scan of one attribute
    IndexRange {
        /// Attribute ident, e.g. :movie/title
        attribute: String,
        /// Inclusive lower bound
        #[arg(long)]
        start: Option<String>,
        /// Exclusive upper bound
        #[arg(long)]
        end: Option<String>,
        #[arg(short, long, default_value_t = -1, allow_hyphen_values = true)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Pull one entity
    Pull {
        /// Entity id, :ident or lookup ref such as [:movie/title "Commando"]
        entity: String,
        #[arg(short, long, default_value = "[*]")]
        pattern: String,
    },
    /// Transactions of the log in [start, end)
    TxRange {
        #[arg(long)]
        start: Option<u64>,
        /// Exclusive end; 0 for through the latest
        #[arg(long)]
        end: Option<u64>,
        #[arg(short, long, default_value_t = -1, allow_hyphen_values = true)]
        limit: i64,
    },
    /// Datom counts of the view
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datoms_command() {
        let cli = Cli::parse_from([
            "datom-view",
            "datoms",
            "--index",
            "avet",
            ":movie/title",
            "--limit",
            "2",
            "--as-of",
            "3",
        ]);
        assert_eq!(cli.as_of, Some(3));
        match cli.command {
            Commands::Datoms {
                index,
                components,
                limit,
                ..
            } => {
                assert_eq!(index, IndexOrder::Avet);
                assert_eq!(components, vec![":movie/title".to_string()]);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_as_of_conflicts_with_since() {
        let parsed = Cli::try_parse_from(["datom-view", "stats", "--as-of", "2", "--since", "1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_backend_flag() {
        let cli = Cli::parse_from(["datom-view", "--backend", "emulated-remote", "demo"]);
        assert_eq!(cli.backend, Some(BackendKind::EmulatedRemote));
    }
}
