//! CLI command definitions using clap.
//!
//! - run: fetch, judge and export the whole roster (the default)
//! - fetch: collect activity only
//! - judge: drive the judge workflow over stored activity
//! - export: rank stored results and write the leaderboard
//! - status: show each entity's progress through the workflow

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shamewall - collect, judge and rank developer activity
#[derive(Parser, Debug)]
#[command(name = "shamewall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Roster file, overriding the config
    #[arg(short, long, global = true)]
    pub roster: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, judge and export
    Run {
        /// Only these logins (default: whole roster)
        logins: Vec<String>,

        /// Stop after the review is received
        #[arg(long)]
        no_summary: bool,
    },

    /// Collect activity without judging
    Fetch {
        logins: Vec<String>,
    },

    /// Judge entities whose activity is already stored
    Judge {
        logins: Vec<String>,

        #[arg(long)]
        no_summary: bool,
    },

    /// Write the leaderboard from stored results
    Export {
        /// Output file (default: export_path from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show workflow progress per entity
    Status {
        /// Only this login
        login: Option<String>,
    },
}
