//! CLI module for shamewall - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
