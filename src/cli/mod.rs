//! CLI module for quota-governor - command-line interface and subcommands.
//!
//! Inspection and simulation tooling around the governor library.

pub mod commands;

pub use commands::Cli;
