//! CLI module for press-query
//!
//! Subcommands:
//! - `simulate`: drive several consumers of one key against a synthetic backend
//! - `config`: print the effective configuration

pub mod config;
pub mod simulate;

use clap::{Parser, Subcommand};

/// press-query - cache and request coordination for content clients
#[derive(Parser)]
#[command(name = "press-query")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Simulate consumers sharing one query, then a mutation invalidating it
    Simulate(simulate::SimulateArgs),

    /// Print the effective configuration as JSON
    Config,
}
