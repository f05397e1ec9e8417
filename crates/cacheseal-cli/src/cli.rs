use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cacheseal",
    about = "Inspect and use the device key that protects cached blobs at rest",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to a health check when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Resolve the key and round-trip a sample block.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect or rotate the device key pair.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Encrypt one block read from a file.
    Encrypt(BlockArgs),
    /// Decrypt one block read from a file.
    Decrypt(BlockArgs),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Report whether a key pair is registered for the configured name.
    Status,
    /// Generate a fresh key pair, replacing any existing one.
    Create,
    /// Delete the key pair.
    Delete,
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct BlockArgs {
    /// File holding the input block.
    #[arg(short, long)]
    pub input: PathBuf,
    /// Where to write the result (replaced atomically).
    #[arg(short, long)]
    pub output: PathBuf,
}
