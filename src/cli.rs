//! Command-line interface definitions.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "keyglowd",
    about = "Per-key RGB lighting daemon for hotplug keyboards",
    version
)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/keyglow/keyglow.toml,
    /// created with defaults if missing)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Exit once the last device session is removed
    #[arg(long)]
    pub auto_quit: bool,

    /// Start with hotplug discovery disabled
    #[arg(long)]
    pub inactive: bool,
}
