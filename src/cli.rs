//! Daemon's own command-line flags (spec §4.B). The UI-automation CLI
//! wrapper that shells out to Quern's HTTP API is an out-of-scope external
//! collaborator per spec §1; this is only the handful of flags `quernd`
//! itself needs at process startup.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quernd")]
#[command(version = crate::config::VERSION)]
#[command(about = "Local debugging daemon for iOS development")]
pub struct Cli {
    /// Stay attached to the terminal instead of forking into the background.
    #[arg(long)]
    pub foreground: bool,

    /// Preferred HTTP API port; overrides config file and `QUERN_PORT`.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override `~/.quern` (equivalent to setting `QUERN_HOME`).
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// Stop a running instance (by PID from the state file) and exit.
    #[arg(long)]
    pub stop: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
