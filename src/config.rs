//! Command-line surface and validated runtime configuration.

use crate::callsign::Callsign;
use crate::error::{AirwalkError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const APPLICATION_NAME: &str = "airwalk";
pub const DEFAULT_STATE_PATH: &str = "baw_state.bin";

/// Default per-read response timeout for the discovery dialogue.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// AX.25/NET-ROM network discovery tool
#[derive(Parser, Debug, Clone)]
#[command(
    name = APPLICATION_NAME,
    version,
    about = "AX.25/NET-ROM network discovery tool",
    after_help = "On stdin, pipe or type a list of root nodes at which to begin querying, \
                  one callsign per line."
)]
pub struct CliArgs {
    /// Max number of simultaneous parallel AX.25 connections
    #[arg(short = 'j', value_name = "COUNT", default_value_t = 1)]
    pub threads: usize,

    /// Path of state file to load and append node discoveries
    #[arg(short = 'f', value_name = "PATH", default_value = DEFAULT_STATE_PATH)]
    pub state_path: PathBuf,

    /// Also revisit nodes left pending by previous runs
    #[arg(long)]
    pub resume: bool,

    /// Local address or callsign to use, typically the user's
    /// hyphenated callsign
    #[arg(value_name = "LOCAL_CALLSIGN")]
    pub local: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub threads: usize,
    pub state_path: PathBuf,
    pub local: Callsign,
    pub resume: bool,
    pub response_timeout: Duration,
}

impl Config {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.threads < 1 {
            return Err(AirwalkError::InvalidConfig(
                "thread count must be >= 1".to_string(),
            ));
        }
        let local = Callsign::parse(&args.local).map_err(|e| {
            AirwalkError::InvalidConfig(format!("bad local callsign {:?}: {e}", args.local))
        })?;
        Ok(Config {
            threads: args.threads,
            state_path: args.state_path,
            local,
            resume: args.resume,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }
}
