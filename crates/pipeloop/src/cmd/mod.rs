use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one peer and echo every received byte back.
    Listen(ListenArgs),
    /// Connect, send a payload, and print any reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Endpoint path to bind.
    pub path: PathBuf,
    /// Inbound buffer capacity in bytes.
    #[arg(long, value_name = "BYTES")]
    pub read_buffer_size: Option<usize>,
    /// Seconds to wait for a client before giving up.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub accept_timeout: u64,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint path to connect to.
    pub path: PathBuf,
    /// Inline payload bytes.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the payload from a file instead.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Milliseconds to collect a reply after draining (0 skips the wait).
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub reply_timeout: u64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Print extended build information.
    #[arg(long)]
    pub extended: bool,
}
