//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "fling",
    version,
    about = "Point-to-point file and directory transfer with end-to-end verification"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send files or directory trees to a receiver
    Send {
        /// Receiver address, host[:port]
        address: String,

        /// Files and directories to send
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Compress eligible files while sending
        #[arg(long)]
        compress: bool,

        /// Render a per-file progress bar
        #[arg(short, long)]
        progress: bool,

        /// Append one line per transfer event to this file
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Listen for inbound transfers
    Receive {
        /// Directory the received tree is rebuilt under
        destination: PathBuf,

        /// Listening port
        port: Option<u16>,

        /// Append one line per transfer event to this file
        #[arg(long)]
        log: Option<PathBuf>,
    },
}
