use anyhow::Result;
use clap::Parser;

use fling::cli::{Cli, Command};
use fling::receiver::{self, ReceiveOptions};
use fling::sender::{self, SendOptions};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Send {
            address,
            paths,
            compress,
            progress,
            log,
        } => sender::run(
            &address,
            &paths,
            &SendOptions {
                compress,
                progress,
                log,
            },
        ),
        Command::Receive {
            destination,
            port,
            log,
        } => receiver::run(&destination, &ReceiveOptions { port, log }),
    }
}
