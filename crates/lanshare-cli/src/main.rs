//! Lanshare CLI - local network file sharing
//!
//! Lanshare finds other machines on the LAN, pushes files to them over a
//! direct TCP connection, and runs a small HTTP staging area any browser on
//! the network can drop files into and pick them up from.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run discovery, the transfer server and the staging gateway
//! lanshare serve
//!
//! # List machines running lanshare (on another device)
//! lanshare scan
//!
//! # Push a file to one of them
//! lanshare send ./report.pdf --to 192.168.1.20:48481
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
mod platform;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanshare=info,lanshare_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
