//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// A config file that cannot be read or parsed is reported and ignored.
pub fn load_config() -> lanshare_core::config::Config {
    lanshare_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        lanshare_core::config::Config::default()
    })
}

pub mod config;
pub mod scan;
pub mod send;
pub mod serve;

/// Lanshare - local network file sharing
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run discovery, the transfer server and the staging gateway
    Serve(ServeArgs),

    /// List machines on the network
    Scan(ScanArgs),

    /// Send a file directly to a machine
    Send(SendArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Name announced to other machines
    #[arg(long, env = "LANSHARE_NAME")]
    pub name: Option<String>,

    /// UDP port for discovery
    #[arg(long)]
    pub discovery_port: Option<u16>,

    /// TCP port for direct transfers
    #[arg(long)]
    pub transfer_port: Option<u16>,

    /// TCP port for the staging gateway
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Only accept staging requests from this machine
    #[arg(long)]
    pub localhost_only: bool,

    /// Directory received files are saved to
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory staged uploads are kept in
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Accept incoming files without asking
    #[arg(short = 'y', long)]
    pub auto_accept: bool,

    /// Open the staging gateway in the browser
    #[arg(long)]
    pub open: bool,
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// How long to wait for responses (e.g., 3s, 10s)
    #[arg(short, long, default_value = "3s")]
    pub duration: String,

    /// UDP port for discovery
    #[arg(long)]
    pub discovery_port: Option<u16>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// File to send
    pub file: PathBuf,

    /// Receiver as ip:port, a bare ip (configured transfer port), or a
    /// device name found by scanning
    #[arg(short, long)]
    pub to: String,

    /// How long to scan when `--to` is a device name
    #[arg(long, default_value = "3s")]
    pub scan_duration: String,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config actions
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Write the default configuration to the configuration file
    Reset,
}
