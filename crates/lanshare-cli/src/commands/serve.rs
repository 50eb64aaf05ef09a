//! Serve command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use lanshare_core::config::Config;
use lanshare_core::node::Node;
use lanshare_core::transfer::{AutoAccept, FileAcceptancePolicy};

use super::ServeArgs;
use crate::platform::{PromptPolicy, TerminalAdapter};

const PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = apply_args(super::load_config(), &args);

    let policy: Arc<dyn FileAcceptancePolicy> = if config.transfer.auto_accept {
        Arc::new(AutoAccept)
    } else {
        Arc::new(PromptPolicy::new(PROMPT_TIMEOUT))
    };

    let shutdown = CancellationToken::new();
    let node = Node::start(config, Arc::new(TerminalAdapter), policy, shutdown)
        .await
        .context("Failed to start services")?;

    println!();
    println!("Lanshare v{}", lanshare_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Device:     {}", node.config().general.device_name);
    println!(
        "  Transfers:  port {} -> {}",
        node.config().network.transfer_port,
        node.config().transfer.download_dir().display()
    );
    println!("  Staging:    {}", node.web_url());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if args.open {
        if let Err(e) = node.open_web_ui() {
            eprintln!("  Could not open browser: {}", e);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("  Stopping...");
    node.shutdown().await;

    Ok(())
}

/// Overlay command-line flags on the loaded configuration.
fn apply_args(mut config: Config, args: &ServeArgs) -> Config {
    if let Some(name) = &args.name {
        config.general.device_name.clone_from(name);
    }
    if let Some(port) = args.discovery_port {
        config.network.discovery_port = port;
    }
    if let Some(port) = args.transfer_port {
        config.network.transfer_port = port;
    }
    if let Some(port) = args.port {
        config.network.web_port = port;
    }
    if args.localhost_only {
        config.network.localhost_only = true;
    }
    if let Some(dir) = &args.output {
        config.transfer.download_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.storage_dir {
        config.staging.storage_dir = Some(dir.clone());
    }
    if args.auto_accept {
        config.transfer.auto_accept = true;
    }
    config
}
