//! Scan command implementation.

use anyhow::{Context, Result};

use lanshare_core::discovery::{Device, DiscoveryConfig, DiscoveryService};

use super::ScanArgs;
use crate::ui::parse_duration;

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let global_config = super::load_config();

    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '3s', '10s', '1m'")?;

    let mut config = DiscoveryConfig::from(&global_config);
    if let Some(port) = args.discovery_port {
        config.discovery_port = port;
    }

    if !args.json {
        println!();
        println!("Scanning for devices ({})...", args.duration);
        println!();
    }

    let service = DiscoveryService::bind(config)
        .await
        .context("Failed to bind discovery socket")?;
    let devices = service.scan(duration).await?;

    if args.json {
        output_json(&devices)?;
    } else {
        display_devices(&devices);
    }

    Ok(())
}

fn output_json(devices: &[Device]) -> Result<()> {
    let output = serde_json::json!({ "devices": devices });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn display_devices(devices: &[Device]) {
    println!("Devices on Network:");
    println!("{}", "─".repeat(60));
    println!("  {:24}  {:15}  {:6}", "Name", "Address", "Port");
    println!("{}", "─".repeat(60));

    if devices.is_empty() {
        println!("  (no devices found)");
    }

    for device in devices {
        println!(
            "  {:24}  {:15}  {:6}",
            truncate_string(&device.name, 24),
            device.ip.to_string(),
            device.port
        );
    }

    println!("{}", "─".repeat(60));
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
