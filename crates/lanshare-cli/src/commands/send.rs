//! Send command implementation.

use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Context, Result};

use lanshare_core::config::Config;
use lanshare_core::discovery::{DiscoveryConfig, DiscoveryService};
use lanshare_core::transfer::{ClientConfig, TransferClient};

use super::SendArgs;
use crate::ui::{format_size, parse_duration, ProgressLine};

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let global_config = super::load_config();

    if !args.quiet {
        println!();
        println!("Lanshare v{}", lanshare_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
    }

    let (addr, label) = match parse_target(&args.to, global_config.network.transfer_port) {
        Some(addr) => (addr, addr.to_string()),
        None => resolve_by_name(&args, &global_config).await?,
    };

    let file_name = args
        .file
        .file_name()
        .map_or_else(|| args.file.display().to_string(), |n| n.to_string_lossy().into_owned());

    if !args.quiet {
        println!("  Sending {} to {}", file_name, label);
        println!();
    }

    let client = TransferClient::new(ClientConfig::from(&global_config));
    let mut bar = ProgressLine::new(file_name);
    let quiet = args.quiet;

    let result = client
        .send_to(&args.file, addr, |fraction| {
            if !quiet {
                bar.update(fraction);
            }
        })
        .await;

    if !quiet {
        bar.finish();
    }

    match result {
        Ok(report) => {
            if !quiet {
                println!();
                println!(
                    "  Transfer complete: {} in {:.1}s ({}/s)",
                    format_size(report.bytes_sent),
                    report.elapsed.as_secs_f64(),
                    format_size(report.speed_bps())
                );
                println!();
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("  Transfer failed: {}", e);
            eprintln!();
            Err(e.into())
        }
    }
}

/// Interpret `--to` as `ip:port` or a bare IP on the default transfer port.
fn parse_target(to: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = to.parse::<SocketAddr>() {
        return Some(addr);
    }
    to.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

/// Scan the network and pick the device announcing `--to` as its name.
async fn resolve_by_name(args: &SendArgs, config: &Config) -> Result<(SocketAddr, String)> {
    let duration = parse_duration(&args.scan_duration)
        .context("Invalid duration format. Use formats like '3s', '10s', '1m'")?;

    if !args.quiet {
        println!("  Looking for {}...", args.to);
    }

    let service = DiscoveryService::bind(DiscoveryConfig::from(config))
        .await
        .context("Failed to bind discovery socket")?;
    service.scan(duration).await?;

    let Some(device) = service.peers().find_by_name(&args.to) else {
        bail!("No device named '{}' answered within {}", args.to, args.scan_duration);
    };

    let label = format!("{} ({})", device.name, device.transfer_addr());
    Ok((device.transfer_addr(), label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_with_port() {
        let addr = parse_target("192.168.1.20:5001", 48481).unwrap();
        assert_eq!(addr, "192.168.1.20:5001".parse().unwrap());
    }

    #[test]
    fn test_parse_target_bare_ip() {
        let addr = parse_target("10.0.0.7", 48481).unwrap();
        assert_eq!(addr, "10.0.0.7:48481".parse().unwrap());
    }

    #[test]
    fn test_parse_target_name() {
        assert!(parse_target("kitchen-laptop", 48481).is_none());
    }
}
