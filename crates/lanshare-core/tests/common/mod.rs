//! Common test utilities for `Lanshare` integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::discovery::{DiscoveryConfig, DiscoveryService};
use lanshare_core::registry::TransferRegistry;
use lanshare_core::transfer::ServerConfig;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Open a registry over a fresh staging directory.
pub async fn open_registry(dir: &Path) -> Arc<TransferRegistry> {
    Arc::new(
        TransferRegistry::open(dir.join("staging"), None)
            .await
            .expect("Failed to open registry"),
    )
}

/// Transfer server settings writing into `download_dir` with a short timeout.
pub fn server_config(download_dir: &Path) -> ServerConfig {
    ServerConfig {
        port: 0,
        download_dir: download_dir.to_path_buf(),
        chunk_size: 4096,
        max_connections: 4,
        io_timeout: Duration::from_secs(5),
    }
}

/// Discovery settings for a loopback-only service on an ephemeral port.
pub fn loopback_discovery(name: &str, transfer_port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        device_name: name.to_string(),
        discovery_port: 0,
        transfer_port,
        advertise_ip: Some(Ipv4Addr::LOCALHOST),
        broadcast_addr: Ipv4Addr::LOCALHOST,
        peer_ttl: None,
    }
}

/// Loopback address of a service's discovery socket.
pub fn loopback_addr(service: &DiscoveryService) -> SocketAddr {
    let port = service.local_addr().expect("Failed to read local address").port();
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
