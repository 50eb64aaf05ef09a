//! A full node on loopback: supervisor-started listeners, direct send and
//! platform notifications.

mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lanshare_core::config::Config;
use lanshare_core::discovery::Device;
use lanshare_core::node::Node;
use lanshare_core::platform::PlatformAdapter;
use lanshare_core::transfer::AutoAccept;

struct ScriptedAdapter {
    pick: Option<PathBuf>,
    notifications: Mutex<Vec<String>>,
}

impl PlatformAdapter for ScriptedAdapter {
    fn notify(&self, title: &str, _message: &str) {
        self.notifications.lock().unwrap().push(title.to_string());
    }

    fn open_url(&self, _url: &str) -> lanshare_core::Result<()> {
        Ok(())
    }

    fn pick_file(&self) -> Option<PathBuf> {
        self.pick.clone()
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn node_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.general.device_name = "node-under-test".to_string();
    config.network.discovery_port = 0;
    config.network.transfer_port = free_port();
    config.network.web_port = free_port();
    config.network.localhost_only = true;
    config.transfer.download_dir = Some(root.join("inbox"));
    config.staging.storage_dir = Some(root.join("staging"));
    config
}

async fn port_open(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_sends_picked_file_to_itself() {
    let dir = common::create_temp_dir();
    let content = common::random_bytes(30_000);
    let source = common::create_test_file(dir.path(), "picked.bin", &content);
    let config = node_config(dir.path());
    let transfer_port = config.network.transfer_port;
    let web_port = config.network.web_port;

    let adapter = Arc::new(ScriptedAdapter {
        pick: Some(source),
        notifications: Mutex::new(Vec::new()),
    });
    let node = Node::start(
        config,
        Arc::clone(&adapter) as Arc<dyn PlatformAdapter>,
        Arc::new(AutoAccept),
        CancellationToken::new(),
    )
    .await
    .expect("node should start");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(port_open(transfer_port).await && port_open(web_port).await) {
        assert!(tokio::time::Instant::now() < deadline, "listeners never came up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.web_url(), format!("http://127.0.0.1:{web_port}"));

    let me = Device::new("me", std::net::Ipv4Addr::LOCALHOST, transfer_port);
    let report = node
        .send_picked(&me, |_| {})
        .await
        .unwrap()
        .expect("a file was picked");
    assert_eq!(report.bytes_sent, content.len() as u64);

    let inbox = dir.path().join("inbox");
    let received = inbox.join("picked.bin");
    assert!(
        common::wait_until(Duration::from_secs(5), || {
            adapter.notifications.lock().unwrap().len() >= 2
        })
        .await
    );
    assert_eq!(std::fs::read(&received).unwrap(), content);

    let titles = adapter.notifications.lock().unwrap().clone();
    assert!(titles.iter().any(|t| t == "File sent"));
    assert!(titles.iter().any(|t| t == "File received"));

    node.shutdown().await;
}

#[tokio::test]
async fn test_nothing_picked_sends_nothing() {
    let dir = common::create_temp_dir();
    let adapter = Arc::new(ScriptedAdapter {
        pick: None,
        notifications: Mutex::new(Vec::new()),
    });

    let node = Node::start(
        node_config(dir.path()),
        Arc::clone(&adapter) as Arc<dyn PlatformAdapter>,
        Arc::new(AutoAccept),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let nobody = Device::new("nobody", std::net::Ipv4Addr::LOCALHOST, 9);
    let outcome = node.send_picked(&nobody, |_| {}).await.unwrap();

    assert!(outcome.is_none());
    assert!(adapter.notifications.lock().unwrap().is_empty());

    node.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_refused() {
    let dir = common::create_temp_dir();
    let mut config = node_config(dir.path());
    config.network.web_port = config.network.transfer_port;

    let result = Node::start(
        config,
        Arc::new(lanshare_core::platform::HeadlessAdapter),
        Arc::new(AutoAccept),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(lanshare_core::Error::InvalidConfig { .. })
    ));
}
