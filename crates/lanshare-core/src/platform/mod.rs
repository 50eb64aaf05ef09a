//! Platform capabilities.
//!
//! The networking core never talks to a desktop environment directly. Tray
//! icons, native dialogs and toast notifications live behind
//! [`PlatformAdapter`], implemented once per target. [`HeadlessAdapter`]
//! is the implementation for servers and terminals.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transfer::{ReceivedFile, TransferNotifier};

/// What the core may ask of the host platform.
pub trait PlatformAdapter: Send + Sync {
    /// Show a user-visible notification.
    fn notify(&self, title: &str, message: &str);

    /// Open `url` in the default browser.
    fn open_url(&self, url: &str) -> Result<()>;

    /// Let the user choose a file. `None` when cancelled or unsupported.
    fn pick_file(&self) -> Option<PathBuf>;
}

/// Adapter without a desktop: notifications go to the log, nothing can be
/// opened or picked.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessAdapter;

impl PlatformAdapter for HeadlessAdapter {
    fn notify(&self, title: &str, message: &str) {
        tracing::info!("{}: {}", title, message);
    }

    fn open_url(&self, url: &str) -> Result<()> {
        Err(Error::Internal(format!("cannot open {url} without a desktop")))
    }

    fn pick_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Forwards transfer events to [`PlatformAdapter::notify`].
#[derive(Clone)]
pub struct PlatformNotifier {
    adapter: Arc<dyn PlatformAdapter>,
}

impl PlatformNotifier {
    /// Wrap an adapter.
    pub fn new(adapter: Arc<dyn PlatformAdapter>) -> Self {
        Self { adapter }
    }
}

impl TransferNotifier for PlatformNotifier {
    fn transfer_received(&self, file: &ReceivedFile) {
        tracing::info!(
            "Received {} ({} bytes) from {}",
            file.name,
            file.size,
            file.peer
        );
        self.adapter.notify(
            "File received",
            &format!("{} saved to {}", file.name, file.path.display()),
        );
    }

    fn transfer_failed(&self, peer: SocketAddr, error: &Error) {
        tracing::warn!("Transfer from {} failed: {}", peer, error);
        self.adapter
            .notify("Transfer failed", &format!("From {peer}: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl PlatformAdapter for Recording {
        fn notify(&self, title: &str, message: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((title.to_string(), message.to_string()));
        }

        fn open_url(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn pick_file(&self) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_notifier_forwards_received_and_failed() {
        let adapter = Arc::new(Recording::default());
        let notifier = PlatformNotifier::new(adapter.clone());
        let peer: SocketAddr = "10.0.0.3:40000".parse().unwrap();

        notifier.transfer_received(&ReceivedFile {
            name: "a.txt".into(),
            path: PathBuf::from("/tmp/a.txt"),
            size: 3,
            peer,
        });
        notifier.transfer_failed(
            peer,
            &Error::PartialTransfer {
                expected: 3,
                received: 1,
            },
        );

        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "File received");
        assert!(seen[0].1.contains("a.txt"));
        assert_eq!(seen[1].0, "Transfer failed");
        assert!(seen[1].1.contains("10.0.0.3:40000"));
    }

    #[test]
    fn test_headless_adapter() {
        let adapter = HeadlessAdapter;
        adapter.notify("title", "message");
        assert!(adapter.pick_file().is_none());
        assert!(adapter.open_url("http://127.0.0.1:4848").is_err());
    }
}
