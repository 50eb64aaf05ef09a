//! Terminal implementations of the core's platform hooks.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use lanshare_core::platform::PlatformAdapter;
use lanshare_core::protocol::TransferHeader;
use lanshare_core::transfer::FileAcceptancePolicy;

use crate::ui::format_size;

/// Adapter for a terminal session: notifications are printed, URLs open in
/// the default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalAdapter;

impl PlatformAdapter for TerminalAdapter {
    fn notify(&self, title: &str, message: &str) {
        println!("  [{}] {}", title, message);
    }

    fn open_url(&self, url: &str) -> lanshare_core::Result<()> {
        open::that(url).map_err(|e| lanshare_core::Error::Internal(format!("cannot open {url}: {e}")))
    }

    fn pick_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Asks on stdin before accepting a file. One question at a time; no
/// answer within the timeout counts as a rejection.
#[derive(Debug)]
pub struct PromptPolicy {
    timeout: Duration,
    stdin: Mutex<BufReader<tokio::io::Stdin>>,
}

impl PromptPolicy {
    /// Create a policy that waits up to `timeout` for an answer.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

#[async_trait]
impl FileAcceptancePolicy for PromptPolicy {
    async fn decide(&self, header: &TransferHeader, peer: SocketAddr) -> bool {
        let mut stdin = self.stdin.lock().await;

        println!();
        println!(
            "  Incoming file from {}: {} ({})",
            peer.ip(),
            header.filename,
            format_size(header.filesize)
        );
        print!("  Accept? [y/N] ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match tokio::time::timeout(self.timeout, stdin.read_line(&mut answer)).await {
            Ok(Ok(_)) => is_yes(&answer),
            Ok(Err(e)) => {
                tracing::warn!("Failed to read answer: {}", e);
                false
            }
            Err(_) => {
                println!();
                println!("  No answer, rejected.");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
