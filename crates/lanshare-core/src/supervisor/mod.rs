//! Port supervisor.
//!
//! Every interval the supervisor probes each managed listener's port with a
//! TCP connect to loopback. A port nobody answers on gets its listener
//! started again. Listeners that are already bound are left alone, even if
//! they stopped answering requests; only the bind state is checked.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A TCP listener the supervisor can (re)start.
#[async_trait]
pub trait ManagedListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// TCP port the listener binds.
    fn port(&self) -> u16;

    /// Bind the port and spawn the serve loop, which stops on `shutdown`.
    ///
    /// Returns once the port is bound.
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Result of one check of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    /// Something already answers on the port
    Running,
    /// The port was free and the listener was started
    Started,
    /// The port was free and starting failed
    Failed(String),
}

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between checks
    pub interval: Duration,
    /// How long a probe connect may take
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::Config> for SupervisorConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            interval: config.supervisor.interval,
            probe_timeout: config.supervisor.probe_timeout,
        }
    }
}

/// Keeps managed listeners bound.
pub struct PortSupervisor {
    config: SupervisorConfig,
    listeners: Vec<Arc<dyn ManagedListener>>,
}

impl std::fmt::Debug for PortSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("PortSupervisor")
            .field("config", &self.config)
            .field("listeners", &names)
            .finish()
    }
}

impl PortSupervisor {
    /// Create a supervisor with no listeners.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
        }
    }

    /// Add a listener to supervise.
    pub fn manage(&mut self, listener: Arc<dyn ManagedListener>) {
        self.listeners.push(listener);
    }

    /// Number of supervised listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether nothing is supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Probe every listener once, starting those whose port is free.
    pub async fn check_once(&self, shutdown: &CancellationToken) -> Vec<(String, ListenerStatus)> {
        let mut report = Vec::with_capacity(self.listeners.len());

        for listener in &self.listeners {
            let status = if self.is_bound(listener.port()).await {
                ListenerStatus::Running
            } else {
                tracing::info!(
                    "Port {} is free, starting {}",
                    listener.port(),
                    listener.name()
                );
                match listener.start(shutdown.child_token()).await {
                    Ok(()) => ListenerStatus::Started,
                    Err(e) => {
                        tracing::warn!("Failed to start {}: {}", listener.name(), e);
                        ListenerStatus::Failed(e.to_string())
                    }
                }
            };
            report.push((listener.name().to_string(), status));
        }

        report
    }

    /// Check immediately, then every interval, until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Supervisor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_once(&shutdown).await;
                }
            }
        }
    }

    async fn is_bound(&self, port: u16) -> bool {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        matches!(
            tokio::time::timeout(self.config.probe_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct Counting {
        port: u16,
        starts: AtomicUsize,
    }

    #[async_trait]
    impl ManagedListener for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn port(&self) -> u16 {
            self.port
        }

        async fn start(&self, shutdown: CancellationToken) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
            tokio::spawn(async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = async {
                        while listener.accept().await.is_ok() {}
                    } => {}
                }
            });
            Ok(())
        }
    }

    async fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_starts_free_port_once() {
        let listener = Arc::new(Counting {
            port: free_port().await,
            starts: AtomicUsize::new(0),
        });
        let mut supervisor = PortSupervisor::new(SupervisorConfig::default());
        supervisor.manage(listener.clone());
        let shutdown = CancellationToken::new();

        let first = supervisor.check_once(&shutdown).await;
        let second = supervisor.check_once(&shutdown).await;

        assert_eq!(first[0].1, ListenerStatus::Started);
        assert_eq!(second[0].1, ListenerStatus::Running);
        assert_eq!(listener.starts.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_restarts_after_listener_stops() {
        let listener = Arc::new(Counting {
            port: free_port().await,
            starts: AtomicUsize::new(0),
        });
        let mut supervisor = PortSupervisor::new(SupervisorConfig::default());
        supervisor.manage(listener.clone());

        let first_run = CancellationToken::new();
        supervisor.check_once(&first_run).await;
        first_run.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second_run = CancellationToken::new();
        let report = supervisor.check_once(&second_run).await;

        assert_eq!(report[0].1, ListenerStatus::Started);
        assert_eq!(listener.starts.load(Ordering::SeqCst), 2);
        second_run.cancel();
    }

    #[tokio::test]
    async fn test_bound_by_someone_else_is_left_alone() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Arc::new(Counting {
            port: occupied.local_addr().unwrap().port(),
            starts: AtomicUsize::new(0),
        });
        let mut supervisor = PortSupervisor::new(SupervisorConfig::default());
        supervisor.manage(listener.clone());

        let report = supervisor.check_once(&CancellationToken::new()).await;

        assert_eq!(report[0].1, ListenerStatus::Running);
        assert_eq!(listener.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let supervisor = PortSupervisor::new(SupervisorConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), supervisor.run(token))
            .await
            .expect("supervisor should stop promptly");
    }
}
