//! A running Lanshare node.
//!
//! [`Node::start`] brings up every service under one cancellation token:
//!
//! - the discovery listener, followed by one broadcast
//! - the transfer server and staging gateway, started and kept bound by the
//!   [`PortSupervisor`]
//!
//! Cancelling the token stops every loop; transfers already in flight are
//! left to finish.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::discovery::{Device, DiscoveryConfig, DiscoveryService, PeerTable};
use crate::error::Result;
use crate::platform::{PlatformAdapter, PlatformNotifier};
use crate::registry::TransferRegistry;
use crate::supervisor::{PortSupervisor, SupervisorConfig};
use crate::transfer::{
    ClientConfig, FileAcceptancePolicy, SendReport, ServerConfig, TransferClient, TransferServer,
};

#[cfg(feature = "web")]
use crate::web::{AppState, StagingGateway, WebServerConfig};

/// Every service of one machine.
pub struct Node {
    config: Config,
    discovery: Arc<DiscoveryService>,
    registry: Arc<TransferRegistry>,
    client: TransferClient,
    adapter: Arc<dyn PlatformAdapter>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("device_name", &self.config.general.device_name)
            .field("discovery", &self.discovery)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Validate `config` and start every service.
    ///
    /// Listeners that fail to bind on the first attempt are retried by the
    /// supervisor on its next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the discovery
    /// socket cannot be bound, or the staging directory cannot be prepared.
    pub async fn start(
        config: Config,
        adapter: Arc<dyn PlatformAdapter>,
        policy: Arc<dyn FileAcceptancePolicy>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let discovery = Arc::new(DiscoveryService::bind(DiscoveryConfig::from(&config)).await?);
        let registry = Arc::new(TransferRegistry::from_config(&config.staging).await?);

        let notifier = Arc::new(PlatformNotifier::new(Arc::clone(&adapter)));
        let transfer = TransferServer::new(ServerConfig::from(&config), policy, notifier);

        let mut supervisor = PortSupervisor::new(SupervisorConfig::from(&config));
        supervisor.manage(Arc::new(transfer));

        #[cfg(feature = "web")]
        {
            let state = AppState::new(
                Arc::clone(&registry),
                discovery.peers().clone(),
                &config.general.device_name,
            );
            supervisor.manage(Arc::new(StagingGateway::new(
                WebServerConfig::from(&config),
                state,
            )));
        }

        let mut tasks = Vec::new();

        let listener = Arc::clone(&discovery);
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { listener.listen(token).await }));

        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { supervisor.run(token).await }));

        if let Err(e) = discovery.broadcast_discovery().await {
            tracing::warn!("Initial discovery broadcast failed: {}", e);
        }

        tracing::info!(
            "Node {} started (discovery {}, transfer {}, web {})",
            config.general.device_name,
            config.network.discovery_port,
            config.network.transfer_port,
            config.network.web_port
        );

        Ok(Self {
            client: TransferClient::new(ClientConfig::from(&config)),
            config,
            discovery,
            registry,
            adapter,
            shutdown,
            tasks,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discovery service.
    #[must_use]
    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    /// Known peers.
    #[must_use]
    pub fn peers(&self) -> &PeerTable {
        self.discovery.peers()
    }

    /// Staged files and history.
    #[must_use]
    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// URL of the staging gateway as other devices see it.
    #[must_use]
    pub fn web_url(&self) -> String {
        let ip = if self.config.network.localhost_only {
            Ipv4Addr::LOCALHOST
        } else {
            self.discovery.local_ip()
        };
        format!("http://{}:{}", ip, self.config.network.web_port)
    }

    /// Open the staging gateway in the platform browser.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot open URLs.
    pub fn open_web_ui(&self) -> Result<()> {
        self.adapter.open_url(&self.web_url())
    }

    /// Send a file directly to a peer.
    ///
    /// # Errors
    ///
    /// See [`TransferClient::send_to`].
    pub async fn send<F>(&self, path: &Path, device: &Device, progress: F) -> Result<SendReport>
    where
        F: FnMut(f64),
    {
        self.client.send(path, device, progress).await
    }

    /// Ask the platform for a file and send it to a peer.
    ///
    /// Returns `Ok(None)` when no file was picked.
    ///
    /// # Errors
    ///
    /// See [`TransferClient::send_to`].
    pub async fn send_picked<F>(&self, device: &Device, progress: F) -> Result<Option<SendReport>>
    where
        F: FnMut(f64),
    {
        let Some(path) = self.adapter.pick_file() else {
            return Ok(None);
        };
        let report = self.client.send(&path, device, progress).await?;
        self.adapter.notify(
            "File sent",
            &format!("{} sent to {}", report.file_name, device.name),
        );
        Ok(Some(report))
    }

    /// Signal every service to stop and wait for the loops to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Node task ended abnormally: {}", e);
            }
        }
        tracing::info!("Node stopped");
    }
}
