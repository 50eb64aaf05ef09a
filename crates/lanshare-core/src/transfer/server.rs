//! Receiving side of direct transfers.
//!
//! Each accepted connection carries one file:
//!
//! 1. Read the fixed header frame and parse a [`TransferHeader`].
//! 2. Ask the [`FileAcceptancePolicy`]. On rejection, reply [`REJECTED`] and close.
//! 3. Read exactly `filesize` bytes into a `.part` file, in chunks no larger
//!    than the configured chunk size.
//! 4. Reserve a free destination name, rename the `.part` file over the
//!    reservation and tell the [`TransferNotifier`].
//!
//! A connection that closes early fails with [`Error::PartialTransfer`] and
//! leaves nothing behind. Failures are contained to their connection; the
//! accept loop keeps running.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{sanitize_file_name, TransferHeader, REJECTED};
use crate::supervisor::ManagedListener;
use crate::HEADER_FRAME_SIZE;

/// Decides whether an incoming file is accepted.
#[async_trait]
pub trait FileAcceptancePolicy: Send + Sync {
    /// Return `true` to receive the file described by `header` from `peer`.
    ///
    /// May wait, e.g. for a user prompt.
    async fn decide(&self, header: &TransferHeader, peer: SocketAddr) -> bool;
}

/// Accepts every transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

#[async_trait]
impl FileAcceptancePolicy for AutoAccept {
    async fn decide(&self, _header: &TransferHeader, _peer: SocketAddr) -> bool {
        true
    }
}

/// Rejects every transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl FileAcceptancePolicy for RejectAll {
    async fn decide(&self, header: &TransferHeader, peer: SocketAddr) -> bool {
        tracing::info!("Rejecting {} from {}", header.filename, peer);
        false
    }
}

/// A file that arrived completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Name the sender announced (sanitized)
    pub name: String,
    /// Where the file was saved
    pub path: PathBuf,
    /// Number of bytes received
    pub size: u64,
    /// Sender address
    pub peer: SocketAddr,
}

/// Observer for finished transfers.
pub trait TransferNotifier: Send + Sync {
    /// Called after a file was received and moved into place.
    fn transfer_received(&self, file: &ReceivedFile);

    /// Called when a connection fails.
    fn transfer_failed(&self, _peer: SocketAddr, _error: &Error) {}
}

/// Notifier that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl TransferNotifier for LogNotifier {
    fn transfer_received(&self, file: &ReceivedFile) {
        tracing::info!(
            "Received {} ({} bytes) from {} -> {}",
            file.name,
            file.size,
            file.peer,
            file.path.display()
        );
    }

    fn transfer_failed(&self, peer: SocketAddr, error: &Error) {
        tracing::warn!("Transfer from {} failed: {}", peer, error);
    }
}

/// Configuration for the transfer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the supervisor binds
    pub port: u16,
    /// Directory received files are saved to
    pub download_dir: PathBuf,
    /// Largest single read from the socket
    pub chunk_size: usize,
    /// Connections handled at once; further connections wait in the backlog
    pub max_connections: usize,
    /// Longest a read may stall before the connection is dropped
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_TRANSFER_PORT,
            download_dir: PathBuf::from("."),
            chunk_size: crate::MAX_CHUNK_SIZE,
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::Config> for ServerConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            port: config.network.transfer_port,
            download_dir: config.transfer.download_dir(),
            chunk_size: config.transfer.chunk_size,
            max_connections: config.transfer.max_connections,
            io_timeout: config.transfer.io_timeout,
        }
    }
}

/// TCP listener receiving direct transfers.
///
/// Clones share the policy, notifier and admission limit.
#[derive(Clone)]
pub struct TransferServer {
    config: Arc<ServerConfig>,
    policy: Arc<dyn FileAcceptancePolicy>,
    notifier: Arc<dyn TransferNotifier>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for TransferServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferServer")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl TransferServer {
    /// Create a server.
    pub fn new(
        config: ServerConfig,
        policy: Arc<dyn FileAcceptancePolicy>,
        notifier: Arc<dyn TransferNotifier>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            config: Arc::new(config),
            policy,
            notifier,
            permits,
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the transfer port on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<TcpListener> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind transfer port {port}: {e}")))
    }

    /// Bind `port` and accept transfers until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn listen(&self, port: u16, shutdown: CancellationToken) -> Result<()> {
        let listener = Self::bind(port).await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept transfers on an already bound listener until `shutdown` is
    /// cancelled.
    ///
    /// At most `max_connections` handlers run at once. In-flight handlers
    /// are left to finish on their own after shutdown.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Transfer server listening on {}", addr);
        }

        loop {
            let permit = tokio::select! {
                () = shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept transfer connection: {}", e);
                        continue;
                    }
                },
            };

            tracing::debug!("Transfer connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match server.handle_connection(stream, peer).await {
                    Ok(Some(file)) => server.notifier.transfer_received(&file),
                    Ok(None) => {}
                    Err(e) => server.notifier.transfer_failed(peer, &e),
                }
            });
        }

        tracing::info!("Transfer server stopped");
    }

    /// Run the receive protocol on one connection.
    ///
    /// Returns `Ok(None)` when the policy rejected the file, or when the peer
    /// closed without sending a byte (as the supervisor's port probe does).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for a bad header, [`Error::PartialTransfer`]
    /// if the sender closed early, [`Error::Timeout`] if the sender stalled,
    /// or a file system error if the file cannot be written.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> Result<Option<ReceivedFile>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(header) = self.read_header(&mut stream).await? else {
            tracing::debug!("Connection from {} closed before sending a header", peer);
            return Ok(None);
        };
        let name = sanitize_file_name(&header.filename)
            .ok_or_else(|| Error::Protocol(format!("unusable filename {:?}", header.filename)))?;

        tracing::info!(
            "Incoming file {} ({} bytes) from {}",
            name,
            header.filesize,
            peer
        );

        if !self.policy.decide(&header, peer).await {
            self.reject(&mut stream, header.filesize).await;
            return Ok(None);
        }

        let dir = &self.config.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::from_fs(&e, dir))?;

        let part_path = dir.join(format!(".{name}.{}.part", Uuid::new_v4().simple()));
        let received = match self.receive_body(&mut stream, &part_path, header.filesize).await {
            Ok(received) => received,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        let path = match reserve_destination(dir, &name).await {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };
        // Replaces only the empty placeholder this handler just created.
        if let Err(e) = tokio::fs::rename(&part_path, &path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            let _ = tokio::fs::remove_file(&path).await;
            return Err(Error::from_fs(&e, &path));
        }

        let _ = stream.shutdown().await;

        Ok(Some(ReceivedFile {
            name,
            path,
            size: received,
            peer,
        }))
    }

    async fn read_header<S>(&self, stream: &mut S) -> Result<Option<TransferHeader>>
    where
        S: AsyncRead + Unpin,
    {
        let mut frame = vec![0u8; HEADER_FRAME_SIZE];
        let mut filled = 0;

        while filled < frame.len() {
            let n = tokio::time::timeout(self.config.io_timeout, stream.read(&mut frame[filled..]))
                .await
                .map_err(|_| Error::Timeout(self.config.io_timeout.as_secs()))?
                .map_err(|e| Error::Network(e.to_string()))?;

            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Protocol(format!(
                    "connection closed after {filled} of {HEADER_FRAME_SIZE} header bytes"
                )));
            }
            filled += n;
        }

        TransferHeader::decode_frame(&frame).map(Some)
    }

    /// Reply `REJECTED`, then discard whatever the sender already pushed so
    /// the reply is not lost to a connection reset.
    async fn reject<S>(&self, stream: &mut S, filesize: u64)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(e) = stream.write_all(REJECTED).await {
            tracing::debug!("Failed to send rejection: {}", e);
            return;
        }
        let _ = stream.shutdown().await;

        let mut rest = stream.take(filesize);
        let _ = tokio::time::timeout(
            self.config.io_timeout,
            tokio::io::copy(&mut rest, &mut tokio::io::sink()),
        )
        .await;
    }

    async fn receive_body<S>(&self, stream: &mut S, part_path: &Path, filesize: u64) -> Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut file = File::create(part_path)
            .await
            .map_err(|e| Error::from_fs(&e, part_path))?;

        let chunk_size = self.config.chunk_size.clamp(1, crate::MAX_CHUNK_SIZE);
        let mut buf = vec![0u8; chunk_size];
        let mut received: u64 = 0;

        while received < filesize {
            let want = usize::try_from(filesize - received).map_or(chunk_size, |left| left.min(chunk_size));
            let n = tokio::time::timeout(self.config.io_timeout, stream.read(&mut buf[..want]))
                .await
                .map_err(|_| Error::Timeout(self.config.io_timeout.as_secs()))?
                .map_err(|e| Error::Network(e.to_string()))?;

            if n == 0 {
                return Err(Error::PartialTransfer {
                    expected: filesize,
                    received,
                });
            }

            file.write_all(&buf[..n])
                .await
                .map_err(|e| Error::from_fs(&e, part_path))?;
            received += n as u64;
            tracing::trace!("Received {}/{} bytes", received, filesize);
        }

        file.flush().await.map_err(|e| Error::from_fs(&e, part_path))?;
        file.sync_all().await.map_err(|e| Error::from_fs(&e, part_path))?;
        Ok(received)
    }
}

#[async_trait]
impl ManagedListener for TransferServer {
    fn name(&self) -> &str {
        "transfer server"
    }

    fn port(&self) -> u16 {
        self.config.port
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = Self::bind(self.config.port).await?;
        let server = self.clone();
        tokio::spawn(async move { server.serve(listener, shutdown).await });
        Ok(())
    }
}

/// Highest ` (n)` suffix tried before falling back to a random one.
const MAX_NAME_SUFFIX: u32 = 9999;

/// Claim the first free path for `name` in `dir`, adding ` (n)` before the
/// extension on collision.
///
/// The path is claimed by creating an empty file with `create_new`, so two
/// concurrent receivers never end up with the same destination.
///
/// # Errors
///
/// Returns a file system error if the directory cannot be written.
pub async fn reserve_destination(dir: &Path, name: &str) -> Result<PathBuf> {
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    let extension = as_path.extension().map(|e| e.to_string_lossy().into_owned());

    let suffixed = (1..=MAX_NAME_SUFFIX).map(|n| match &extension {
        Some(ext) => format!("{stem} ({n}).{ext}"),
        None => format!("{stem} ({n})"),
    });
    let fallback = std::iter::once(format!("{stem}-{}", Uuid::new_v4().simple()));

    for file_name in std::iter::once(name.to_string()).chain(suffixed).chain(fallback) {
        let candidate = dir.join(file_name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::from_fs(&e, &candidate)),
        }
    }

    Err(Error::FileSystem(format!(
        "no free name for {name} in {}",
        dir.display()
    )))
}
