//! Sending side of direct transfers.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::discovery::Device;
use crate::error::{Error, Result};
use crate::protocol::{sanitize_file_name, TransferHeader, REJECTED};

/// Configuration for the transfer client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest single write to the socket
    pub chunk_size: usize,
    /// How long to wait for the TCP connection
    pub connect_timeout: Duration,
    /// Longest a single write may stall.
    ///
    /// Unset by default: a receiver that prompts its user stops reading
    /// until the user answers.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::MAX_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            write_timeout: None,
        }
    }
}

impl From<&crate::config::Config> for ClientConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size,
            ..Self::default()
        }
    }
}

/// Outcome of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Name announced to the receiver
    pub file_name: String,
    /// Body bytes written
    pub bytes_sent: u64,
    /// Time from connect to close
    pub elapsed: Duration,
}

impl SendReport {
    /// Average throughput in bytes per second.
    #[must_use]
    pub fn speed_bps(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_sent as f64 / secs) as u64
        } else {
            self.bytes_sent
        }
    }
}

/// Pushes files to a peer's transfer server.
#[derive(Debug, Clone, Default)]
pub struct TransferClient {
    config: ClientConfig,
}

impl TransferClient {
    /// Create a client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Send a file to a discovered device.
    ///
    /// `progress` receives the fraction sent, in `[0, 1]`, after each chunk.
    ///
    /// # Errors
    ///
    /// See [`Self::send_to`].
    pub async fn send<P, F>(&self, path: P, device: &Device, progress: F) -> Result<SendReport>
    where
        P: AsRef<Path>,
        F: FnMut(f64),
    {
        self.send_to(path, device.transfer_addr(), progress).await
    }

    /// Send a file to a transfer server address.
    ///
    /// The connection is always closed on return. There is no resumption;
    /// a retry starts again from the first byte.
    ///
    /// # Errors
    ///
    /// - [`Error::FileNotFound`] if `path` does not exist
    /// - [`Error::ConnectFailed`] if the connection cannot be opened
    /// - [`Error::Network`] if a write fails mid-stream
    /// - [`Error::TransferRejected`] if the receiver declined
    pub async fn send_to<P, F>(&self, path: P, addr: SocketAddr, mut progress: F) -> Result<SendReport>
    where
        P: AsRef<Path>,
        F: FnMut(f64),
    {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::from_fs(&e, path))?;
        if !meta.is_file() {
            return Err(Error::FileSystem(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|n| sanitize_file_name(&n.to_string_lossy()))
            .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;
        let filesize = meta.len();
        let frame = TransferHeader::new(&file_name, filesize).encode_frame()?;

        let mut file = File::open(path).await.map_err(|e| Error::from_fs(&e, path))?;

        let started = Instant::now();
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectFailed {
                addr,
                reason: "connection timed out".to_string(),
            })?
            .map_err(|e| Error::ConnectFailed {
                addr,
                reason: e.to_string(),
            })?;

        tracing::info!("Sending {} ({} bytes) to {}", file_name, filesize, addr);

        let (mut reader, mut writer) = stream.into_split();
        let reply = read_reply(&mut reader);
        tokio::pin!(reply);

        tokio::select! {
            biased;
            streamed = self.stream_body(&mut file, &mut writer, &frame, filesize, &mut progress) => {
                if let Err(e) = streamed {
                    // a write failure right after a rejection usually means the
                    // receiver closed on us
                    let late = tokio::time::timeout(Duration::from_millis(500), &mut reply).await;
                    if late.is_ok_and(|bytes| bytes.starts_with(REJECTED)) {
                        return Err(Error::TransferRejected);
                    }
                    return Err(e);
                }
            }
            bytes = &mut reply => {
                if bytes.starts_with(REJECTED) {
                    tracing::info!("{} rejected {}", addr, file_name);
                    return Err(Error::TransferRejected);
                }
                return Err(Error::Network(format!("{addr} closed the connection mid-transfer")));
            }
        }

        let _ = writer.shutdown().await;

        let reply = match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, reply).await.unwrap_or_default(),
            None => reply.await,
        };
        if reply.starts_with(REJECTED) {
            tracing::info!("{} rejected {}", addr, file_name);
            return Err(Error::TransferRejected);
        }

        let report = SendReport {
            file_name,
            bytes_sent: filesize,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Sent {} to {} in {:.1}s",
            report.file_name,
            addr,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    async fn stream_body<R, W, F>(
        &self,
        file: &mut R,
        writer: &mut W,
        frame: &[u8],
        filesize: u64,
        progress: &mut F,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(f64),
    {
        self.write(writer, frame).await?;

        if filesize == 0 {
            progress(1.0);
            return Ok(());
        }

        let chunk_size = self.config.chunk_size.clamp(1, crate::MAX_CHUNK_SIZE);
        let mut buf = vec![0u8; chunk_size];
        let mut sent: u64 = 0;

        while sent < filesize {
            let want = usize::try_from(filesize - sent).map_or(chunk_size, |left| left.min(chunk_size));
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::FileSystem(format!(
                    "file shrank while sending: {sent} of {filesize} bytes read"
                )));
            }

            self.write(writer, &buf[..n]).await?;
            sent += n as u64;
            progress(sent as f64 / filesize as f64);
        }

        writer
            .flush()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }

    async fn write<W>(&self, writer: &mut W, bytes: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let write = writer.write_all(bytes);
        let result = match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| Error::Timeout(limit.as_secs()))?,
            None => write.await,
        };
        result.map_err(|e| Error::Network(e.to_string()))
    }
}

/// Collect the receiver's reply until it closes or `REJECTED` is complete.
async fn read_reply<R>(reader: &mut R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut reply = Vec::with_capacity(REJECTED.len());
    let mut buf = [0u8; 16];

    while reply.len() < REJECTED.len() {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
        }
    }

    reply
}
