//! Direct file transfer for Lanshare.
//!
//! A sender opens a TCP connection to a peer's transfer port and writes:
//!
//! - one header frame of [`crate::HEADER_FRAME_SIZE`] bytes holding
//!   `{"filename": ..., "filesize": ...}`, space-padded
//! - exactly `filesize` raw bytes, in chunks of at most
//!   [`crate::MAX_CHUNK_SIZE`]
//!
//! The receiver either reads the whole body or answers with the literal
//! [`crate::protocol::REJECTED`]. A successful transfer ends with the
//! receiver closing the connection. There is no encryption, checksum or
//! resume; a failed send is retried from the first byte.

pub mod client;
pub mod server;

pub use client::{ClientConfig, SendReport, TransferClient};
pub use server::{
    AutoAccept, FileAcceptancePolicy, LogNotifier, ReceivedFile, RejectAll, ServerConfig,
    TransferNotifier, TransferServer,
};
