//! Wire messages for Lanshare.
//!
//! Two JSON messages travel on the wire:
//!
//! ## Discovery datagram (UDP)
//!
//! ```json
//! {"type":"discovery","device_name":"desk"}
//! {"type":"response","device_name":"laptop","ip":"192.168.1.20","port":48481}
//! ```
//!
//! A `discovery` request is broadcast to the subnet; every listener answers
//! with a unicast `response` naming its transfer endpoint.
//!
//! ## Transfer header (TCP)
//!
//! ```json
//! {"filename":"report.pdf","filesize":52311}
//! ```
//!
//! The header occupies one fixed frame of [`HEADER_FRAME_SIZE`] bytes,
//! space-padded after the JSON, and is immediately followed by exactly
//! `filesize` raw bytes. A receiver that declines answers with the literal
//! bytes [`REJECTED`] and closes the connection.
//!
//! Receivers always read the whole frame before parsing, so a sender that
//! writes the bare JSON without padding it to [`HEADER_FRAME_SIZE`] bytes is
//! not wire-compatible: its body bytes land in the header frame and the
//! transfer fails with a protocol error.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::HEADER_FRAME_SIZE;

/// Literal reply sent by a receiver that declines a transfer.
pub const REJECTED: &[u8] = b"REJECTED";

/// Maximum size of a discovery datagram we expect to receive.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Discovery message exchanged over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    /// Broadcast request asking peers to identify themselves
    Discovery {
        /// Name of the requesting device
        device_name: String,
    },
    /// Unicast reply naming the responder's transfer endpoint
    Response {
        /// Name of the responding device
        device_name: String,
        /// IPv4 address the responder accepts transfers on
        ip: Ipv4Addr,
        /// TCP port the responder accepts transfers on
        port: u16,
    },
}

impl DiscoveryMessage {
    /// Create a discovery request.
    #[must_use]
    pub fn discovery(device_name: impl Into<String>) -> Self {
        Self::Discovery {
            device_name: device_name.into(),
        }
    }

    /// Create a discovery response.
    #[must_use]
    pub fn response(device_name: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Self::Response {
            device_name: device_name.into(),
            ip,
            port,
        }
    }

    /// Name of the device that sent this message.
    #[must_use]
    pub fn device_name(&self) -> &str {
        match self {
            Self::Discovery { device_name } | Self::Response { device_name, .. } => device_name,
        }
    }

    /// Encode the message as a JSON datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a JSON datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for non-JSON input, an unknown `type`, or a
    /// missing required field.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Protocol(format!("bad datagram: {e}")))
    }
}

/// Header sent at the start of a direct transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    /// Name of the file being sent
    pub filename: String,
    /// Number of body bytes that follow the header
    pub filesize: u64,
}

impl TransferHeader {
    /// Create a new transfer header.
    #[must_use]
    pub fn new(filename: impl Into<String>, filesize: u64) -> Self {
        Self {
            filename: filename.into(),
            filesize,
        }
    }

    /// Encode the header as one fixed-size frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderTooLarge`] if the JSON does not fit in
    /// [`HEADER_FRAME_SIZE`] bytes.
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if frame.len() > HEADER_FRAME_SIZE {
            return Err(Error::HeaderTooLarge(frame.len()));
        }
        frame.resize(HEADER_FRAME_SIZE, b' ');
        Ok(frame)
    }

    /// Decode a header frame.
    ///
    /// Trailing padding (spaces or NUL bytes) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not a valid header or the
    /// filename is empty.
    pub fn decode_frame(frame: &[u8]) -> Result<Self> {
        let end = frame
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\0' | b'\n' | b'\r' | b'\t'))
            .map_or(0, |i| i + 1);

        let header: Self = serde_json::from_slice(&frame[..end])
            .map_err(|e| Error::Protocol(format!("bad transfer header: {e}")))?;

        if header.filename.trim().is_empty() {
            return Err(Error::Protocol("empty filename in header".to_string()));
        }

        Ok(header)
    }
}

/// Reduce a peer-supplied file name to a safe final path component.
///
/// Directory parts (either separator style) are stripped. Returns `None`
/// when nothing usable remains.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => None,
        _ => Some(cleaned.to_string()),
    }
}
