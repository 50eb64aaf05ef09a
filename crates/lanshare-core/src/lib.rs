//! # Lanshare Core Library
//!
//! `lanshare-core` provides the networking and state core for Lanshare, a
//! local network file sharing tool.
//!
//! ## Features
//!
//! - **Peer discovery**: UDP broadcast request/response on a discovery port
//! - **Direct transfers**: a JSON header frame followed by the raw file body over TCP
//! - **HTTP staging**: an upload/download area other devices fetch from with a browser
//! - **Self-healing listeners**: a supervisor restarts listeners whose port went unbound
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`discovery`] - UDP peer discovery and the known-peers table
//! - [`node`] - Wiring of every service under one cancellation token
//! - [`platform`] - Platform capabilities (notifications, URLs, file picking)
//! - [`protocol`] - Wire messages for discovery and direct transfer
//! - [`registry`] - Pending uploads and completed-transfer history
//! - [`supervisor`] - Periodic port liveness checks
//! - [`transfer`] - Direct TCP transfer server and client
//! - [`web`] - HTTP staging gateway
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::transfer::TransferClient;
//! use lanshare_core::discovery::Device;
//!
//! let client = TransferClient::new(Default::default());
//! let report = client.send("photo.jpg", &device, |fraction| {
//!     println!("{:.0}%", fraction * 100.0);
//! }).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod node;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod supervisor;
pub mod transfer;

#[cfg(feature = "web")]
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default discovery port (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 48480;

/// Default direct transfer port (TCP)
pub const DEFAULT_TRANSFER_PORT: u16 = 48481;

/// Default web/staging port (TCP)
pub const DEFAULT_WEB_PORT: u16 = 4848;

/// Size of the fixed transfer header frame.
///
/// The JSON header (filename and filesize) must fit in a single frame of this
/// size. This is a protocol limit: the receiver never reads past it looking
/// for the end of the header.
pub const HEADER_FRAME_SIZE: usize = 1024;

/// Maximum chunk size for the transfer body
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Default number of concurrent direct transfers a receiver admits
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;
