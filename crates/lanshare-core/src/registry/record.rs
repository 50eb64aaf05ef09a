//! Registry entry types.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Status of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Waiting to be fetched
    Pending,
}

/// Status of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// File was delivered to the fetching device
    Completed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// A file staged for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFile {
    /// Opaque unique id
    pub id: String,
    /// Original file name
    pub name: String,
    /// Where the bytes are stored (never exposed over HTTP)
    #[serde(skip)]
    pub storage_path: PathBuf,
    /// Stored size in bytes
    pub size: u64,
    /// When the upload completed
    #[serde(serialize_with = "serialize_local_time")]
    pub upload_time: DateTime<Local>,
    /// Always pending while the entry exists
    pub status: PendingStatus,
}

/// A completed delivery of a staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    /// Name of the delivered file
    pub file_name: String,
    /// Device the file was delivered to
    pub device_name: String,
    /// When the delivery happened
    #[serde(serialize_with = "serialize_local_time")]
    pub transfer_time: DateTime<Local>,
    /// Delivery status
    pub status: RecordStatus,
}

impl TransferRecord {
    /// Create a completed record stamped now.
    #[must_use]
    pub fn completed(file_name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            device_name: device_name.into(),
            transfer_time: Local::now(),
            status: RecordStatus::Completed,
        }
    }
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn serialize_local_time<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&time.format(TIME_FORMAT))
}
