use crate::message::{MessageKind, MessagePayload};
use serde::{Deserialize, Serialize};

const SENTRY_ONLINE: &str = "Online";
const SENTRY_OFFLINE: &str = "Offline";
const SENTRY_INCONSISTENT: &str = "Inconsistent";

const NOT_AVAILABLE: &str = "N/A";

/// Parameters sent along with every Sentry operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentryParameters {
    pub experiment: String,
    pub run_number: i32,
}

/// The JSON body returned by the Sentry server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentryResponse {
    pub disk: String,
    pub process: String,
    pub data_path: String,
    pub data_written_gb: f64,
    pub data_path_files: i32,
    pub disk_avail_gb: f64,
    pub disk_total_gb: f64,
}

/// A Sentry response annotated with the accumulated total and data rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentryStatus {
    pub disk: String,
    pub process: String,
    pub data_path: String,
    pub data_written_gb: f64,
    pub data_path_files: i32,
    pub disk_avail_gb: f64,
    pub disk_total_gb: f64,
    pub data_rate_mb: f64,
}

impl Default for SentryStatus {
    fn default() -> Self {
        Self {
            disk: String::from(NOT_AVAILABLE),
            process: String::from(NOT_AVAILABLE),
            data_path: String::from(NOT_AVAILABLE),
            data_written_gb: 0.0,
            data_path_files: 0,
            disk_avail_gb: 0.0,
            disk_total_gb: 0.0,
            data_rate_mb: 0.0,
        }
    }
}

impl MessagePayload for SentryStatus {
    const KIND: MessageKind = MessageKind::SentryStatus;
}

impl SentryStatus {
    /// The server reports what was written since its last report. Add that
    /// to the running total and convert it to a rate in MB/s.
    pub fn from_response(resp: SentryResponse, prev_written_gb: f64, elapsed_secs: f64) -> Self {
        let elapsed_secs = elapsed_secs.max(f64::EPSILON);
        Self {
            data_rate_mb: (resp.data_written_gb / elapsed_secs) * 1.0e3,
            data_written_gb: prev_written_gb + resp.data_written_gb,
            disk: resp.disk,
            process: resp.process,
            data_path: resp.data_path,
            data_path_files: resp.data_path_files,
            disk_avail_gb: resp.disk_avail_gb,
            disk_total_gb: resp.disk_total_gb,
        }
    }
}

/// Operations the Sentry server supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SentryOperation {
    /// Record the run's files in the server-side catalog
    Catalog(SentryParameters),
    /// Back up the data directory, resetting the written total
    Backup(SentryParameters),
}

impl MessagePayload for SentryOperation {
    const KIND: MessageKind = MessageKind::SentryOperation;
}

impl SentryOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "Catalog",
            Self::Backup(_) => "Backup",
        }
    }

    pub fn parameters(&self) -> &SentryParameters {
        match self {
            Self::Catalog(p) | Self::Backup(p) => p,
        }
    }
}

/// Result of a Sentry operation, sent back to the embassy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentryOperationResponse {
    pub operation: String,
    pub success: bool,
    pub status: SentryStatus,
}

impl MessagePayload for SentryOperationResponse {
    const KIND: MessageKind = MessageKind::SentryOperationResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentryServerStatus {
    Online,
    Offline,
    Inconsistent,
}

impl std::fmt::Display for SentryServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "{SENTRY_ONLINE}"),
            Self::Offline => write!(f, "{SENTRY_OFFLINE}"),
            Self::Inconsistent => write!(f, "{SENTRY_INCONSISTENT}"),
        }
    }
}

impl From<&SentryStatus> for SentryServerStatus {
    fn from(value: &SentryStatus) -> Self {
        if value.disk != NOT_AVAILABLE {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

impl From<SentryServerStatus> for String {
    fn from(value: SentryServerStatus) -> Self {
        value.to_string()
    }
}
