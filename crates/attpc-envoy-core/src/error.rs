//! Error types for the envoy system

use crate::ecc::operation::EccOperation;
use crate::message::{EmbassyMessage, MessageKind};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// A string could not be converted to an ECC operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Could not convert string {0} to an operation!")]
    BadString(String),
}

/// A string could not be converted to a status
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    #[error("Could not convert string {0} to a status!")]
    BadString(String),
}

/// Errors raised inside an envoy task
#[derive(Error, Debug)]
pub enum EnvoyError {
    #[error("Envoy received an error while making a request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Envoy failed to send a message: {0}")]
    Send(#[from] mpsc::error::SendError<EmbassyMessage>),

    #[error("Envoy received status error: {0}")]
    InvalidStatus(#[from] StatusError),

    #[error("Envoy received operation error: {0}")]
    BadOperation(#[from] OperationError),

    #[error("Envoy failed to (de)serialize a message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envoy failed to parse string to integer: {0}")]
    InvalidStringToInt(#[from] std::num::ParseIntError),

    #[error("Envoy failed to parse string to float: {0}")]
    InvalidStringToFloat(#[from] std::num::ParseFloatError),

    #[error("Envoy failed to parse XML body: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Envoy could not find XML element {0} in the response")]
    MissingXmlField(&'static str),

    #[error("Envoy received a malformed Surveyor page: {0}")]
    MalformedSurveyor(String),

    #[error("Envoy received a server error: {0}")]
    ServerError(String),

    #[error("Envoy timed out connecting to {0}")]
    TcpConnectionTimeout(String),

    #[error("Envoy connection to {0} was closed by the peer")]
    TcpConnectionClosed(String),

    #[error("Envoy IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the embassy and the sequencing built on top of it
#[derive(Error, Debug)]
pub enum EmbassyError {
    #[error("Embassy had an error sending the following message: {0}")]
    FailedSend(#[from] mpsc::error::SendError<EmbassyMessage>),

    #[error("Embassy had an error broadcasting the following message: {0}")]
    FailedBroadcast(#[from] broadcast::error::SendError<EmbassyMessage>),

    #[error("Embassy expected {expected} message, received {received} message!")]
    InvalidKind {
        expected: MessageKind,
        received: MessageKind,
    },

    #[error("Embassy had an error parsing a message: {0}")]
    FailedParse(#[from] serde_json::Error),

    #[error("Embassy communication lines were disconnected!")]
    FailedReceive,

    #[error("Embassy failed to join a task: {0}")]
    FailedJoin(#[from] tokio::task::JoinError),

    #[error("Attempted invalid transition: {0}")]
    InvalidTransition(EccOperation),

    #[error("Embassy is not connected to the envoys")]
    NotConnected,

    #[error("Embassy has no envoy with id {0}")]
    UnknownEnvoy(usize),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Timed out after {seconds}s waiting for {waiting_for}")]
    Timeout { waiting_for: String, seconds: u64 },
}

/// Errors raised while loading or saving the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config failed to parse: {0}")]
    FailedToParse(#[from] serde_yaml::Error),

    #[error("Config failed IO: {0}")]
    BadIO(#[from] std::io::Error),
}

/// Errors raised while appending to the run table
#[derive(Error, Debug)]
pub enum RunTableError {
    #[error("Run table IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run table CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Run log fields could not be encoded: {0}")]
    Fields(#[from] serde_json::Error),
}

/// Errors raised while running an extension script
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Could not spawn {script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No DataRouter information is available for {0}")]
    NoDataRouters(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_kind_display() {
        let err = EmbassyError::InvalidKind {
            expected: MessageKind::EccStatus,
            received: MessageKind::SentryStatus,
        };
        let text = err.to_string();
        assert!(text.contains("EccStatus"));
        assert!(text.contains("SentryStatus"));
    }

    #[test]
    fn test_timeout_display() {
        let err = EmbassyError::Timeout {
            waiting_for: "MuTaNT prepared".to_string(),
            seconds: 30,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 30s waiting for MuTaNT prepared"
        );
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::BadString("Jump".to_string());
        assert!(err.to_string().contains("Jump"));
    }
}
