use crate::error::{OperationError, StatusError};
use crate::message::{MessageKind, MessagePayload};
use serde::{Deserialize, Serialize};

const FRIB_BEGIN_RUN: &str = "begin";
const FRIB_END_RUN: &str = "end";
const FRIB_CHECK_STATUS: &str = "get state";

const FRIB_OK: &str = "OK";
const FRIB_ERROR: &str = "ERROR";
const FRIB_FAIL: &str = "FAIL";

/// A FRIBDAQ run-control command. The wire text is the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FribOperation {
    Begin,
    End,
    Check,
}

impl MessagePayload for FribOperation {
    const KIND: MessageKind = MessageKind::FribOperation;
}

impl FribOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => FRIB_BEGIN_RUN,
            Self::End => FRIB_END_RUN,
            Self::Check => FRIB_CHECK_STATUS,
        }
    }
}

impl std::fmt::Display for FribOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FribOperation {
    type Err = OperationError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            FRIB_BEGIN_RUN => Ok(Self::Begin),
            FRIB_END_RUN => Ok(Self::End),
            FRIB_CHECK_STATUS => Ok(Self::Check),
            _ => Err(OperationError::BadString(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FribStatus {
    Ok,
    Errored,
    Failed,
}

impl FribStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => FRIB_OK,
            Self::Errored => FRIB_ERROR,
            Self::Failed => FRIB_FAIL,
        }
    }

    /// Classify a raw reply from the response port
    pub fn from_reply(reply: &str) -> Self {
        if reply.contains(FRIB_OK) {
            Self::Ok
        } else if reply.contains(FRIB_ERROR) {
            Self::Errored
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for FribStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FribStatus {
    type Err = StatusError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            FRIB_OK => Ok(Self::Ok),
            FRIB_ERROR => Ok(Self::Errored),
            FRIB_FAIL => Ok(Self::Failed),
            _ => Err(StatusError::BadString(value.to_string())),
        }
    }
}

/// Reply to a FRIBDAQ operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FribResponse {
    pub operation: FribOperation,
    pub status: FribStatus,
    pub text: String,
}

impl MessagePayload for FribResponse {
    const KIND: MessageKind = MessageKind::FribResponse;
}
