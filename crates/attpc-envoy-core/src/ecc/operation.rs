//! ECC server states and the operations that move between them.
//!
//! The ECC state machine progresses Idle -> Described -> Prepared -> Ready,
//! and Ready <-> Running through Start/Stop. Busy is a local marker set while
//! a transition is in flight.

use crate::error::{OperationError, StatusError};
use crate::message::{MessageKind, MessagePayload};
use serde::{Deserialize, Serialize};

const ECC_OFFLINE_STATUS: &str = "Offline";
const ECC_BUSY_STATUS: &str = "Busy";
const ECC_IDLE_STATUS: &str = "Idle";
const ECC_PREPARED_STATUS: &str = "Prepared";
const ECC_DESCRIBED_STATUS: &str = "Described";
const ECC_READY_STATUS: &str = "Ready";
const ECC_RUNNING_STATUS: &str = "Running";
const ECC_INCONSISTENT_STATUS: &str = "Inconsistent";
const ECC_ERROR_STATUS: &str = "Error";

const ECC_DESCRIBE_OP: &str = "Describe";
const ECC_PREPARE_OP: &str = "Prepare";
const ECC_CONFIGURE_OP: &str = "Configure";
const ECC_START_OP: &str = "Start";
const ECC_UNDO_OP: &str = "Undo";
const ECC_BREAKUP_OP: &str = "Breakup";
const ECC_STOP_OP: &str = "Stop";
const ECC_INVALID_OP: &str = "Invalid";

/// The status of a GetECCServer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccStatus {
    Offline,
    Busy,
    Idle,
    Described,
    Prepared,
    Ready,
    Running,
    Error,
    Inconsistent,
}

impl std::fmt::Display for EccStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<EccStatus> for String {
    fn from(value: EccStatus) -> String {
        String::from(value.as_str())
    }
}

impl From<EccStatus> for i32 {
    fn from(value: EccStatus) -> i32 {
        match value {
            EccStatus::Offline => 0,
            EccStatus::Idle => 1,
            EccStatus::Described => 2,
            EccStatus::Prepared => 3,
            EccStatus::Ready => 4,
            EccStatus::Running => 5,
            EccStatus::Busy => 6,
            EccStatus::Error | EccStatus::Inconsistent => -1,
        }
    }
}

impl From<i32> for EccStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => EccStatus::Offline,
            1 => EccStatus::Idle,
            2 => EccStatus::Described,
            3 => EccStatus::Prepared,
            4 => EccStatus::Ready,
            5 => EccStatus::Running,
            6 => EccStatus::Busy,
            _ => EccStatus::Error,
        }
    }
}

impl std::str::FromStr for EccStatus {
    type Err = StatusError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            ECC_OFFLINE_STATUS => Ok(Self::Offline),
            ECC_BUSY_STATUS => Ok(Self::Busy),
            ECC_IDLE_STATUS => Ok(Self::Idle),
            ECC_PREPARED_STATUS => Ok(Self::Prepared),
            ECC_DESCRIBED_STATUS => Ok(Self::Described),
            ECC_READY_STATUS => Ok(Self::Ready),
            ECC_RUNNING_STATUS => Ok(Self::Running),
            ECC_ERROR_STATUS => Ok(Self::Error),
            ECC_INCONSISTENT_STATUS => Ok(Self::Inconsistent),
            _ => Err(StatusError::BadString(value.to_string())),
        }
    }
}

impl EccStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => ECC_OFFLINE_STATUS,
            Self::Busy => ECC_BUSY_STATUS,
            Self::Idle => ECC_IDLE_STATUS,
            Self::Prepared => ECC_PREPARED_STATUS,
            Self::Described => ECC_DESCRIBED_STATUS,
            Self::Ready => ECC_READY_STATUS,
            Self::Running => ECC_RUNNING_STATUS,
            Self::Error => ECC_ERROR_STATUS,
            Self::Inconsistent => ECC_INCONSISTENT_STATUS,
        }
    }

    /// Get the operation that progresses the system from this status
    pub fn forward_operation(&self) -> EccOperation {
        match self {
            EccStatus::Idle => EccOperation::Describe,
            EccStatus::Described => EccOperation::Prepare,
            EccStatus::Prepared => EccOperation::Configure,
            _ => EccOperation::Invalid,
        }
    }

    /// Get the operation that regresses the system from this status
    pub fn backward_operation(&self) -> EccOperation {
        match self {
            EccStatus::Ready => EccOperation::Breakup,
            EccStatus::Prepared => EccOperation::Undo,
            EccStatus::Described => EccOperation::Undo,
            _ => EccOperation::Invalid,
        }
    }

    pub fn can_go_forward(&self) -> bool {
        matches!(
            self,
            EccStatus::Idle | EccStatus::Described | EccStatus::Prepared
        )
    }

    pub fn can_go_backward(&self) -> bool {
        matches!(
            self,
            EccStatus::Ready | EccStatus::Prepared | EccStatus::Described
        )
    }
}

/// An operation to be performed on a GetECCServer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EccOperation {
    Describe,
    Prepare,
    Configure,
    Start,
    Undo,
    Breakup,
    Stop,
    Invalid,
}

impl MessagePayload for EccOperation {
    const KIND: MessageKind = MessageKind::EccOperation;
}

impl std::fmt::Display for EccOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EccOperation {
    type Err = OperationError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            ECC_DESCRIBE_OP => Ok(Self::Describe),
            ECC_PREPARE_OP => Ok(Self::Prepare),
            ECC_CONFIGURE_OP => Ok(Self::Configure),
            ECC_START_OP => Ok(Self::Start),
            ECC_UNDO_OP => Ok(Self::Undo),
            ECC_BREAKUP_OP => Ok(Self::Breakup),
            ECC_STOP_OP => Ok(Self::Stop),
            ECC_INVALID_OP => Ok(Self::Invalid),
            _ => Err(OperationError::BadString(value.to_string())),
        }
    }
}

impl From<EccOperation> for String {
    fn from(value: EccOperation) -> String {
        String::from(value.as_str())
    }
}

impl EccOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Describe => ECC_DESCRIBE_OP,
            Self::Prepare => ECC_PREPARE_OP,
            Self::Configure => ECC_CONFIGURE_OP,
            Self::Start => ECC_START_OP,
            Self::Undo => ECC_UNDO_OP,
            Self::Breakup => ECC_BREAKUP_OP,
            Self::Stop => ECC_STOP_OP,
            Self::Invalid => ECC_INVALID_OP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_are_inverse() {
        for status in [
            EccStatus::Offline,
            EccStatus::Idle,
            EccStatus::Described,
            EccStatus::Prepared,
            EccStatus::Ready,
            EccStatus::Running,
            EccStatus::Busy,
        ] {
            let code: i32 = status.into();
            assert_eq!(EccStatus::from(code), status);
        }
    }

    #[test]
    fn test_unknown_code_is_error() {
        assert_eq!(EccStatus::from(42), EccStatus::Error);
        assert_eq!(EccStatus::from(-1), EccStatus::Error);
        assert_eq!(i32::from(EccStatus::Inconsistent), -1);
    }

    #[test]
    fn test_forward_chain() {
        assert_eq!(EccStatus::Idle.forward_operation(), EccOperation::Describe);
        assert_eq!(
            EccStatus::Described.forward_operation(),
            EccOperation::Prepare
        );
        assert_eq!(
            EccStatus::Prepared.forward_operation(),
            EccOperation::Configure
        );
        assert_eq!(EccStatus::Ready.forward_operation(), EccOperation::Invalid);
        assert!(!EccStatus::Ready.can_go_forward());
        assert!(!EccStatus::Busy.can_go_forward());
    }

    #[test]
    fn test_backward_chain() {
        assert_eq!(EccStatus::Ready.backward_operation(), EccOperation::Breakup);
        assert_eq!(EccStatus::Prepared.backward_operation(), EccOperation::Undo);
        assert_eq!(EccStatus::Described.backward_operation(), EccOperation::Undo);
        assert_eq!(EccStatus::Idle.backward_operation(), EccOperation::Invalid);
        assert!(!EccStatus::Running.can_go_backward());
        assert!(EccStatus::Described.can_go_backward());
    }

    #[test]
    fn test_string_round_trip() {
        assert_eq!("Ready".parse::<EccStatus>().unwrap(), EccStatus::Ready);
        assert_eq!(String::from(EccStatus::Running), "Running");
        assert_eq!("Breakup".parse::<EccOperation>().unwrap(), EccOperation::Breakup);
        assert!("Explode".parse::<EccOperation>().is_err());
        assert!("Sleeping".parse::<EccStatus>().is_err());
    }
}
