//! The unified message passed between envoys and the embassy.

use crate::error::EmbassyError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Types of messages the embassy might send or receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    EccOperation,
    EccOperationResponse,
    EccStatus,
    SurveyorStatus,
    SentryOperation,
    SentryOperationResponse,
    SentryStatus,
    FribOperation,
    FribResponse,
    Cancel,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EccOperation => "EccOperation",
            Self::EccOperationResponse => "EccOperationResponse",
            Self::EccStatus => "EccStatus",
            Self::SurveyorStatus => "SurveyorStatus",
            Self::SentryOperation => "SentryOperation",
            Self::SentryOperationResponse => "SentryOperationResponse",
            Self::SentryStatus => "SentryStatus",
            Self::FribOperation => "FribOperation",
            Self::FribResponse => "FribResponse",
            Self::Cancel => "Cancel",
        };
        write!(f, "{name}")
    }
}

/// A type that can travel inside an [`EmbassyMessage`]. Each payload type is
/// tied to exactly one [`MessageKind`].
pub trait MessagePayload: Serialize + DeserializeOwned {
    const KIND: MessageKind;
}

/// A unified message type to simplify the transfer of data from the various
/// envoys to the embassy and back. The body is JSON; use
/// [`EmbassyMessage::decode`] to recover the typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbassyMessage {
    pub kind: MessageKind,
    pub id: usize,
    pub body: String,
}

impl std::fmt::Display for EmbassyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EmbassyMessage from {} of kind {} with body: {}",
            self.id, self.kind, self.body
        )
    }
}

impl EmbassyMessage {
    /// Wrap a payload for the envoy/module `id`
    pub fn compose<T: MessagePayload>(item: &T, id: usize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: T::KIND,
            id,
            body: serde_json::to_string(item)?,
        })
    }

    pub fn compose_cancel() -> Self {
        Self {
            kind: MessageKind::Cancel,
            id: 0,
            body: String::from("Cancel"),
        }
    }

    /// Recover the typed payload, checking that the kind matches
    pub fn decode<T: MessagePayload>(&self) -> Result<T, EmbassyError> {
        if self.kind != T::KIND {
            return Err(EmbassyError::InvalidKind {
                expected: T::KIND,
                received: self.kind,
            });
        }
        Ok(serde_json::from_str::<T>(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::envoy::{EccOperationResponse, EccStatusResponse};

    #[test]
    fn test_compose_sets_kind_and_id() {
        let status = EccStatusResponse {
            error_code: 0,
            error_message: String::new(),
            state: 4,
            transition: 0,
        };
        let message = EmbassyMessage::compose(&status, 3).unwrap();
        assert_eq!(message.kind, MessageKind::EccStatus);
        assert_eq!(message.id, 3);

        let decoded: EccStatusResponse = message.decode().unwrap();
        assert_eq!(decoded.state, 4);
    }

    #[test]
    fn test_decode_wrong_kind_is_rejected() {
        let status = EccStatusResponse::default();
        let message = EmbassyMessage::compose(&status, 0).unwrap();
        let err = message.decode::<EccOperationResponse>().unwrap_err();
        match err {
            EmbassyError::InvalidKind { expected, received } => {
                assert_eq!(expected, MessageKind::EccOperationResponse);
                assert_eq!(received, MessageKind::EccStatus);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_cancel_message() {
        let cancel = EmbassyMessage::compose_cancel();
        assert_eq!(cancel.kind, MessageKind::Cancel);
        assert_eq!(cancel.body, "Cancel");
    }
}
