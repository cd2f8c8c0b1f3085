//! 릴레이 에러 정의

use crate::call::CallError;
use thiserror::Error;

/// 연결 또는 방 단위로 국한되는 에러. 프로세스를 종료시키지 않는다.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("client is not entitled to room {0:?}")]
    UnauthorizedRoom(String),

    #[error("invalid client identity: {0}")]
    InvalidIdentity(String),

    #[error("client {client_id} already connected to room {room_id}")]
    DuplicateClient { room_id: String, client_id: String },

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("no such recipient {client_id} in room {room_id}")]
    NoSuchRecipient { room_id: String, client_id: String },

    #[error("declared sender {declared} does not match connection identity {actual}")]
    IdentityMismatch { declared: String, actual: String },

    #[error(transparent)]
    InvalidStateTransition(#[from] CallError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl RelayError {
    /// 클라이언트에게 내려보내는 error 프레임의 code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::UnauthorizedRoom(_) => "unauthorized_room",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::DuplicateClient { .. } => "duplicate_client",
            Self::RoomFull(_) => "room_full",
            Self::NoSuchRecipient { .. } => "no_such_recipient",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::ConnectionLost(_) => "connection_lost",
        }
    }
}
