//! 연결 신원 / 방 입장 자격 확인
//!
//! 실제 인증과 방 목록은 외부 서비스 몫이다. 여기서는 그 경계를 트레이트로 두고
//! 클라이언트가 선언한 id 를 믿는 약한 모드와 환경 변수 기반 허용 목록만 제공한다.

use crate::error::RelayError;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

/// 서버가 직접 만든 프레임의 from
pub const SERVER_ID: &str = "server";

const MAX_CLIENT_ID_LEN: usize = 64;

/// WebSocket 업그레이드 쿼리 파라미터
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    pub client_id: Option<String>,
}

/// 연결 신원. `provisional` 이면 서버가 임시로 붙인 id 라서
/// 클라이언트가 처음 선언하는 `from` 으로 바뀔 수 있다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub provisional: bool,
}

impl Identity {
    /// 인증되었거나 연결 시 명시된 신원
    pub fn fixed(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            provisional: false,
        }
    }

    pub fn generated() -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            provisional: true,
        }
    }
}

pub trait Authenticator: Send + Sync {
    /// 연결의 신원을 확정한다
    fn authenticate(&self, room_id: &str, params: &ConnectParams) -> Result<Identity, RelayError>;
}

pub trait RoomDirectory: Send + Sync {
    fn admits(&self, room_id: &str) -> bool;
}

/// 클라이언트가 쓸 수 있는 id 인지 확인
pub fn validate_client_id(client_id: &str) -> Result<(), RelayError> {
    if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(RelayError::InvalidIdentity(format!(
            "client_id must be 1..={MAX_CLIENT_ID_LEN} bytes"
        )));
    }
    if client_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(RelayError::InvalidIdentity(
            "client_id must not contain whitespace".to_string(),
        ));
    }
    if client_id == SERVER_ID {
        return Err(RelayError::InvalidIdentity(format!(
            "client_id {SERVER_ID:?} is reserved"
        )));
    }
    Ok(())
}

/// 클라이언트가 선언한 id 를 그대로 믿는다. 없으면 임시 id 를 만든다.
pub struct ClientDeclared;

impl Authenticator for ClientDeclared {
    fn authenticate(&self, _room_id: &str, params: &ConnectParams) -> Result<Identity, RelayError> {
        match params.client_id.as_deref() {
            Some(declared) => {
                validate_client_id(declared)?;
                Ok(Identity::fixed(declared))
            }
            None => Ok(Identity::generated()),
        }
    }
}

/// 허용된 방 키 목록. 비어 있으면 비어 있지 않은 모든 키를 허용한다.
pub struct AllowList {
    rooms: HashSet<String>,
}

impl AllowList {
    pub fn new(rooms: impl IntoIterator<Item = String>) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
        }
    }
}

impl RoomDirectory for AllowList {
    fn admits(&self, room_id: &str) -> bool {
        !room_id.is_empty() && (self.rooms.is_empty() || self.rooms.contains(room_id))
    }
}
