//! 연결 핸들러

use crate::auth::{validate_client_id, Identity};
use crate::error::RelayError;
use crate::protocol::ServerMessage;
use crate::state::{AppState, PeerSession, RoomInner};
use tokio::sync::mpsc::Sender;

/// 새 연결 처리: 레지스트리에 등록하고 세션을 돌려준다
pub async fn handle_connection(
    state: &AppState,
    room_id: &str,
    identity: Identity,
    sender: Sender<ServerMessage>,
) -> Result<PeerSession, RelayError> {
    let session = super::room::join_room(state, room_id, identity, sender).await?;
    state.connection_opened();

    tracing::info!(
        client_id = %session.client_id,
        room_id = %session.room_id(),
        conn_id = %session.conn_id,
        provisional = session.provisional,
        "New connection established"
    );
    Ok(session)
}

/// 연결 해제 처리. 통화 당사자였다면 세션도 함께 끝난다.
pub async fn handle_disconnect(state: &AppState, session: &PeerSession) {
    super::room::leave_room(state, session).await;
    state.connection_closed();

    tracing::info!(
        client_id = %session.client_id,
        room_id = %session.room_id(),
        duration_ms = session.connected_at.elapsed().as_millis() as u64,
        "Connection closed"
    );
}

/// Heartbeat 처리
pub fn handle_heartbeat(session: &PeerSession) {
    reply(session, ServerMessage::HeartbeatAck);
}

/// 보낸 사람에게만 응답
pub fn reply(session: &PeerSession, message: ServerMessage) {
    if session.sender.try_send(message).is_err() {
        tracing::debug!(client_id = %session.client_id, "Reply dropped");
    }
}

/// 선언된 from 을 연결 신원과 맞춘다. 세션 방의 잠금을 쥔 채로 부른다.
///
/// 임시 id 로 들어온 연결은 처음 선언한 from 을 자기 신원으로 삼는다.
/// 그 뒤로는 고정된 신원과 똑같이 다른 from 을 거절한다.
pub fn verify_sender(
    session: &mut PeerSession,
    inner: &mut RoomInner,
    declared: Option<&str>,
) -> Result<(), RelayError> {
    let Some(declared) = declared else {
        return Ok(());
    };
    if declared == session.client_id {
        return Ok(());
    }
    if !session.provisional {
        return Err(RelayError::IdentityMismatch {
            declared: declared.to_string(),
            actual: session.client_id.clone(),
        });
    }

    validate_client_id(declared)?;
    let previous = super::room::rename_member(inner, &session.room.id, session.conn_id, declared)?;
    session.client_id = declared.to_string();
    session.provisional = false;

    tracing::info!(
        client_id = %session.client_id,
        previous = %previous,
        room_id = %session.room_id(),
        "Adopted declared identity"
    );
    Ok(())
}
