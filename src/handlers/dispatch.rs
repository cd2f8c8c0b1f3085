//! 수신 프레임 분배
//!
//! 잘못된 프레임은 보낸 연결에만 error 프레임으로 알리고 연결은 유지한다.

use super::connection::reply;
use crate::error::RelayError;
use crate::protocol::{ClientMessage, Inbound, ServerMessage};
use crate::state::{AppState, PeerSession};

/// 텍스트 프레임 처리
pub async fn handle_text(state: &AppState, session: &mut PeerSession, text: &str) {
    let limit = state.config.connection.max_message_bytes;
    let inbound = match ClientMessage::parse(text, limit).and_then(ClientMessage::classify) {
        Ok(inbound) => inbound,
        Err(err) => {
            report(session, err);
            return;
        }
    };

    let result = match inbound {
        Inbound::Draw(stroke) => {
            super::handle_draw(session, stroke).await;
            Ok(())
        }
        Inbound::Clear => {
            super::handle_clear(session).await;
            Ok(())
        }
        Inbound::Chat { from, text } => {
            super::handle_chat(state, session, from.as_deref(), text).await
        }
        Inbound::Heartbeat => {
            super::handle_heartbeat(session);
            Ok(())
        }
        Inbound::Signal { from, signal } => {
            super::handle_signal(state, session, from.as_deref(), signal).await
        }
    };

    if let Err(err) = result {
        report(session, err);
    }
}

pub fn handle_binary(session: &PeerSession) {
    report(
        session,
        RelayError::MalformedMessage("binary frames are not supported".to_string()),
    );
}

/// 에러는 해당 연결에만 국한된다
pub fn report(session: &PeerSession, err: RelayError) {
    match err {
        RelayError::InvalidStateTransition(_) => {
            tracing::warn!(
                client_id = %session.client_id,
                room_id = %session.room_id(),
                error = %err,
                "Dropped signal"
            );
        }
        RelayError::NoSuchRecipient { .. } | RelayError::ConnectionLost(_) => {
            tracing::debug!(client_id = %session.client_id, error = %err, "Dropped message");
        }
        _ => {
            tracing::warn!(
                client_id = %session.client_id,
                room_id = %session.room_id(),
                error = %err,
                "Dropped message"
            );
            reply(session, ServerMessage::error(&err));
        }
    }
}
