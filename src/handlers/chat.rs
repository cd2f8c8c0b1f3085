//! 채팅 중계 (저장하지 않음)

use super::connection::verify_sender;
use super::room::reap;
use crate::error::RelayError;
use crate::protocol::ServerMessage;
use crate::state::{AppState, PeerSession};
use std::time::{SystemTime, UNIX_EPOCH};

pub async fn handle_chat(
    state: &AppState,
    session: &mut PeerSession,
    declared_from: Option<&str>,
    text: String,
) -> Result<(), RelayError> {
    let max_len = state.config.connection.max_chat_length;
    if text.trim().is_empty() {
        return Err(RelayError::MalformedMessage("chat text is empty".to_string()));
    }
    if text.chars().count() > max_len {
        return Err(RelayError::MalformedMessage(format!(
            "chat text exceeds {max_len} characters"
        )));
    }

    let room = session.room.clone();
    let room_id = room.id.as_str();
    let mut inner = room.inner.lock().await;
    verify_sender(session, &mut inner, declared_from)?;

    let sent_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let message = ServerMessage::Chat {
        from: session.client_id.clone(),
        text,
        sent_at,
    };
    inner.broadcast(room_id, Some(session.client_id.as_str()), &message, false);
    reap(&mut inner, room_id);

    tracing::debug!(client_id = %session.client_id, room_id = %room_id, "Relayed chat");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{drain, join, test_state};

    #[tokio::test]
    async fn chat_is_relayed_to_others() {
        let state = test_state();
        let (mut a, mut rx_a) = join(&state, "42", "A").await;
        let (_b, mut rx_b) = join(&state, "42", "B").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_chat(&state, &mut a, Some("A"), "hello".to_string())
            .await
            .unwrap();

        match drain(&mut rx_b).as_slice() {
            [ServerMessage::Chat { from, text, .. }] => {
                assert_eq!(from, "A");
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn oversized_or_spoofed_chat_is_refused() {
        let mut config = crate::config::Config::default();
        config.connection.max_chat_length = 5;
        let state = crate::handlers::test_support::state_with(config);
        let (mut a, _rx_a) = join(&state, "42", "A").await;
        let (_b, mut rx_b) = join(&state, "42", "B").await;
        drain(&mut rx_b);

        let err = handle_chat(&state, &mut a, None, "too long".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "malformed_message");

        let err = handle_chat(&state, &mut a, Some("B"), "hi".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "identity_mismatch");

        assert!(drain(&mut rx_b).is_empty());
    }
}
