//! 핸들러 모듈

pub mod chat;
pub mod connection;
pub mod dispatch;
pub mod drawing;
pub mod room;
pub mod signaling;

pub use chat::*;
pub use connection::*;
pub use dispatch::*;
pub use drawing::*;
pub use room::cleanup_rooms;
pub use signaling::*;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::auth::Identity;
    use crate::config::Config;
    use crate::protocol::ServerMessage;
    use crate::state::{AppState, PeerSession};
    use tokio::sync::mpsc;

    pub fn test_state() -> AppState {
        state_with(Config::default())
    }

    pub fn state_with(config: Config) -> AppState {
        AppState::from_config(config)
    }

    /// 연결 시 id 를 밝힌 클라이언트로 입장
    pub async fn join(
        state: &AppState,
        room_id: &str,
        client_id: &str,
    ) -> (PeerSession, mpsc::Receiver<ServerMessage>) {
        join_as(state, room_id, Identity::fixed(client_id)).await
    }

    pub async fn join_as(
        state: &AppState,
        room_id: &str,
        identity: Identity,
    ) -> (PeerSession, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(state.config.connection.outbound_buffer);
        let session = super::handle_connection(state, room_id, identity, tx)
            .await
            .expect("join should succeed");
        (session, rx)
    }

    /// 지금까지 큐에 쌓인 메시지를 모두 꺼낸다
    pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
