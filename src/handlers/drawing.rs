//! 드로잉 이벤트 중계
//!
//! 한 연결의 DRAW/CLEAR 는 연결 태스크가 순서대로 처리하고, 수신자별 큐도 FIFO 라서
//! 보낸 순서 그대로 도착한다. 서로 다른 보낸 사람 사이의 순서는 보장하지 않는다.
//! 서버는 캔버스 상태를 갖지 않는다.

use super::room::reap;
use crate::protocol::{ServerMessage, Stroke};
use crate::state::PeerSession;

/// 보낸 사람별 단조 증가 번호. DRAW 와 CLEAR 가 같은 번호열을 쓴다.
#[derive(Debug, Default)]
pub struct DrawSequencer {
    last: u64,
}

impl DrawSequencer {
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

pub async fn handle_draw(session: &mut PeerSession, stroke: Stroke) {
    let message = ServerMessage::Draw {
        from: session.client_id.clone(),
        seq: session.sequencer.next(),
        stroke,
    };
    fan_out(session, message).await;
}

pub async fn handle_clear(session: &mut PeerSession) {
    let message = ServerMessage::Clear {
        from: session.client_id.clone(),
        seq: session.sequencer.next(),
    };
    fan_out(session, message).await;
    tracing::debug!(client_id = %session.client_id, room_id = %session.room_id(), "Relayed clear");
}

async fn fan_out(session: &PeerSession, message: ServerMessage) {
    let room_id = session.room_id();
    let mut inner = session.room.inner.lock().await;
    let delivered = inner.broadcast(room_id, Some(session.client_id.as_str()), &message, false);
    reap(&mut inner, room_id);

    tracing::trace!(
        client_id = %session.client_id,
        room_id = %room_id,
        delivered = delivered,
        "Relayed drawing event"
    );
}
