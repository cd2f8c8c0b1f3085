//! 방 브로드캐스트와 지정 수신자 라우팅
//!
//! 모든 전송은 연결별 bounded 큐에 `try_send` 로 넣는다. 큐가 가득 찬 느린 피어는
//! 이번 메시지만 놓치고(drop-new), 닫힌 큐는 끊긴 연결로 보고 `dead` 에 기록한다.
//! 기록된 연결은 `handlers::room::reap` 이 정리한다.

use crate::error::RelayError;
use crate::protocol::ServerMessage;
use crate::state::{Member, RoomInner};
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
    Gone,
}

impl Member {
    pub fn deliver(&self, message: ServerMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

impl RoomInner {
    /// 방 전체에 전송. 개별 실패는 로그만 남기고 나머지 전송은 계속한다.
    pub fn broadcast(
        &mut self,
        room_id: &str,
        sender_id: Option<&str>,
        message: &ServerMessage,
        include_sender: bool,
    ) -> usize {
        let skipped = sender_id.filter(|_| !include_sender);
        self.broadcast_except(room_id, skipped.as_slice(), message)
    }

    /// `excluded` 에 든 멤버를 빼고 전송
    pub fn broadcast_except(
        &mut self,
        room_id: &str,
        excluded: &[&str],
        message: &ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for member in &self.members {
            if excluded.contains(&member.client_id.as_str()) {
                continue;
            }
            match member.deliver(message.clone()) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {
                    tracing::warn!(
                        room_id = %room_id,
                        client_id = %member.client_id,
                        "Outbound queue full, dropped broadcast"
                    );
                }
                Delivery::Gone => {
                    tracing::debug!(
                        room_id = %room_id,
                        client_id = %member.client_id,
                        "Broadcast hit closed connection"
                    );
                    self.dead.push(member.conn_id);
                }
            }
        }
        delivered
    }

    /// 방 안의 한 명에게만 전송
    pub fn route_to(
        &mut self,
        room_id: &str,
        target_id: &str,
        message: ServerMessage,
    ) -> Result<(), RelayError> {
        let Some(member) = self.member(target_id) else {
            return Err(RelayError::NoSuchRecipient {
                room_id: room_id.to_string(),
                client_id: target_id.to_string(),
            });
        };

        match member.deliver(message) {
            Delivery::Sent => Ok(()),
            Delivery::Dropped => {
                tracing::warn!(
                    room_id = %room_id,
                    client_id = %target_id,
                    "Outbound queue full, dropped routed message"
                );
                Ok(())
            }
            Delivery::Gone => {
                let conn_id = member.conn_id;
                self.dead.push(conn_id);
                Err(RelayError::ConnectionLost(target_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn member(id: &str, capacity: usize) -> (Member, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Member {
                client_id: id.to_string(),
                conn_id: Uuid::new_v4(),
                sender: tx,
                joined_at: Instant::now(),
            },
            rx,
        )
    }

    fn ping(from: &str) -> ServerMessage {
        ServerMessage::CallRequest {
            from: from.to_string(),
        }
    }

    #[test]
    fn broadcast_skips_sender_unless_asked() {
        let mut inner = RoomInner::default();
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        inner.members.extend([a, b]);

        assert_eq!(inner.broadcast("r", Some("A"), &ping("A"), false), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ping("A"));

        assert_eq!(inner.broadcast("r", Some("A"), &ping("A"), true), 2);
        assert_eq!(rx_a.try_recv().unwrap(), ping("A"));
    }

    #[test]
    fn broadcast_except_skips_every_listed_member() {
        let mut inner = RoomInner::default();
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        let (c, mut rx_c) = member("C", 4);
        inner.members.extend([a, b, c]);

        assert_eq!(inner.broadcast_except("r", &["A", "B"], &ping("A")), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(rx_c.try_recv().unwrap(), ping("A"));
    }

    #[test]
    fn full_queue_drops_without_failing_others() {
        let mut inner = RoomInner::default();
        let (slow, _rx_slow) = member("slow", 1);
        let (fast, mut rx_fast) = member("fast", 8);
        inner.members.extend([slow, fast]);

        for _ in 0..3 {
            inner.broadcast("r", None, &ping("A"), true);
        }
        let mut received = 0;
        while rx_fast.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
        assert!(inner.dead.is_empty());
        assert_eq!(inner.members.len(), 2);
    }

    #[test]
    fn closed_queue_is_marked_dead() {
        let mut inner = RoomInner::default();
        let (gone, rx_gone) = member("gone", 4);
        let gone_conn = gone.conn_id;
        inner.members.push(gone);
        drop(rx_gone);

        assert_eq!(inner.broadcast("r", None, &ping("A"), true), 0);
        assert_eq!(inner.dead, vec![gone_conn]);
    }

    #[test]
    fn route_to_unknown_target_is_no_such_recipient() {
        let mut inner = RoomInner::default();
        let err = inner.route_to("r", "ghost", ping("A")).unwrap_err();
        assert_eq!(err.code(), "no_such_recipient");
    }

    #[test]
    fn route_to_reaches_only_target() {
        let mut inner = RoomInner::default();
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        inner.members.extend([a, b]);

        inner.route_to("r", "B", ping("A")).unwrap();
        assert_eq!(rx_b.try_recv().unwrap(), ping("A"));
        assert!(rx_a.try_recv().is_err());
    }
}
