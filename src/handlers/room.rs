//! 방 관리 핸들러 (연결 레지스트리)

use crate::auth::{Identity, SERVER_ID};
use crate::error::RelayError;
use crate::protocol::{EndReason, ServerMessage};
use crate::state::{AppState, Member, PeerSession, Room, RoomInner};
use crate::handlers::DrawSequencer;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

/// 방 참여 처리
pub async fn join_room(
    state: &AppState,
    room_id: &str,
    identity: Identity,
    sender: Sender<ServerMessage>,
) -> Result<PeerSession, RelayError> {
    let Identity {
        client_id,
        provisional,
    } = identity;
    let room_id = room_id.trim().to_string();
    if !state.directory.admits(&room_id) {
        return Err(RelayError::UnauthorizedRoom(room_id));
    }
    let max_size = state.config.room.max_size;

    loop {
        // DashMap 참조는 await 전에 놓는다
        let room = state
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                tracing::info!(room_id = %room_id, "Room created");
                Arc::new(Room::new(room_id.clone()))
            })
            .clone();

        let mut inner = room.inner.lock().await;
        if inner.closed {
            // 마지막 멤버가 막 나가 레지스트리에서 빠지는 중인 방
            drop(inner);
            tokio::task::yield_now().await;
            continue;
        }

        if inner.contains(&client_id) {
            tracing::warn!(room_id = %room_id, client_id = %client_id, "Duplicate client rejected");
            return Err(RelayError::DuplicateClient {
                room_id,
                client_id,
            });
        }
        if max_size > 0 && inner.members.len() >= max_size {
            tracing::warn!(room_id = %room_id, "Room full, rejected join");
            return Err(RelayError::RoomFull(room_id));
        }

        // 새 사용자에게 기존 사용자 목록 전송
        let _ = sender.try_send(ServerMessage::Connected {
            client_id: client_id.clone(),
            room_id: room_id.clone(),
            members: inner.member_ids(),
        });

        let conn_id = Uuid::new_v4();
        inner.members.push(Member {
            client_id: client_id.clone(),
            conn_id,
            sender: sender.clone(),
            joined_at: Instant::now(),
        });

        // 기존 사용자들에게 새 사용자 알림
        inner.broadcast(
            &room_id,
            Some(client_id.as_str()),
            &ServerMessage::PeerJoined {
                client_id: client_id.clone(),
            },
            false,
        );
        let users = inner.member_ids();
        let user_count = users.len();
        inner.broadcast(&room_id, None, &ServerMessage::RoomUsers { users }, true);
        reap(&mut inner, &room_id);
        drop(inner);

        tracing::info!(
            client_id = %client_id,
            room_id = %room_id,
            user_count = user_count,
            "User joined room"
        );

        return Ok(PeerSession {
            client_id,
            provisional,
            conn_id,
            room,
            sender,
            sequencer: DrawSequencer::default(),
            connected_at: Instant::now(),
        });
    }
}

/// 방 나가기 처리. 이미 정리된 연결이면 아무 일도 하지 않는다.
pub async fn leave_room(state: &AppState, session: &PeerSession) {
    let room_id = session.room_id();
    let mut inner = session.room.inner.lock().await;

    if let Some(member) = inner.remove(session.conn_id) {
        depart(&mut inner, room_id, &member.client_id);
        reap(&mut inner, room_id);
        tracing::info!(
            client_id = %member.client_id,
            room_id = %room_id,
            remaining = inner.members.len(),
            stay_ms = member.joined_at.elapsed().as_millis() as u64,
            "User left room"
        );
    }

    if inner.members.is_empty() && !inner.closed {
        inner.closed = true;
        drop(inner);
        remove_room(state, &session.room);
    }
}

/// 임시 id 로 들어온 멤버를 선언된 id 로 바꾸고 방에 알린다.
/// 바뀌기 전 id 를 돌려준다.
pub(crate) fn rename_member(
    inner: &mut RoomInner,
    room_id: &str,
    conn_id: Uuid,
    client_id: &str,
) -> Result<String, RelayError> {
    if inner.contains(client_id) {
        tracing::warn!(room_id = %room_id, client_id = %client_id, "Declared identity already in use");
        return Err(RelayError::DuplicateClient {
            room_id: room_id.to_string(),
            client_id: client_id.to_string(),
        });
    }
    let Some(index) = inner.members.iter().position(|m| m.conn_id == conn_id) else {
        return Err(RelayError::ConnectionLost(client_id.to_string()));
    };

    // 임시 id 로 걸린 통화가 있으면 세션과 어긋나므로 바꾸지 않는다
    let current = inner.members[index].client_id.clone();
    if inner.call.session().is_some_and(|s| s.involves(&current)) {
        return Err(RelayError::IdentityMismatch {
            declared: client_id.to_string(),
            actual: current,
        });
    }
    inner.members[index].client_id = client_id.to_string();

    inner.broadcast(
        room_id,
        Some(client_id),
        &ServerMessage::PeerLeft {
            client_id: current.clone(),
        },
        false,
    );
    inner.broadcast(
        room_id,
        Some(client_id),
        &ServerMessage::PeerJoined {
            client_id: client_id.to_string(),
        },
        false,
    );
    let users = inner.member_ids();
    inner.broadcast(room_id, None, &ServerMessage::RoomUsers { users }, true);
    reap(inner, room_id);
    Ok(current)
}

/// 멤버가 빠진 뒤의 후처리: 통화 정리, 퇴장 알림
pub(crate) fn depart(inner: &mut RoomInner, room_id: &str, client_id: &str) {
    if let Some(ended) = inner.call.party_left(client_id) {
        tracing::info!(
            room_id = %room_id,
            departed = %ended.departed,
            phase = %ended.phase,
            "Call ended by disconnect"
        );
        match ended.survivor {
            Some(survivor) => {
                let notice = ServerMessage::CallReject {
                    from: ended.departed.clone(),
                    to: survivor.clone(),
                    reason: Some(EndReason::PeerDisconnected),
                };
                if let Err(err) = inner.route_to(room_id, &survivor, notice) {
                    tracing::debug!(room_id = %room_id, error = %err, "Survivor already gone");
                }
            }
            None => {
                let notice = ServerMessage::CallEnd {
                    from: ended.departed.clone(),
                    to: None,
                    reason: Some(EndReason::PeerDisconnected),
                };
                inner.broadcast(room_id, Some(client_id), &notice, false);
            }
        }
    }

    inner.broadcast(
        room_id,
        Some(client_id),
        &ServerMessage::PeerLeft {
            client_id: client_id.to_string(),
        },
        false,
    );
    if !inner.members.is_empty() {
        let users = inner.member_ids();
        inner.broadcast(room_id, None, &ServerMessage::RoomUsers { users }, true);
    }
}

/// 전송 중 끊긴 것으로 확인된 연결을 정리한다. 정리 중 새로 끊긴 연결도 함께 처리.
pub(crate) fn reap(inner: &mut RoomInner, room_id: &str) {
    while let Some(conn_id) = inner.dead.pop() {
        if let Some(member) = inner.remove(conn_id) {
            tracing::info!(
                room_id = %room_id,
                client_id = %member.client_id,
                "Evicted closed connection"
            );
            depart(inner, room_id, &member.client_id);
        }
    }
}

fn remove_room(state: &AppState, room: &Arc<Room>) {
    // 같은 키로 새로 만들어진 방은 건드리지 않는다
    if state
        .rooms
        .remove_if(&room.id, |_, current| Arc::ptr_eq(current, room))
        .is_some()
    {
        tracing::info!(room_id = %room.id, "Room deleted");
    }
}

/// 울리기만 하는 통화 만료 + 빈 방 정리
pub async fn cleanup_rooms(state: Arc<AppState>) {
    let ring_timeout = state.config.call.ring_timeout();
    let now = Instant::now();
    let rooms: Vec<Arc<Room>> = state.rooms.iter().map(|r| r.value().clone()).collect();
    let mut deleted = 0;

    for room in rooms {
        let mut inner = room.inner.lock().await;

        if let Some(expired) = inner.call.expire_ringing(now, ring_timeout) {
            tracing::info!(
                room_id = %room.id,
                caller = %expired.caller,
                "Call request timed out"
            );
            let to_caller = ServerMessage::CallReject {
                from: SERVER_ID.to_string(),
                to: expired.caller.clone(),
                reason: Some(EndReason::Timeout),
            };
            if let Err(err) = inner.route_to(&room.id, &expired.caller, to_caller) {
                tracing::debug!(room_id = %room.id, error = %err, "Caller already gone");
            }
            let to_room = ServerMessage::CallEnd {
                from: expired.caller.clone(),
                to: None,
                reason: Some(EndReason::Timeout),
            };
            inner.broadcast(&room.id, Some(expired.caller.as_str()), &to_room, false);
            reap(&mut inner, &room.id);
        }

        if inner.members.is_empty() && !inner.closed {
            inner.closed = true;
            drop(inner);
            tracing::info!(
                room_id = %room.id,
                age_ms = now.saturating_duration_since(room.created_at).as_millis() as u64,
                "Cleaned up empty room"
            );
            remove_room(&state, &room);
            deleted += 1;
        }
    }

    if deleted > 0 {
        tracing::info!(deleted_rooms = deleted, "Cleanup completed");
    }
}
