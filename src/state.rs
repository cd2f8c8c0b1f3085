//! 애플리케이션 상태 관리

use crate::auth::{AllowList, Authenticator, ClientDeclared, RoomDirectory};
use crate::call::CallMachine;
use crate::config::Config;
use crate::handlers::DrawSequencer;
use crate::protocol::ServerMessage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::Sender, Mutex};
use uuid::Uuid;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 방 정보 (room_id -> Room). 방 단위로 잠근다.
    pub rooms: DashMap<String, Arc<Room>>,
    /// 설정
    pub config: Arc<Config>,
    pub authenticator: Arc<dyn Authenticator>,
    pub directory: Arc<dyn RoomDirectory>,
    connections: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            config: Arc::new(config),
            authenticator,
            directory,
            connections: AtomicUsize::new(0),
        }
    }

    /// 클라이언트 선언 신원 + 설정의 방 허용 목록
    pub fn from_config(config: Config) -> Self {
        let directory = AllowList::new(config.room.allowed.iter().cloned());
        Self::new(config, Arc::new(ClientDeclared), Arc::new(directory))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// 방 정보
pub struct Room {
    pub id: String,
    pub inner: Mutex<RoomInner>,
    pub created_at: Instant,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            inner: Mutex::new(RoomInner::default()),
            created_at: Instant::now(),
        }
    }
}

/// 방 잠금 안에서만 바뀌는 상태
#[derive(Default)]
pub struct RoomInner {
    /// 입장 순서대로 유지
    pub members: Vec<Member>,
    pub call: CallMachine,
    /// 레지스트리에서 빠진 방. 새 입장은 다시 조회해야 한다.
    pub closed: bool,
    /// 전송 중 끊긴 것으로 확인된 연결
    pub(crate) dead: Vec<Uuid>,
}

impl RoomInner {
    pub fn contains(&self, client_id: &str) -> bool {
        self.members.iter().any(|m| m.client_id == client_id)
    }

    pub fn member(&self, client_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.client_id == client_id)
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.client_id.clone()).collect()
    }

    /// 연결 토큰이 일치할 때만 제거한다
    pub fn remove(&mut self, conn_id: Uuid) -> Option<Member> {
        let index = self.members.iter().position(|m| m.conn_id == conn_id)?;
        Some(self.members.remove(index))
    }
}

/// 방에 들어와 있는 연결
pub struct Member {
    pub client_id: String,
    pub conn_id: Uuid,
    pub sender: Sender<ServerMessage>,
    pub joined_at: Instant,
}

/// 연결 태스크가 소유하는 세션 정보
pub struct PeerSession {
    pub client_id: String,
    /// 아직 선언된 from 으로 바뀔 수 있는 임시 id 인지
    pub provisional: bool,
    pub conn_id: Uuid,
    pub room: Arc<Room>,
    pub sender: Sender<ServerMessage>,
    pub sequencer: DrawSequencer,
    pub connected_at: Instant,
}

impl PeerSession {
    pub fn room_id(&self) -> &str {
        &self.room.id
    }
}
