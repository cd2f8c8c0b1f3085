//! 환경 변수 기반 설정 관리

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub room: RoomConfig,
    pub call: CallConfig,
    pub connection: ConnectionConfig,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// 0 이면 제한 없음
    pub max_size: usize,
    /// 비어 있으면 모든 방 키 허용
    pub allowed: Vec<String>,
    pub cleanup_interval_secs: u64,
}

/// 통화 설정
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ring_timeout_secs: u64,
    pub busy_policy: BusyPolicy,
}

/// 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub outbound_buffer: usize,
    pub send_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub max_chat_length: usize,
}

/// 통화 중 들어온 두 번째 call_request 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    AutoReject,
    Drop,
}

impl FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto_reject" | "reject" => Ok(Self::AutoReject),
            "drop" | "ignore" => Ok(Self::Drop),
            other => Err(format!("unknown busy policy: {other}")),
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

impl ConnectionConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            room: RoomConfig {
                max_size: 16,
                allowed: Vec::new(),
                cleanup_interval_secs: 30,
            },
            call: CallConfig {
                ring_timeout_secs: 60,
                busy_policy: BusyPolicy::AutoReject,
            },
            connection: ConnectionConfig {
                outbound_buffer: 256,
                send_timeout_ms: 2000,
                max_message_bytes: 64 * 1024,
                max_chat_length: 2000,
            },
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: parse_or("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: list_or("CORS_ORIGINS", defaults.cors_origins),
            room: RoomConfig {
                max_size: parse_or("MAX_ROOM_SIZE", defaults.room.max_size),
                allowed: list_or("ALLOWED_ROOMS", defaults.room.allowed),
                cleanup_interval_secs: parse_or(
                    "CLEANUP_INTERVAL_SECS",
                    defaults.room.cleanup_interval_secs,
                )
                .max(1),
            },
            call: CallConfig {
                ring_timeout_secs: parse_or(
                    "CALL_RING_TIMEOUT_SECS",
                    defaults.call.ring_timeout_secs,
                ),
                busy_policy: parse_or("CALL_BUSY_POLICY", defaults.call.busy_policy),
            },
            connection: ConnectionConfig {
                outbound_buffer: parse_or("OUTBOUND_BUFFER", defaults.connection.outbound_buffer)
                    .max(1),
                send_timeout_ms: parse_or("SEND_TIMEOUT_MS", defaults.connection.send_timeout_ms),
                max_message_bytes: parse_or(
                    "MAX_MESSAGE_BYTES",
                    defaults.connection.max_message_bytes,
                ),
                max_chat_length: parse_or("MAX_CHAT_LENGTH", defaults.connection.max_chat_length),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn list_or(key: &str, default: Vec<String>) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default,
    }
}
