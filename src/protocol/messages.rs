//! 클라이언트-서버 메시지 프로토콜 정의

use crate::error::RelayError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// 드로잉 도구
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

/// 한 점짜리 스트로크 세그먼트 (절대 좌표)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub x: f64,
    pub y: f64,
    pub color: String,
    #[serde(alias = "strokeWidth", deserialize_with = "number_or_numeric_string")]
    pub size: f64,
    #[serde(default)]
    pub tool: Tool,
}

impl Stroke {
    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.size.is_finite() && self.size >= 0.0
    }
}

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Drawing
    #[serde(rename = "DRAW", alias = "draw")]
    Draw(Stroke),
    #[serde(rename = "CLEAR", alias = "clear")]
    Clear,

    // Chat
    Chat {
        from: Option<String>,
        text: String,
    },

    // Connection
    Heartbeat,

    // Call Signaling
    CallRequest {
        from: Option<String>,
    },
    CallAccept {
        from: Option<String>,
        to: Option<String>,
    },
    CallReject {
        from: Option<String>,
        to: Option<String>,
    },
    Offer {
        from: Option<String>,
        to: Option<String>,
        offer: Value,
    },
    Answer {
        from: Option<String>,
        to: Option<String>,
        answer: Value,
    },
    Candidate {
        from: Option<String>,
        to: Option<String>,
        candidate: Value,
    },
    CallEnd {
        from: Option<String>,
        to: Option<String>,
    },
}

/// 분류된 인바운드 메시지
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Draw(Stroke),
    Clear,
    Chat { from: Option<String>, text: String },
    Heartbeat,
    Signal { from: Option<String>, signal: Signal },
}

/// 통화 시그널링 메시지. offer/answer/candidate 페이로드는 열어보지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    CallRequest,
    CallAccept { to: Option<String> },
    CallReject { to: Option<String> },
    Offer { to: Option<String>, offer: Value },
    Answer { to: Option<String>, answer: Value },
    Candidate { to: Option<String>, candidate: Value },
    CallEnd { to: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    CallRequest,
    CallAccept,
    CallReject,
    Offer,
    Answer,
    Candidate,
    CallEnd,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CallRequest => "call_request",
            Self::CallAccept => "call_accept",
            Self::CallReject => "call_reject",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::CallEnd => "call_end",
        })
    }
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::CallRequest => SignalKind::CallRequest,
            Self::CallAccept { .. } => SignalKind::CallAccept,
            Self::CallReject { .. } => SignalKind::CallReject,
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::Candidate { .. } => SignalKind::Candidate,
            Self::CallEnd { .. } => SignalKind::CallEnd,
        }
    }

    /// 클라이언트가 지정한 수신자
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::CallRequest => None,
            Self::CallAccept { to }
            | Self::CallReject { to }
            | Self::Offer { to, .. }
            | Self::Answer { to, .. }
            | Self::Candidate { to, .. }
            | Self::CallEnd { to } => to.as_deref(),
        }
    }

    /// 서버가 찍은 from 과 확정된 수신자로 중계 프레임을 만든다
    pub fn into_relay(self, from: String, to: Option<String>) -> ServerMessage {
        let to_required = || to.clone().unwrap_or_default();
        match self {
            Self::CallRequest => ServerMessage::CallRequest { from },
            Self::CallAccept { .. } => ServerMessage::CallAccept {
                from,
                to: to_required(),
            },
            Self::CallReject { .. } => ServerMessage::CallReject {
                from,
                to: to_required(),
                reason: None,
            },
            Self::Offer { offer, .. } => ServerMessage::Offer {
                from,
                to: to_required(),
                offer,
            },
            Self::Answer { answer, .. } => ServerMessage::Answer {
                from,
                to: to_required(),
                answer,
            },
            Self::Candidate { candidate, .. } => ServerMessage::Candidate {
                from,
                to: to_required(),
                candidate,
            },
            Self::CallEnd { .. } => ServerMessage::CallEnd {
                from,
                to: to.clone(),
                reason: None,
            },
        }
    }
}

impl ClientMessage {
    /// 경계에서 한 번만 디코딩한다
    pub fn parse(text: &str, max_bytes: usize) -> Result<Self, RelayError> {
        if text.len() > max_bytes {
            return Err(RelayError::MessageTooLarge {
                size: text.len(),
                limit: max_bytes,
            });
        }
        serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }

    /// 드로잉 / 채팅 / 시그널링으로 분류
    pub fn classify(self) -> Result<Inbound, RelayError> {
        let inbound = match self {
            Self::Draw(stroke) => {
                if !stroke.is_finite() {
                    return Err(RelayError::MalformedMessage(
                        "DRAW coordinates and size must be finite".to_string(),
                    ));
                }
                Inbound::Draw(stroke)
            }
            Self::Clear => Inbound::Clear,
            Self::Chat { from, text } => Inbound::Chat { from, text },
            Self::Heartbeat => Inbound::Heartbeat,
            Self::CallRequest { from } => Inbound::Signal {
                from,
                signal: Signal::CallRequest,
            },
            Self::CallAccept { from, to } => Inbound::Signal {
                from,
                signal: Signal::CallAccept { to },
            },
            Self::CallReject { from, to } => Inbound::Signal {
                from,
                signal: Signal::CallReject { to },
            },
            Self::Offer { from, to, offer } => Inbound::Signal {
                from,
                signal: Signal::Offer { to, offer },
            },
            Self::Answer { from, to, answer } => Inbound::Signal {
                from,
                signal: Signal::Answer { to, answer },
            },
            Self::Candidate {
                from,
                to,
                candidate,
            } => Inbound::Signal {
                from,
                signal: Signal::Candidate { to, candidate },
            },
            Self::CallEnd { from, to } => Inbound::Signal {
                from,
                signal: Signal::CallEnd { to },
            },
        };
        Ok(inbound)
    }
}

/// 통화 종료/거절 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Busy,
    PeerDisconnected,
    Timeout,
    /// 다른 멤버가 먼저 받았다
    Answered,
    /// 다른 멤버가 거절했다
    Declined,
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Connection
    Connected {
        client_id: String,
        room_id: String,
        members: Vec<String>,
    },
    HeartbeatAck,
    Error {
        code: String,
        message: String,
    },

    // Room Events
    PeerJoined {
        client_id: String,
    },
    PeerLeft {
        client_id: String,
    },
    RoomUsers {
        users: Vec<String>,
    },

    // Drawing
    #[serde(rename = "DRAW")]
    Draw {
        from: String,
        seq: u64,
        #[serde(flatten)]
        stroke: Stroke,
    },
    #[serde(rename = "CLEAR")]
    Clear {
        from: String,
        seq: u64,
    },

    // Chat
    Chat {
        from: String,
        text: String,
        sent_at: u64,
    },

    // Call Signaling
    CallRequest {
        from: String,
    },
    CallAccept {
        from: String,
        to: String,
    },
    CallReject {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
    },
    Offer {
        from: String,
        to: String,
        offer: Value,
    },
    Answer {
        from: String,
        to: String,
        answer: Value,
    },
    Candidate {
        from: String,
        to: String,
        candidate: Value,
    },
    CallEnd {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
    },
}

impl ServerMessage {
    pub fn error(err: &RelayError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
