//! 방 단위 1:1 통화 세션 상태 머신
//!
//! 서버는 통화 결과를 결정하지 않는다. 현재 상태에서 어떤 시그널을 누구에게
//! 중계해도 되는지만 판단하고, 방마다 살아 있는 세션은 최대 하나다.

use crate::protocol::{Signal, SignalKind};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 통화 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Requested,
    Accepted,
    Negotiating,
    Active,
    Ended,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Ended => "ended",
        })
    }
}

/// 진행 중인 통화
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub caller: String,
    pub callee: Option<String>,
    pub phase: CallPhase,
    pub created_at: Instant,
}

impl CallSession {
    pub fn involves(&self, client_id: &str) -> bool {
        self.caller == client_id || self.callee.as_deref() == Some(client_id)
    }

    /// 통화 상대. 아직 수신자가 없거나 당사자가 아니면 None
    pub fn counterpart(&self, client_id: &str) -> Option<&str> {
        if self.caller == client_id {
            self.callee.as_deref()
        } else if self.callee.as_deref() == Some(client_id) {
            Some(&self.caller)
        } else {
            None
        }
    }
}

/// 중계 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// 보낸 사람을 제외한 방 전체
    Broadcast,
    /// 지정된 한 명
    To(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("a call started by {caller} is already in progress")]
    Busy { caller: String },

    #[error("{client_id} is already a party to the current call")]
    AlreadyInCall { client_id: String },

    #[error("{signal} is not valid while the call is {phase}")]
    InvalidTransition { phase: CallPhase, signal: SignalKind },

    #[error("{client_id} is not a party to the current call")]
    NotAParty { client_id: String },

    #[error("{signal} addressed to {to}, expected {expected}")]
    WrongRecipient {
        signal: SignalKind,
        to: String,
        expected: String,
    },
}

/// 당사자가 빠져나가 끝난 세션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ended {
    pub phase: CallPhase,
    pub departed: String,
    pub survivor: Option<String>,
}

#[derive(Debug, Default)]
pub struct CallMachine {
    session: Option<CallSession>,
}

impl CallMachine {
    pub fn phase(&self) -> CallPhase {
        self.session
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(CallPhase::Idle)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// 시그널을 검증하고 상태를 전이한 뒤 라우팅을 돌려준다.
    /// 에러면 상태는 바뀌지 않는다.
    pub fn apply(&mut self, from: &str, signal: &Signal, now: Instant) -> Result<Route, CallError> {
        let kind = signal.kind();
        let session = match self.session.as_mut() {
            Some(session) => session,
            None if kind == SignalKind::CallRequest => {
                self.session = Some(CallSession {
                    caller: from.to_string(),
                    callee: None,
                    phase: CallPhase::Requested,
                    created_at: now,
                });
                return Ok(Route::Broadcast);
            }
            None => {
                return Err(CallError::InvalidTransition {
                    phase: CallPhase::Idle,
                    signal: kind,
                })
            }
        };

        let invalid = CallError::InvalidTransition {
            phase: session.phase,
            signal: kind,
        };

        match (session.phase, signal) {
            (_, Signal::CallRequest) if session.involves(from) => Err(CallError::AlreadyInCall {
                client_id: from.to_string(),
            }),
            (_, Signal::CallRequest) => Err(CallError::Busy {
                caller: session.caller.clone(),
            }),

            (CallPhase::Requested, Signal::CallAccept { .. }) => {
                if from == session.caller {
                    return Err(invalid);
                }
                let caller = expect_target(signal, &session.caller)?;
                session.callee = Some(from.to_string());
                session.phase = CallPhase::Accepted;
                Ok(Route::To(caller))
            }

            (CallPhase::Requested, Signal::CallReject { .. }) => {
                if from == session.caller {
                    return Err(invalid);
                }
                let caller = expect_target(signal, &session.caller)?;
                self.session = None;
                Ok(Route::To(caller))
            }

            (CallPhase::Accepted, Signal::Offer { .. }) => {
                let callee = directed(session, from, signal, Side::Caller)?;
                session.phase = CallPhase::Negotiating;
                Ok(Route::To(callee))
            }

            (CallPhase::Negotiating, Signal::Answer { .. }) => {
                let caller = directed(session, from, signal, Side::Callee)?;
                session.phase = CallPhase::Active;
                Ok(Route::To(caller))
            }

            (CallPhase::Negotiating | CallPhase::Active, Signal::Candidate { .. }) => {
                let other = directed(session, from, signal, Side::Either)?;
                Ok(Route::To(other))
            }

            (CallPhase::Requested, Signal::CallEnd { .. }) => {
                if from != session.caller {
                    return Err(CallError::NotAParty {
                        client_id: from.to_string(),
                    });
                }
                self.session = None;
                Ok(Route::Broadcast)
            }

            (_, Signal::CallEnd { .. }) => {
                let other = directed(session, from, signal, Side::Either)?;
                self.session = None;
                Ok(Route::To(other))
            }

            _ => Err(invalid),
        }
    }

    /// 당사자 한 명이 연결을 끊었을 때. 세션은 Ended 를 거쳐 Idle 로 돌아간다.
    pub fn party_left(&mut self, client_id: &str) -> Option<Ended> {
        if !self.session.as_ref()?.involves(client_id) {
            return None;
        }
        let session = self.session.take()?;
        Some(Ended {
            phase: session.phase,
            departed: client_id.to_string(),
            survivor: session.counterpart(client_id).map(str::to_string),
        })
    }

    /// 응답 없이 오래 울린 요청을 정리한다
    pub fn expire_ringing(&mut self, now: Instant, timeout: Duration) -> Option<CallSession> {
        let session = self.session.as_ref()?;
        if session.phase != CallPhase::Requested
            || now.saturating_duration_since(session.created_at) < timeout
        {
            return None;
        }
        self.session.take()
    }
}

#[derive(Clone, Copy)]
enum Side {
    Caller,
    Callee,
    Either,
}

/// 보내는 쪽이 맞는 당사자인지 확인하고 상대방 id 를 돌려준다
fn directed(
    session: &CallSession,
    from: &str,
    signal: &Signal,
    side: Side,
) -> Result<String, CallError> {
    let allowed = match side {
        Side::Caller => session.caller == from,
        Side::Callee => session.callee.as_deref() == Some(from),
        Side::Either => session.involves(from),
    };
    if !allowed {
        return Err(CallError::NotAParty {
            client_id: from.to_string(),
        });
    }
    match session.counterpart(from) {
        Some(other) => expect_target(signal, other),
        None => Err(CallError::InvalidTransition {
            phase: session.phase,
            signal: signal.kind(),
        }),
    }
}

/// `to` 가 없으면 기대한 상대로 채운다
fn expect_target(signal: &Signal, expected: &str) -> Result<String, CallError> {
    match signal.target() {
        None => Ok(expected.to_string()),
        Some(to) if to == expected => Ok(expected.to_string()),
        Some(to) => Err(CallError::WrongRecipient {
            signal: signal.kind(),
            to: to.to_string(),
            expected: expected.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to(id: &str) -> Option<String> {
        Some(id.to_string())
    }

    fn offer(target: &str) -> Signal {
        Signal::Offer {
            to: to(target),
            offer: json!({"type": "offer", "sdp": "v=0"}),
        }
    }

    fn answer(target: &str) -> Signal {
        Signal::Answer {
            to: to(target),
            answer: json!({"type": "answer", "sdp": "v=0"}),
        }
    }

    fn candidate(target: Option<&str>) -> Signal {
        Signal::Candidate {
            to: target.map(str::to_string),
            candidate: json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
        }
    }

    /// A 가 걸고 B 가 받아 Active 까지 간 머신
    fn active_call() -> CallMachine {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        machine
            .apply("B", &Signal::CallAccept { to: to("A") }, now)
            .unwrap();
        machine.apply("A", &offer("B"), now).unwrap();
        machine.apply("B", &answer("A"), now).unwrap();
        machine
    }

    #[test]
    fn full_negotiation_reaches_active() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        assert_eq!(machine.phase(), CallPhase::Idle);

        assert_eq!(
            machine.apply("A", &Signal::CallRequest, now),
            Ok(Route::Broadcast)
        );
        assert_eq!(machine.phase(), CallPhase::Requested);

        assert_eq!(
            machine.apply("B", &Signal::CallAccept { to: to("A") }, now),
            Ok(Route::To("A".into()))
        );
        let session = machine.session().unwrap();
        assert_eq!(session.phase, CallPhase::Accepted);
        assert_eq!(session.caller, "A");
        assert_eq!(session.callee.as_deref(), Some("B"));

        assert_eq!(machine.apply("A", &offer("B"), now), Ok(Route::To("B".into())));
        assert_eq!(machine.phase(), CallPhase::Negotiating);

        assert_eq!(
            machine.apply("A", &candidate(Some("B")), now),
            Ok(Route::To("B".into()))
        );

        assert_eq!(machine.apply("B", &answer("A"), now), Ok(Route::To("A".into())));
        assert_eq!(machine.phase(), CallPhase::Active);

        assert_eq!(
            machine.apply("B", &candidate(Some("A")), now),
            Ok(Route::To("A".into()))
        );
        assert_eq!(machine.phase(), CallPhase::Active);
    }

    #[test]
    fn candidate_without_target_goes_to_counterpart() {
        let mut machine = active_call();
        assert_eq!(
            machine.apply("A", &candidate(None), Instant::now()),
            Ok(Route::To("B".into()))
        );
    }

    #[test]
    fn candidate_while_idle_is_rejected() {
        let mut machine = CallMachine::default();
        assert_eq!(
            machine.apply("A", &candidate(Some("B")), Instant::now()),
            Err(CallError::InvalidTransition {
                phase: CallPhase::Idle,
                signal: SignalKind::Candidate,
            })
        );
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn candidate_before_offer_is_rejected() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        machine
            .apply("B", &Signal::CallAccept { to: to("A") }, now)
            .unwrap();
        assert!(matches!(
            machine.apply("A", &candidate(Some("B")), now),
            Err(CallError::InvalidTransition {
                phase: CallPhase::Accepted,
                ..
            })
        ));
    }

    #[test]
    fn second_request_does_not_overwrite_active_pair() {
        let mut machine = active_call();
        assert_eq!(
            machine.apply("C", &Signal::CallRequest, Instant::now()),
            Err(CallError::Busy { caller: "A".into() })
        );
        let session = machine.session().unwrap();
        assert_eq!(session.caller, "A");
        assert_eq!(session.callee.as_deref(), Some("B"));
        assert_eq!(session.phase, CallPhase::Active);
    }

    #[test]
    fn parties_repeating_request_are_not_busy() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        assert_eq!(
            machine.apply("A", &Signal::CallRequest, now),
            Err(CallError::AlreadyInCall {
                client_id: "A".into()
            })
        );
        assert_eq!(machine.phase(), CallPhase::Requested);

        let mut machine = active_call();
        assert!(matches!(
            machine.apply("B", &Signal::CallRequest, now),
            Err(CallError::AlreadyInCall { .. })
        ));
        assert_eq!(machine.phase(), CallPhase::Active);
    }

    #[test]
    fn reject_returns_to_idle() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        assert_eq!(
            machine.apply("B", &Signal::CallReject { to: to("A") }, now),
            Ok(Route::To("A".into()))
        );
        assert_eq!(machine.phase(), CallPhase::Idle);
        assert!(machine.session().is_none());
    }

    #[test]
    fn caller_cannot_accept_own_request() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        assert!(machine
            .apply("A", &Signal::CallAccept { to: to("A") }, now)
            .is_err());
        assert_eq!(machine.phase(), CallPhase::Requested);
    }

    #[test]
    fn accept_addressed_to_someone_else_is_rejected() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        assert_eq!(
            machine.apply("B", &Signal::CallAccept { to: to("C") }, now),
            Err(CallError::WrongRecipient {
                signal: SignalKind::CallAccept,
                to: "C".into(),
                expected: "A".into(),
            })
        );
        assert_eq!(machine.phase(), CallPhase::Requested);
    }

    #[test]
    fn only_caller_may_offer() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        machine
            .apply("B", &Signal::CallAccept { to: to("A") }, now)
            .unwrap();
        assert_eq!(
            machine.apply("B", &offer("A"), now),
            Err(CallError::NotAParty {
                client_id: "B".into()
            })
        );
        assert_eq!(
            machine.apply("C", &offer("B"), now),
            Err(CallError::NotAParty {
                client_id: "C".into()
            })
        );
        assert_eq!(machine.phase(), CallPhase::Accepted);
    }

    #[test]
    fn outsider_candidate_is_not_routed() {
        let mut machine = active_call();
        assert!(matches!(
            machine.apply("C", &candidate(Some("A")), Instant::now()),
            Err(CallError::NotAParty { .. })
        ));
    }

    #[test]
    fn party_leaving_mid_negotiation_notifies_survivor() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        machine
            .apply("B", &Signal::CallAccept { to: to("A") }, now)
            .unwrap();
        machine.apply("A", &offer("B"), now).unwrap();

        assert_eq!(machine.party_left("C"), None);
        assert_eq!(
            machine.party_left("B"),
            Some(Ended {
                phase: CallPhase::Negotiating,
                departed: "B".into(),
                survivor: Some("A".into()),
            })
        );
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn caller_leaving_while_ringing_has_no_survivor() {
        let mut machine = CallMachine::default();
        machine
            .apply("A", &Signal::CallRequest, Instant::now())
            .unwrap();
        let ended = machine.party_left("A").unwrap();
        assert_eq!(ended.phase, CallPhase::Requested);
        assert_eq!(ended.survivor, None);
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn hang_up_routes_to_counterpart() {
        let mut machine = active_call();
        assert_eq!(
            machine.apply("B", &Signal::CallEnd { to: None }, Instant::now()),
            Ok(Route::To("A".into()))
        );
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn caller_may_cancel_ringing_request() {
        let now = Instant::now();
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, now).unwrap();
        assert!(machine.apply("B", &Signal::CallEnd { to: None }, now).is_err());
        assert_eq!(
            machine.apply("A", &Signal::CallEnd { to: None }, now),
            Ok(Route::Broadcast)
        );
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn ringing_request_expires_after_timeout() {
        let start = Instant::now();
        let timeout = Duration::from_secs(30);
        let mut machine = CallMachine::default();
        machine.apply("A", &Signal::CallRequest, start).unwrap();

        assert!(machine
            .expire_ringing(start + Duration::from_secs(10), timeout)
            .is_none());
        let expired = machine
            .expire_ringing(start + Duration::from_secs(31), timeout)
            .unwrap();
        assert_eq!(expired.caller, "A");
        assert_eq!(machine.phase(), CallPhase::Idle);
    }

    #[test]
    fn accepted_calls_never_expire() {
        let start = Instant::now();
        let mut machine = active_call();
        assert!(machine
            .expire_ringing(start + Duration::from_secs(3600), Duration::from_secs(1))
            .is_none());
        assert_eq!(machine.phase(), CallPhase::Active);
    }
}
