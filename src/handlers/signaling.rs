//! 통화 시그널링 핸들러
//!
//! 상태 머신이 허락한 시그널만 중계한다. offer/answer/candidate 페이로드는 손대지 않는다.

use super::connection::verify_sender;
use super::room::reap;
use crate::call::{CallError, CallPhase, Route};
use crate::config::BusyPolicy;
use crate::error::RelayError;
use crate::protocol::{EndReason, ServerMessage, Signal, SignalKind};
use crate::state::{AppState, PeerSession};
use std::time::Instant;

/// 시그널 처리
pub async fn handle_signal(
    state: &AppState,
    session: &mut PeerSession,
    declared_from: Option<&str>,
    signal: Signal,
) -> Result<(), RelayError> {
    let room = session.room.clone();
    let room_id = room.id.as_str();
    let mut inner = room.inner.lock().await;
    verify_sender(session, &mut inner, declared_from)?;

    let from = session.client_id.as_str();
    let kind = signal.kind();
    let before = inner.call.phase();

    let result = match inner.call.apply(from, &signal, Instant::now()) {
        Ok(Route::Broadcast) => {
            let message = signal.into_relay(from.to_string(), None);
            inner.broadcast(room_id, Some(from), &message, false);
            Ok(())
        }
        Ok(Route::To(target)) => {
            let message = signal.into_relay(from.to_string(), Some(target.clone()));
            let routed = match inner.route_to(room_id, &target, message) {
                // 상대가 방금 끊긴 경우. 정상적인 경합이다.
                Err(err @ (RelayError::NoSuchRecipient { .. } | RelayError::ConnectionLost(_))) => {
                    tracing::debug!(
                        from = %from,
                        room_id = %room_id,
                        signal = %kind,
                        error = %err,
                        "Dropped signal for departed recipient"
                    );
                    Ok(())
                }
                other => other,
            };

            // 응답이 나왔으니 같이 울리던 나머지 멤버의 수신 알림을 닫는다
            let reason = match kind {
                SignalKind::CallAccept => Some(EndReason::Answered),
                SignalKind::CallReject => Some(EndReason::Declined),
                _ => None,
            };
            if let (CallPhase::Requested, Some(reason)) = (before, reason) {
                let notice = ServerMessage::CallEnd {
                    from: target.clone(),
                    to: None,
                    reason: Some(reason),
                };
                inner.broadcast_except(room_id, &[from, target.as_str()], &notice);
            }
            routed
        }
        Err(CallError::AlreadyInCall { .. }) => {
            tracing::debug!(
                from = %from,
                room_id = %room_id,
                phase = %before,
                "Ignored repeated call request"
            );
            Ok(())
        }
        Err(CallError::Busy { caller }) => {
            match state.config.call.busy_policy {
                BusyPolicy::AutoReject => {
                    let notice = ServerMessage::CallReject {
                        from: caller.clone(),
                        to: from.to_string(),
                        reason: Some(EndReason::Busy),
                    };
                    if let Err(err) = inner.route_to(room_id, from, notice) {
                        tracing::debug!(
                            from = %from,
                            room_id = %room_id,
                            error = %err,
                            "Busy notice not delivered"
                        );
                    }
                }
                BusyPolicy::Drop => {}
            }
            tracing::info!(
                from = %from,
                room_id = %room_id,
                active_caller = %caller,
                policy = ?state.config.call.busy_policy,
                "Call request refused, room busy"
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    };

    let after = inner.call.phase();
    if before != after {
        let session_pair = inner
            .call
            .session()
            .map(|s| (s.caller.clone(), s.callee.clone()));
        tracing::info!(
            room_id = %room_id,
            from = %from,
            signal = %kind,
            from_phase = %before,
            to_phase = %after,
            session = ?session_pair,
            "Call state changed"
        );
    } else {
        tracing::debug!(
            room_id = %room_id,
            from = %from,
            signal = %kind,
            phase = %after,
            "Relayed signal"
        );
    }

    reap(&mut inner, room_id);
    result
}
