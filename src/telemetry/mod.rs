use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::model::Frame;
use crate::state::AppState;

/// Bound on how long an outbound frame send may take before the session is
/// terminated as `ObserverWriteStalled` rather than buffering indefinitely.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// `GET /ws/stats` — upgrades to a WebSocket and hands the connection to a
/// per-session broadcaster task. One session per connection; no shared fan-out
/// registry, since each session independently ticks its own stats timer and
/// subscribes its own copy of the persistence event stream.
pub async fn stats_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Drives one observer connection: a stats tick on `broadcast_interval` and a
/// forwarded `PersistenceEvent` from the buffer's pub/sub channel, both
/// multiplexed into the outgoing WebSocket sink. Ends on send failure, socket
/// close, or a subscribe/tick error that leaves nothing left to report.
async fn run_session(socket: WebSocket, state: AppState) {
	let (mut sink, mut stream) = socket.split();

	let mut events = match state.buffer.subscribe().await {
		Ok(s) => s,
		Err(e) => {
			tracing::warn!(error = %e, "telemetry session could not subscribe to buffer notifications");
			let _ = sink.close().await;
			return;
		}
	};

	let mut ticker = tokio::time::interval(state.settings.broadcast_interval());
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				let snapshot = match state.buffer.read_counters().await {
					Ok(s) => s,
					Err(e) => {
						tracing::warn!(error = %e, "failed to read counters for stats tick");
						continue;
					}
				};
				let buffer_length = state.buffer.buffer_len().await.unwrap_or(0);
				let frame = Frame::stats_update(&snapshot, state.settings.batch_size as i64, buffer_length);
				if send_frame(&mut sink, &frame).await.is_err() {
					break;
				}
			}
			event = events.next() => {
				match event {
					Some(event) => {
						let frame = Frame::from_event(event);
						if send_frame(&mut sink, &frame).await.is_err() {
							break;
						}
					}
					None => break,
				}
			}
			incoming = stream.next() => {
				match incoming {
					Some(Ok(WsMessage::Close(_))) | None => break,
					Some(Ok(_)) => {
						// Observers don't send anything meaningful; ignore pings,
						// text, and binary frames alike.
					}
					Some(Err(e)) => {
						tracing::warn!(error = %e, "telemetry socket read error");
						break;
					}
				}
			}
		}
	}
}

/// Sends one frame, bounded by `WRITE_DEADLINE`. A slow or wedged client is
/// disconnected rather than allowed to back-pressure the session
/// indefinitely (`ObserverWriteStalled`, spec.md §4.4/§7) — the observer is
/// expected to reconnect and reconcile via `Retrieve-recent`.
async fn send_frame(
	sink: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
	frame: &Frame,
) -> Result<(), crate::errors::ApiError> {
	let payload = serde_json::to_string(frame).expect("Frame serialization is infallible");
	match tokio::time::timeout(WRITE_DEADLINE, sink.send(WsMessage::Text(Utf8Bytes::from(payload)))).await {
		Ok(Ok(())) => Ok(()),
		Ok(Err(e)) => {
			tracing::warn!(error = %e, "telemetry socket write error");
			Err(crate::errors::ApiError::ObserverWriteStalled)
		}
		Err(_) => {
			tracing::warn!("telemetry socket write exceeded deadline; terminating session");
			Err(crate::errors::ApiError::ObserverWriteStalled)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::CounterSnapshot;

	#[test]
	fn stats_frame_serializes_with_tag() {
		let snapshot = CounterSnapshot {
			total_messages: 10,
			total_batches: 1,
			current_rps: 1.0,
			worker_buffer_size: 2,
			batch_start_time: None,
		};
		let frame = Frame::stats_update(&snapshot, 50, 3);
		let json = serde_json::to_string(&frame).unwrap();
		assert!(json.contains("\"type\":\"stats_update\""));
	}
}
