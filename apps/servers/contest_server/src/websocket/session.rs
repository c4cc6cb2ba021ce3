use super::rooms::{OutboundFrame, Session};
use super::{join, submit};
use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use contest_core::AuthClaims;
use contest_events::{ClientEvent, Envelope, ErrorCode, ErrorPayload, ServerEvent};
use futures::stream::{SplitSink, SplitStream, StreamExt};
use futures::SinkExt;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Authenticated upgrade: the bearer token rides a query parameter and is
/// validated before the protocol switch. Bad tokens never upgrade.
pub async fn contest_ws_handler(ws: WebSocketUpgrade, Query(params): Query<HashMap<String, String>>, State(state): State<AppState>) -> impl IntoResponse {
	let Some(token) = params.get("token") else {
		return (StatusCode::UNAUTHORIZED, "missing token").into_response();
	};

	match state.verifier.verify(token) {
		Ok(claims) => {
			info!(user = %claims.user_id, role = ?claims.role, "websocket upgrade accepted");
			ws.on_upgrade(move |socket| handle_contest_socket(socket, state, claims))
		}
		Err(err) => {
			warn!(error = %err, "websocket upgrade rejected");
			(StatusCode::UNAUTHORIZED, "invalid token").into_response()
		}
	}
}

async fn handle_contest_socket(socket: WebSocket, state: AppState, claims: AuthClaims) {
	let (sender, receiver) = socket.split();
	let (tx, rx) = mpsc::unbounded_channel();
	let cancel = state.cancel.child_token();

	let session = Session::new(claims.user_id, claims.role, tx, cancel.clone());
	state.rooms.register(session.clone());

	let writer = tokio::spawn(write_outbound(sender, rx, cancel.clone()));

	read_inbound(receiver, &state, &session).await;

	// Reader gone: release room membership and cut pending sends loose.
	state.rooms.remove(session.id);
	cancel.cancel();
	let _ = writer.await;
	debug!(session = %session.id, "contest session closed");
}

/// Single writer per session; the queue preserves enqueue order.
async fn write_outbound(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<OutboundFrame>, cancel: CancellationToken) {
	loop {
		tokio::select! {
			frame = rx.recv() => {
				let Some(frame) = frame else { break };
				match frame {
					OutboundFrame::Event(event) => {
						let json = match event.to_json() {
							Ok(json) => json,
							Err(err) => {
								warn!(error = %err, "failed to serialize outbound event");
								continue;
							}
						};
						if sender.send(Message::Text(json)).await.is_err() {
							break;
						}
					}
					OutboundFrame::Ping => {
						if sender.send(Message::Ping(Vec::new())).await.is_err() {
							break;
						}
					}
					OutboundFrame::Close { code, reason } => {
						let _ = sender
							.send(Message::Close(Some(CloseFrame {
								code,
								reason: Cow::Owned(reason),
							})))
							.await;
						break;
					}
				}
			}
			() = cancel.cancelled() => {
				let _ = sender.send(Message::Close(None)).await;
				break;
			}
		}
	}
}

async fn read_inbound(mut receiver: SplitStream<WebSocket>, state: &AppState, session: &Arc<Session>) {
	loop {
		let message = tokio::select! {
			message = receiver.next() => message,
			() = session.cancel.cancelled() => break,
		};

		match message {
			Some(Ok(Message::Text(text))) => handle_text(state, session, &text).await,
			Some(Ok(Message::Pong(_) | Message::Ping(_))) => session.record_pong(),
			Some(Ok(Message::Close(reason))) => {
				debug!(session = %session.id, ?reason, "client closed connection");
				break;
			}
			Some(Ok(_)) => {}
			Some(Err(err)) => {
				debug!(session = %session.id, error = %err, "websocket read error");
				break;
			}
			None => break,
		}
	}
}

async fn handle_text(state: &AppState, session: &Arc<Session>, text: &str) {
	let envelope = match Envelope::from_json(text) {
		Ok(envelope) => envelope,
		Err(err) => {
			session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::InvalidEvent, format!("malformed envelope: {err}"))));
			return;
		}
	};

	let event = match ClientEvent::from_envelope(envelope) {
		Ok(event) => event,
		Err(err) => {
			session.send(ServerEvent::Error(ErrorPayload::new(err.code(), err.to_string())));
			return;
		}
	};

	match event {
		ClientEvent::JoinContest(payload) => join::handle_join(state, session, &payload.contest_id, false).await,
		ClientEvent::Resync(payload) => join::handle_join(state, session, &payload.contest_id, true).await,
		ClientEvent::SubmitAnswer(payload) => submit::handle_submit(state, session, payload).await,
		ClientEvent::Ping => {
			session.send(ServerEvent::Pong);
		}
	}
}
