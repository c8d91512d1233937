use std::sync::Mutex;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::dispatch::dispatch;
use crate::protocol::{Frame, FrameKind};

pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// One WS connection (§6.1): bridges client `req` frames to [`dispatch`] and
/// forwards bus events, scoped to whichever session this connection has
/// attached to via `open_session`. Events with no `session_id` are global
/// broadcasts and go to every connection regardless of attachment.
pub async fn handle_socket(mut socket: WebSocket, app: AppState) {
    let (_sub_id, mut events) = app.bus.subscribe(None);
    let attached_session: Mutex<Option<String>> = Mutex::new(None);

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_request(&mut socket, &app, &attached_session, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let belongs_to_this_connection = match &event.session_id {
                            None => true,
                            Some(id) => attached_session.lock().unwrap().as_deref() == Some(id.as_str()),
                        };
                        if belongs_to_this_connection {
                            send_frame(&mut socket, &Frame::from_event(&event)).await;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    debug!("WebSocket connection closed");
}

async fn handle_request(socket: &mut WebSocket, app: &AppState, attached_session: &Mutex<Option<String>>, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            send_frame(socket, &Frame::err_response(None, format!("invalid frame: {e}"))).await;
            return;
        }
    };

    if frame.kind != FrameKind::Req {
        send_frame(socket, &Frame::err_response(frame.id, "only \"req\" frames are accepted from clients")).await;
        return;
    }

    let Some(method) = frame.method.clone() else {
        send_frame(socket, &Frame::err_response(frame.id, "missing \"method\"")).await;
        return;
    };

    let params = frame.params.clone().unwrap_or(serde_json::Value::Null);
    let response = match dispatch(app, attached_session, &method, params).await {
        Ok(payload) => Frame::ok_response(frame.id, payload),
        Err(e) => {
            warn!(method = %method, error = %e, "request failed");
            Frame::err_response(frame.id, e)
        }
    };
    send_frame(socket, &response).await;
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
