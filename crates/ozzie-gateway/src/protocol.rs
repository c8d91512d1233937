use serde::{Deserialize, Serialize};
use serde_json::Value;

use ozzie_bus::Event;

/// The WS wire envelope (§6.1): one JSON text frame per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Req,
    Res,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Frame {
    pub fn ok_response(id: Option<String>, payload: Value) -> Self {
        Self { kind: FrameKind::Res, id, method: None, params: None, ok: Some(true), payload: Some(payload), error: None, event: None, session_id: None }
    }

    pub fn err_response(id: Option<String>, error: impl Into<String>) -> Self {
        Self { kind: FrameKind::Res, id, method: None, params: None, ok: Some(false), payload: None, error: Some(error.into()), event: None, session_id: None }
    }

    pub fn from_event(event: &Event) -> Self {
        Self {
            kind: FrameKind::Event,
            id: None,
            method: None,
            params: None,
            ok: None,
            payload: Some(event.payload.clone()),
            error: None,
            event: Some(event.event_type.as_str().to_string()),
            session_id: event.session_id.clone(),
        }
    }
}
