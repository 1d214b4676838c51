use serde_json::Value;

use crate::error::StreamFailure;

/// 세션이 소비자에게 전달하는 단위
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// 디코딩된 JSON 이벤트
    Event(Value),
    /// 세션 종료를 알리는 마지막 레코드
    Error(StreamFailure),
}

impl WsMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, WsMessage::Error(_))
    }

    pub fn as_event(&self) -> Option<&Value> {
        match self {
            WsMessage::Event(value) => Some(value),
            WsMessage::Error(_) => None,
        }
    }

    pub fn into_event(self) -> Option<Value> {
        match self {
            WsMessage::Event(value) => Some(value),
            WsMessage::Error(_) => None,
        }
    }

    /// 이벤트 타입 (`e` 필드)
    pub fn event_type(&self) -> Option<&str> {
        match self {
            WsMessage::Event(value) => payload(value).get("e").and_then(Value::as_str),
            WsMessage::Error(_) => Some("error"),
        }
    }
}

/// combined stream(`{"stream": ..., "data": ...}`)이면 `data`를 꺼낸다
pub fn unwrap_combined(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn payload(value: &Value) -> &Value {
    match value.get("stream").and(value.get("data")) {
        Some(data) => data,
        None => value,
    }
}
