use std::fmt;

use thiserror::Error;

use interface::ExchangeError;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid config {key}: {msg}")]
    Config { key: String, msg: String },
    #[error("session closed")]
    Closed,
}

/// 세션/매니저를 더 이상 쓸 수 없게 만든 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 연속 재연결 실패가 한도에 도달
    MaxReconnects,
    /// 소비자가 큐를 비우지 못해 수신 큐가 가득 참
    QueueOverflow,
    /// REST 스냅샷을 재시도 한도 안에 받지 못함
    SnapshotUnavailable,
    /// 세션이 이미 종료됨
    SessionClosed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::MaxReconnects => "max_reconnects",
            FailureKind::QueueOverflow => "queue_overflow",
            FailureKind::SnapshotUnavailable => "snapshot_unavailable",
            FailureKind::SessionClosed => "session_closed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 원래 스트림의 에러 레코드 형식 `{"e": "error", "m": ...}`
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({ "e": "error", "m": self.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_and_record() {
        let failure = StreamFailure::new(FailureKind::MaxReconnects, "Max reconnect retries reached");
        assert_eq!(
            failure.to_string(),
            "max_reconnects: Max reconnect retries reached"
        );
        assert_eq!(failure.to_record()["e"], "error");
        assert_eq!(failure.to_record()["m"], "Max reconnect retries reached");
    }
}
