//! 테스트용 scripted connector
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::{Connection, Connector, Frame, ReadEvent};
use crate::error::StreamError;

enum Script {
    Fail,
    Socket(MockConnection),
}

/// 미리 정해 둔 순서대로 연결 성공/실패를 돌려준다.
/// 스크립트가 비면 연결은 실패한다.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_socket(&self) -> MockSocket {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.script.lock().push_back(Script::Socket(MockConnection {
            events: rx,
            sent: sent.clone(),
            closed: closed.clone(),
        }));
        MockSocket {
            events: tx,
            sent,
            closed,
        }
    }

    pub(crate) fn push_failure(&self) {
        self.script.lock().push_back(Script::Fail);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, StreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        match self.script.lock().pop_front() {
            Some(Script::Socket(conn)) => Ok(Box::new(conn)),
            Some(Script::Fail) | None => Err(StreamError::InvalidArgument(format!(
                "scripted connect failure: {}",
                url
            ))),
        }
    }
}

struct MockConnection {
    events: mpsc::UnboundedReceiver<ReadEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> ReadEvent {
        match self.events.recv().await {
            Some(event) => event,
            // 테스트 핸들이 사라지면 조용한 소켓처럼 동작
            None => std::future::pending().await,
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 테스트 쪽에서 소켓에 이벤트를 밀어 넣는 핸들
#[derive(Clone)]
pub(crate) struct MockSocket {
    events: mpsc::UnboundedSender<ReadEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub(crate) fn push_json(&self, value: Value) {
        self.push_event(ReadEvent::Frame(Frame::Text(value.to_string())));
    }

    pub(crate) fn push_event(&self, event: ReadEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
