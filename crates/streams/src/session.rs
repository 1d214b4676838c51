use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::connection::{decode_frame, Connection, Connector, ReadEvent, WsConnector};
use crate::error::{FailureKind, StreamError, StreamFailure};
use crate::message::WsMessage;
use crate::queue::InboundQueue;

/// 세션 상태. `Exiting`에 들어가면 다시 나오지 않는다
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialising,
    Streaming,
    Reconnecting,
    Exiting,
}

pub type ExitCallback = Box<dyn FnOnce() + Send>;

/// hook과 read loop가 함께 보는 세션 상태
pub struct SessionContext {
    path: RwLock<String>,
    reconnect: Notify,
    cancel: CancellationToken,
}

impl SessionContext {
    fn new(path: String) -> Self {
        Self {
            path: RwLock::new(path),
            reconnect: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    /// 다음 연결부터 적용된다
    pub fn set_path(&self, path: impl Into<String>) {
        *self.path.write() = path.into();
    }

    /// 현재 연결을 끊고 재연결하도록 read loop에 알린다
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// 연결 수명 주기 hook. keep-alive 세션이 listen key 관리에 사용한다
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// 매 연결 시도 직전. 실패하면 그 시도는 연결 실패로 센다
    async fn before_connect(&self, _ctx: &Arc<SessionContext>) -> Result<(), StreamError> {
        Ok(())
    }

    /// 매 연결 성공 직후
    async fn after_connect(&self, _ctx: &Arc<SessionContext>) {}

    /// 세션 종료 시 한 번
    async fn on_exit(&self, _ctx: &Arc<SessionContext>) {}
}

/// hook 없는 일반 스트림
#[derive(Debug, Default)]
pub struct PlainHooks;

impl SessionHooks for PlainHooks {}

struct Shared {
    url: String,
    config: SessionConfig,
    ctx: Arc<SessionContext>,
    hooks: Arc<dyn SessionHooks>,
    connector: Arc<dyn Connector>,
    queue: InboundQueue,
    state: watch::Sender<ConnectionState>,
    exit_callback: Mutex<Option<ExitCallback>>,
    released: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Exiting || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    fn stream_url(&self) -> String {
        format!("{}{}", self.url, self.ctx.path())
    }

    async fn open(&self) -> Result<Box<dyn Connection>, StreamError> {
        self.hooks.before_connect(&self.ctx).await?;

        let url = self.stream_url();
        debug!("Establishing new WebSocket connection: {}", url);

        let result = tokio::select! {
            _ = self.ctx.cancelled() => Err(StreamError::Closed),
            result = self.connector.connect(&url) => result,
        };
        let conn = result?;

        // 연결 전에 들어온 재연결 요청은 이번 연결로 이미 반영됐다
        let _ = self.ctx.reconnect.notified().now_or_never();
        if self.stream_url() != url {
            // 연결 중에 path가 바뀌었으면 한 번 더 붙는다
            self.ctx.request_reconnect();
        }
        Ok(conn)
    }

    async fn on_connected(&self) {
        self.set_state(ConnectionState::Streaming);
        self.hooks.after_connect(&self.ctx).await;
        info!("WebSocket 스트림 연결: {}", self.stream_url());
    }

    fn fail(&self, failure: StreamFailure) {
        error!("WebSocket 세션 실패 ({}): {}", self.stream_url(), failure);
        self.queue.push_terminal(WsMessage::Error(failure));
    }

    /// 종료 처리. 여러 경로에서 불려도 한 번만 실행된다
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Exiting);

        let callback = self.exit_callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        self.hooks.on_exit(&self.ctx).await;
    }
}

/// 재연결 대기 시간: `random * min(max_seconds, 2^attempts - 1) + 1` 초
pub(crate) fn reconnect_delay(attempts: u32, max_seconds: u64) -> Duration {
    let expo = 2u64.saturating_pow(attempts).saturating_sub(1);
    let capped = expo.min(max_seconds) as f64;
    Duration::from_secs_f64(rand::random::<f64>() * capped + 1.0)
}

/// 끊기면 스스로 다시 붙는 WebSocket 세션
///
/// 수신 메시지는 제한된 큐에 쌓이고 `recv()`로 꺼낸다.
/// 연속 연결 실패가 `max_reconnects`에 닿거나 큐가 넘치면
/// `WsMessage::Error`를 마지막으로 넣고 세션은 끝난다.
pub struct ReconnectingWebsocket {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectingWebsocket {
    pub fn new(base_url: &str, prefix: &str, path: &str, config: SessionConfig) -> Self {
        Self::with_parts(
            base_url,
            prefix,
            path,
            config,
            Arc::new(PlainHooks),
            Arc::new(WsConnector),
        )
    }

    pub fn with_parts(
        base_url: &str,
        prefix: &str,
        path: &str,
        config: SessionConfig,
        hooks: Arc<dyn SessionHooks>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Initialising);
        let queue = InboundQueue::new(config.max_queue_size);

        Self {
            shared: Arc::new(Shared {
                url: format!("{}{}", base_url, prefix),
                config,
                ctx: Arc::new(SessionContext::new(path.to_string())),
                hooks,
                connector,
                queue,
                state,
                exit_callback: Mutex::new(None),
                released: AtomicBool::new(false),
            }),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            read_loop: Mutex::new(None),
        }
    }

    /// 연결을 열고 read loop를 띄운다. 두 번째 호출부터는 아무것도 하지 않는다
    ///
    /// 첫 연결이 실패해도 세션은 재연결 상태로 계속 시도한다.
    pub async fn connect(&self) {
        let Some(outbound) = self.outbound_rx.lock().take() else {
            debug!("이미 시작된 세션: {}", self.stream_url());
            return;
        };
        if self.state() == ConnectionState::Exiting {
            return;
        }

        let conn = match self.shared.open().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!("WebSocket 연결 실패 ({}): {}", self.stream_url(), e);
                self.shared.set_state(ConnectionState::Reconnecting);
                None
            }
        };

        if self.shared.ctx.is_cancelled() {
            if let Some(mut conn) = conn {
                conn.close().await;
            }
            return;
        }
        if conn.is_some() {
            self.shared.on_connected().await;
        }

        let handle = tokio::spawn(read_loop(self.shared.clone(), conn, outbound));
        *self.read_loop.lock() = Some(handle);
    }

    /// 다음 메시지. 세션이 끝나고 큐가 비면 `None`
    pub async fn recv(&self) -> Option<WsMessage> {
        let mut state_rx = self.shared.state.subscribe();
        loop {
            if let Some(msg) = self.shared.queue.try_pop() {
                return Some(msg);
            }
            if *state_rx.borrow_and_update() == ConnectionState::Exiting {
                return None;
            }

            tokio::select! {
                biased;
                msg = self.shared.queue.pop() => return Some(msg),
                _ = state_rx.changed() => {}
                _ = tokio::time::sleep(self.shared.config.read_timeout) => {
                    debug!(
                        "no message in {} seconds: {}",
                        self.shared.config.read_timeout.as_secs(),
                        self.stream_url()
                    );
                }
            }
        }
    }

    /// 세션 종료. 여러 번 불러도 안전하다
    pub async fn close(&self) {
        if self.shared.set_state(ConnectionState::Exiting) {
            info!("WebSocket 세션 종료: {}", self.stream_url());
        }
        self.shared.ctx.cancel.cancel();

        let handle = self.read_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("read loop panic ({}): {}", self.stream_url(), e);
                }
            }
        }
        self.shared.release().await;
    }

    /// 텍스트 프레임 전송. 연결 전이면 연결된 뒤에 보낸다
    pub fn send(&self, text: impl Into<String>) -> Result<(), StreamError> {
        if self.state() == ConnectionState::Exiting {
            return Err(StreamError::Closed);
        }
        self.outbound
            .send(text.into())
            .map_err(|_| StreamError::Closed)
    }

    pub fn send_json(&self, value: &Value) -> Result<(), StreamError> {
        self.send(value.to_string())
    }

    /// 종료 시 한 번 불릴 콜백. 이미 끝난 세션이면 바로 부른다
    pub fn set_exit_callback(&self, callback: ExitCallback) {
        if self.shared.released.load(Ordering::SeqCst) {
            callback();
            return;
        }
        *self.shared.exit_callback.lock() = Some(callback);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_exiting(&self) -> bool {
        self.state() == ConnectionState::Exiting
    }

    /// base URL + prefix
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn path(&self) -> String {
        self.shared.ctx.path()
    }

    pub fn stream_url(&self) -> String {
        self.shared.stream_url()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.shared.ctx
    }
}

impl Drop for ReconnectingWebsocket {
    fn drop(&mut self) {
        self.shared.ctx.cancel.cancel();
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut conn: Option<Box<dyn Connection>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let config = shared.config.clone();
    // 연속 연결 실패 횟수 (최초 시도 포함)
    let mut failures: u32 = if conn.is_some() { 0 } else { 1 };

    loop {
        if shared.ctx.is_cancelled() {
            break;
        }

        if conn.is_none() {
            if failures >= config.max_reconnects {
                error!("Max reconnections {} reached", config.max_reconnects);
                shared.fail(StreamFailure::new(
                    FailureKind::MaxReconnects,
                    "Max reconnect retries reached",
                ));
                break;
            }

            shared.set_state(ConnectionState::Reconnecting);
            let delay = reconnect_delay(failures, config.max_reconnect_seconds);
            debug!(
                "websocket reconnecting. {} reconnects left - waiting {:.1}s",
                config.max_reconnects - failures,
                delay.as_secs_f64()
            );

            tokio::select! {
                _ = shared.ctx.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match shared.open().await {
                Ok(new_conn) => {
                    failures = 0;
                    conn = Some(new_conn);
                    shared.on_connected().await;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "재연결 실패 {}/{} ({}): {}",
                        failures,
                        config.max_reconnects,
                        shared.stream_url(),
                        e
                    );
                }
            }
            continue;
        }
        let Some(active) = conn.as_mut() else {
            continue;
        };

        tokio::select! {
            _ = shared.ctx.cancelled() => break,
            _ = shared.ctx.reconnect.notified() => {
                info!("재연결 요청: {}", shared.stream_url());
                active.close().await;
                conn = None;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = active.send_text(text).await {
                    warn!("WebSocket 전송 실패: {}. 재연결 시도...", e);
                    conn = None;
                }
            }
            read = tokio::time::timeout(config.read_timeout, active.recv()) => match read {
                Err(_) => {
                    debug!("no message in {} seconds", config.read_timeout.as_secs());
                }
                Ok(ReadEvent::Frame(frame)) => {
                    if let Some(value) = decode_frame(frame, config.compressed) {
                        if shared.queue.push(WsMessage::Event(value)).is_err() {
                            debug!("Queue overflow {}. Message not filled", config.max_queue_size);
                            shared.fail(StreamFailure::new(
                                FailureKind::QueueOverflow,
                                "Queue overflow. Message not filled",
                            ));
                            break;
                        }
                    }
                }
                Ok(ReadEvent::Closed(code)) => {
                    warn!("WebSocket 연결이 닫혔습니다 (code {:?}). 재연결 시도...", code);
                    conn = None;
                }
                Ok(ReadEvent::Error(e)) => {
                    warn!("WebSocket 메시지 수신 오류: {}. 재연결 시도...", e);
                    conn = None;
                }
            }
        }
    }

    if let Some(mut conn) = conn.take() {
        conn.close().await;
    }
    shared.release().await;
}
