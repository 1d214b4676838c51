use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use exchanges::ListenKeyExchange;
use interface::AccountStream;

use crate::error::StreamError;
use crate::session::{SessionContext, SessionHooks};

/// listen key로 주소가 정해지는 계정 스트림 hook
///
/// 연결 전에 key가 없으면 발급받아 path로 쓰고, 연결될 때마다
/// 갱신 타이머를 새로 건다. 타이머는 세션당 항상 하나뿐이다.
pub struct KeepAliveHooks {
    api: Arc<dyn ListenKeyExchange>,
    stream: AccountStream,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveHooks {
    pub fn new(api: Arc<dyn ListenKeyExchange>, stream: AccountStream, interval: Duration) -> Self {
        Self {
            api,
            stream,
            interval,
            timer: Mutex::new(None),
        }
    }

    pub fn stream(&self) -> &AccountStream {
        &self.stream
    }

    /// 타이머가 돌고 있는지
    pub fn timer_active(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start_timer(&self, ctx: &Arc<SessionContext>) {
        let api = self.api.clone();
        let stream = self.stream.clone();
        let interval = self.interval;
        let ctx = ctx.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                keepalive_socket(api.as_ref(), &stream, &ctx).await;
            }
        });

        // 재연결 때 이전 타이머를 정리해야 중복 갱신 루프가 생기지 않는다
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn stop_timer(&self) {
        let handle = self.timer.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// key를 다시 받아서 바뀌었으면 재연결, 같으면 연장 요청
async fn keepalive_socket(api: &dyn ListenKeyExchange, stream: &AccountStream, ctx: &SessionContext) {
    match api.create_listen_key(stream).await {
        Ok(key) if key != ctx.path() => {
            info!("listen key 변경됨 ({}). 재연결합니다", stream.name());
            ctx.set_path(key);
            ctx.request_reconnect();
        }
        Ok(key) => {
            debug!("listen key 동일 ({}). keepalive 요청", stream.name());
            if let Err(e) = api.keepalive_listen_key(stream, &key).await {
                error!("keepalive 실패 ({}): {}", stream.name(), e);
            }
        }
        Err(e) => {
            error!("listen key 갱신 실패 ({}): {}", stream.name(), e);
        }
    }
}

#[async_trait]
impl SessionHooks for KeepAliveHooks {
    async fn before_connect(&self, ctx: &Arc<SessionContext>) -> Result<(), StreamError> {
        if ctx.path().is_empty() {
            let key = self.api.create_listen_key(&self.stream).await?;
            debug!("listen key 발급 ({})", self.stream.name());
            ctx.set_path(key);
        }
        Ok(())
    }

    async fn after_connect(&self, ctx: &Arc<SessionContext>) {
        self.start_timer(ctx);
    }

    async fn on_exit(&self, ctx: &Arc<SessionContext>) {
        self.stop_timer().await;

        let key = ctx.path();
        if key.is_empty() {
            return;
        }
        if let Err(e) = self.api.close_listen_key(&self.stream, &key).await {
            warn!("listen key 폐기 실패 ({}): {}", self.stream.name(), e);
        }
    }
}
