use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use exchanges::DepthSnapshotExchange;
use interface::{DepthSnapshot, ExchangeError, FuturesType, MarketKind};

use super::cache::DepthCache;
use super::events::{DepthDiff, PartialDepth};
use crate::error::{FailureKind, StreamError, StreamFailure};
use crate::message::{unwrap_combined, WsMessage};
use crate::session::ReconnectingWebsocket;
use crate::socket_manager::BinanceSocketManager;

pub const DEFAULT_LIMIT: u32 = 500;
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_DEPTH: u32 = 10;
pub const MAX_SNAPSHOT_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct DepthCacheOptions {
    /// REST 스냅샷 깊이
    pub limit: u32,
    /// 주기적 전체 재동기화. `None`이면 하지 않는다
    pub refresh_interval: Option<Duration>,
    /// spot diff 스트림 주기 (0 또는 100ms)
    pub ws_interval: Option<u32>,
    /// 선물/options partial book 깊이
    pub depth: u32,
    /// 연속 스냅샷 실패 허용 횟수
    pub max_snapshot_retries: u32,
}

impl Default for DepthCacheOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            refresh_interval: Some(DEFAULT_REFRESH),
            ws_interval: None,
            depth: DEFAULT_DEPTH,
            max_snapshot_retries: MAX_SNAPSHOT_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AwaitingSnapshot,
    /// 스냅샷을 기다리며 diff를 쌓는 중
    Buffering,
    Synchronized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOutcome {
    Stale,
    Gap,
    Applied,
}

/// 마지막 반영 update id와 스냅샷 대기 중 버퍼
#[derive(Debug, Default)]
struct UpdateWindow {
    last_update_id: Option<u64>,
    /// 스냅샷 직후 첫 diff는 경계에 걸쳐 있어도 된다
    awaiting_first: bool,
    buffer: VecDeque<DepthDiff>,
}

impl UpdateWindow {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn set_baseline(&mut self, last_update_id: u64) {
        self.last_update_id = Some(last_update_id);
        self.awaiting_first = true;
    }

    /// 버퍼 재생과 실시간 diff가 같은 규칙을 쓴다
    ///
    /// - `u <= last`: 이미 반영된 구간
    /// - 첫 diff: `U <= last + 1 <= u`
    /// - 이후: `U == last + 1`
    fn check(&self, diff: &DepthDiff) -> DiffOutcome {
        let Some(last) = self.last_update_id else {
            return DiffOutcome::Gap;
        };
        if diff.final_update_id <= last {
            return DiffOutcome::Stale;
        }
        let next = last + 1;
        let contiguous = if self.awaiting_first {
            diff.first_update_id <= next
        } else {
            diff.first_update_id == next
        };
        if contiguous {
            DiffOutcome::Applied
        } else {
            DiffOutcome::Gap
        }
    }

    fn mark_applied(&mut self, final_update_id: u64) {
        self.last_update_id = Some(final_update_id);
        self.awaiting_first = false;
    }
}

enum BookMode {
    /// REST 스냅샷 + diff 스트림 (spot)
    Diff {
        snapshots: Arc<dyn DepthSnapshotExchange>,
        market: MarketKind,
    },
    /// partial book 메시지로 통째 교체 (선물, options)
    Partial,
}

enum Step {
    Snapshot(Result<DepthSnapshot, ExchangeError>),
    Message(Option<WsMessage>),
    Refresh,
}

/// 심볼 하나의 호가창을 스트림과 맞춰 유지한다
///
/// `recv()`는 호가창이 바뀔 때마다 최신 상태를 돌려준다. 세션의 종료
/// 레코드나 스냅샷 실패는 `Err`로 그대로 올라오고, 그 뒤로는 계속 같은
/// `Err`를 돌려준다.
pub struct DepthCacheManager {
    symbol: String,
    mode: BookMode,
    session: Arc<ReconnectingWebsocket>,
    options: DepthCacheOptions,
    cache: DepthCache,
    window: UpdateWindow,
    state: SyncState,
    snapshot_task: Option<JoinHandle<Result<DepthSnapshot, ExchangeError>>>,
    snapshot_failures: u32,
    refresh_at: Option<Instant>,
    failure: Option<StreamFailure>,
    started: bool,
}

impl DepthCacheManager {
    /// spot: diff 스트림 + REST 스냅샷
    pub fn new(
        sockets: &BinanceSocketManager,
        snapshots: Arc<dyn DepthSnapshotExchange>,
        symbol: &str,
        options: DepthCacheOptions,
    ) -> Result<Self, StreamError> {
        // 큐를 혼자 소비하므로 레지스트리의 공유 세션을 쓰지 않는다
        let target = sockets.depth_target(symbol, None, options.ws_interval)?;
        let session = sockets.dedicated_socket(&target);
        let mode = BookMode::Diff {
            snapshots,
            market: MarketKind::Spot,
        };
        Ok(Self::with_session(session, symbol, mode, options))
    }

    /// 선물 partial book
    pub fn futures(
        sockets: &BinanceSocketManager,
        symbol: &str,
        futures_type: FuturesType,
        options: DepthCacheOptions,
    ) -> Self {
        let target = sockets.futures_depth_target(symbol, options.depth, futures_type);
        let session = sockets.dedicated_socket(&target);
        Self::with_session(session, symbol, BookMode::Partial, options)
    }

    /// options partial book
    pub fn options(sockets: &BinanceSocketManager, symbol: &str, options: DepthCacheOptions) -> Self {
        let session = sockets.dedicated_socket(&sockets.options_depth_target(symbol, options.depth));
        Self::with_session(session, symbol, BookMode::Partial, options)
    }

    fn with_session(
        session: Arc<ReconnectingWebsocket>,
        symbol: &str,
        mode: BookMode,
        options: DepthCacheOptions,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            mode,
            session,
            options,
            cache: DepthCache::new(symbol),
            window: UpdateWindow::default(),
            state: SyncState::AwaitingSnapshot,
            snapshot_task: None,
            snapshot_failures: 0,
            refresh_at: None,
            failure: None,
            started: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.window.last_update_id
    }

    pub fn get_depth_cache(&self) -> &DepthCache {
        &self.cache
    }

    pub fn session(&self) -> &Arc<ReconnectingWebsocket> {
        &self.session
    }

    /// 호가창이 바뀔 때까지 기다렸다가 최신 호가창을 돌려준다
    pub async fn recv(&mut self) -> Result<&DepthCache, StreamFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if !self.started {
            self.start().await;
        }

        loop {
            if self.state == SyncState::AwaitingSnapshot {
                self.request_snapshot();
            }

            let step = {
                let snapshot_task = &mut self.snapshot_task;
                let session = &self.session;
                let refresh_at = self.refresh_at;

                tokio::select! {
                    result = async move {
                        match snapshot_task.as_mut() {
                            Some(task) => task.await,
                            None => std::future::pending().await,
                        }
                    } => Step::Snapshot(result.unwrap_or_else(|e| {
                        Err(ExchangeError::Other(format!("snapshot task failed: {}", e)))
                    })),
                    msg = session.recv() => Step::Message(msg),
                    _ = async move {
                        match refresh_at {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending().await,
                        }
                    } => Step::Refresh,
                }
            };

            match step {
                Step::Snapshot(result) => {
                    self.snapshot_task = None;
                    match result {
                        Ok(snapshot) => {
                            self.snapshot_failures = 0;
                            if self.apply_snapshot(snapshot) {
                                return Ok(&self.cache);
                            }
                        }
                        Err(e) => {
                            self.snapshot_failures += 1;
                            warn!(
                                "호가 스냅샷 조회 실패 {}/{} ({}): {}",
                                self.snapshot_failures, self.options.max_snapshot_retries, self.symbol, e
                            );
                            if self.snapshot_failures >= self.options.max_snapshot_retries {
                                let failure = StreamFailure::new(
                                    FailureKind::SnapshotUnavailable,
                                    format!("depth snapshot unavailable for {}: {}", self.symbol, e),
                                );
                                return Err(self.fail(failure).await);
                            }
                            self.state = SyncState::AwaitingSnapshot;
                        }
                    }
                }
                Step::Message(Some(WsMessage::Event(value))) => {
                    if self.process_event(value) {
                        return Ok(&self.cache);
                    }
                }
                Step::Message(Some(WsMessage::Error(failure))) => {
                    return Err(self.fail(failure).await);
                }
                Step::Message(None) => {
                    let failure = StreamFailure::new(
                        FailureKind::SessionClosed,
                        format!("depth stream closed for {}", self.symbol),
                    );
                    return Err(self.fail(failure).await);
                }
                Step::Refresh => {
                    info!("호가창 주기적 재동기화: {}", self.symbol);
                    self.resync();
                }
            }
        }
    }

    /// 여러 번 불러도 안전하다
    pub async fn close(&mut self) {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
        self.refresh_at = None;
        if self.failure.is_none() {
            self.failure = Some(StreamFailure::new(
                FailureKind::SessionClosed,
                format!("depth cache closed for {}", self.symbol),
            ));
        }
        self.session.close().await;
    }

    async fn start(&mut self) {
        self.started = true;
        self.refresh_at = self.next_refresh();
        // 스냅샷 요청을 먼저 띄워서 연결과 동시에 진행되게 한다
        self.request_snapshot();
        self.session.connect().await;
    }

    fn is_partial(&self) -> bool {
        matches!(self.mode, BookMode::Partial)
    }

    fn next_refresh(&self) -> Option<Instant> {
        self.options
            .refresh_interval
            .map(|interval| Instant::now() + interval)
    }

    fn request_snapshot(&mut self) {
        let BookMode::Diff { snapshots, market } = &self.mode else {
            // partial book은 첫 메시지가 스냅샷 역할을 한다
            return;
        };

        let snapshots = snapshots.clone();
        let market = *market;
        let symbol = self.symbol.clone();
        let limit = self.options.limit;
        // 연속 실패 시 조금씩 늦춘다
        let delay = Duration::from_secs(u64::from(self.snapshot_failures));

        debug!("호가 스냅샷 요청: {} (limit {})", symbol, limit);
        self.snapshot_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            snapshots.fetch_depth_snapshot(market, &symbol, limit).await
        }));
        self.state = SyncState::Buffering;
    }

    /// 스냅샷을 기준으로 호가창을 다시 만들고 버퍼를 재생한다.
    /// 재생 중 불연속이 나오면 재동기화하고 false
    fn apply_snapshot(&mut self, snapshot: DepthSnapshot) -> bool {
        let mut cache = DepthCache::new(&self.symbol);
        for bid in &snapshot.bids {
            cache.add_bid(*bid);
        }
        for ask in &snapshot.asks {
            cache.add_ask(*ask);
        }
        if let Some(event_time) = snapshot.event_time {
            cache.set_update_time_millis(event_time);
        }
        self.cache = cache;
        self.window.set_baseline(snapshot.last_update_id);
        self.state = SyncState::Synchronized;

        let buffered = std::mem::take(&mut self.window.buffer);
        let mut applied = 0;
        let mut stale = 0;
        for diff in buffered {
            match self.apply_diff(diff) {
                DiffOutcome::Applied => applied += 1,
                DiffOutcome::Stale => stale += 1,
                DiffOutcome::Gap => {
                    warn!(
                        "버퍼 재생 중 update id 불연속 ({}, snapshot {}). 재동기화",
                        self.symbol, snapshot.last_update_id
                    );
                    self.resync();
                    return false;
                }
            }
        }

        info!(
            "호가창 동기화 완료: {} (snapshot {}, 반영 {}, 폐기 {})",
            self.symbol, snapshot.last_update_id, applied, stale
        );
        true
    }

    fn apply_diff(&mut self, diff: DepthDiff) -> DiffOutcome {
        let outcome = self.window.check(&diff);
        if outcome == DiffOutcome::Applied {
            for bid in diff.bids {
                self.cache.add_bid(bid);
            }
            for ask in diff.asks {
                self.cache.add_ask(ask);
            }
            if let Some(event_time) = diff.event_time {
                self.cache.set_update_time_millis(event_time);
            }
            self.window.mark_applied(diff.final_update_id);
        }
        outcome
    }

    /// 호가창이 바뀌었으면 true
    fn process_event(&mut self, value: Value) -> bool {
        let value = unwrap_combined(value);

        if self.is_partial() {
            let book: PartialDepth = match serde_json::from_value(value) {
                Ok(book) => book,
                Err(e) => {
                    warn!("partial book 파싱 실패 ({}): {}", self.symbol, e);
                    return false;
                }
            };
            self.cache.replace_levels(&book.bids, &book.asks);
            if let Some(event_time) = book.event_time {
                self.cache.set_update_time_millis(event_time);
            }
            self.state = SyncState::Synchronized;
            return true;
        }

        let diff: DepthDiff = match serde_json::from_value(value) {
            Ok(diff) => diff,
            Err(e) => {
                warn!("depth 메시지 파싱 실패 ({}): {}", self.symbol, e);
                return false;
            }
        };

        if self.state != SyncState::Synchronized {
            self.window.buffer.push_back(diff);
            return false;
        }

        match self.apply_diff(diff) {
            DiffOutcome::Applied => true,
            DiffOutcome::Stale => false,
            DiffOutcome::Gap => {
                warn!(
                    "update id 불연속 ({}, last {:?}). 재동기화",
                    self.symbol, self.window.last_update_id
                );
                self.resync();
                false
            }
        }
    }

    /// 호가창을 비우고 스냅샷부터 다시 시작한다. 세션은 유지된다
    fn resync(&mut self) {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
        self.cache = DepthCache::new(&self.symbol);
        self.window.reset();
        self.state = SyncState::AwaitingSnapshot;
        self.refresh_at = self.next_refresh();
    }

    async fn fail(&mut self, failure: StreamFailure) -> StreamFailure {
        warn!("호가창 관리 종료 ({}): {}", self.symbol, failure);
        self.failure = Some(failure.clone());
        self.close().await;
        failure
    }
}

impl Drop for DepthCacheManager {
    fn drop(&mut self) {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
    }
}
