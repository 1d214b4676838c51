use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use interface::MarketKind;

use crate::session::ReconnectingWebsocket;

/// 세션 중복 제거 키: (마켓, path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    pub market: MarketKind,
    pub path: String,
}

impl StreamIdentity {
    pub fn new(market: MarketKind, path: impl Into<String>) -> Self {
        Self {
            market,
            path: path.into(),
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.market, self.path)
    }
}

type SessionMap = HashMap<StreamIdentity, Weak<ReconnectingWebsocket>>;

/// 살아 있는 세션 목록
///
/// 같은 identity를 요청하면 같은 세션을 돌려준다. 세션이 끝나면
/// 종료 콜백으로 스스로 빠진다.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<SessionMap>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 등록된 세션을 돌려주거나 `factory`로 새로 만든다
    ///
    /// 확인과 등록 사이에 lock을 놓지 않으므로 동시에 불려도
    /// identity당 세션은 하나만 생긴다. `factory`는 lock 안에서 불리므로
    /// 레지스트리를 다시 건드리면 안 된다.
    pub fn get_or_create<F>(&self, identity: StreamIdentity, factory: F) -> Arc<ReconnectingWebsocket>
    where
        F: FnOnce() -> ReconnectingWebsocket,
    {
        let mut sessions = self.sessions.lock();

        if let Some(existing) = sessions.get(&identity).and_then(Weak::upgrade) {
            if !existing.is_exiting() {
                return existing;
            }
        }

        let session = Arc::new(factory());
        let weak = Arc::downgrade(&session);
        let registry = Arc::downgrade(&self.sessions);
        let key = identity.clone();

        session.set_exit_callback(Box::new(move || {
            let Some(sessions) = registry.upgrade() else {
                return;
            };
            let mut sessions = sessions.lock();
            // 같은 identity로 새 세션이 이미 등록됐으면 건드리지 않는다
            if sessions.get(&key).is_some_and(|entry| entry.ptr_eq(&weak)) {
                sessions.remove(&key);
                debug!("세션 등록 해제: {}", key);
            }
        }));

        debug!("세션 등록: {}", identity);
        sessions.insert(identity, Arc::downgrade(&session));
        session
    }

    pub fn get(&self, identity: &StreamIdentity) -> Option<Arc<ReconnectingWebsocket>> {
        self.sessions
            .lock()
            .get(identity)
            .and_then(Weak::upgrade)
            .filter(|session| !session.is_exiting())
    }

    pub fn contains(&self, identity: &StreamIdentity) -> bool {
        self.get(identity).is_some()
    }

    /// 살아 있는 세션 수
    pub fn len(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, weak| weak.strong_count() > 0);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identities(&self) -> Vec<StreamIdentity> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(identity, _)| identity.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::PlainHooks;
    use crate::testing::ScriptedConnector;

    fn factory(connector: Arc<ScriptedConnector>, path: &str) -> ReconnectingWebsocket {
        ReconnectingWebsocket::with_parts(
            "wss://stream.test/",
            "ws/",
            path,
            SessionConfig::default(),
            Arc::new(PlainHooks),
            connector,
        )
    }

    #[test]
    fn test_identity_key_format() {
        let identity = StreamIdentity::new(MarketKind::Spot, "bnbbtc@depth");
        assert_eq!(identity.to_string(), "Spot_bnbbtc@depth");

        let futures = StreamIdentity::new(MarketKind::UsdMFutures, "btcusdt@depth");
        assert_ne!(identity, futures);
    }

    #[tokio::test]
    async fn test_same_identity_returns_same_session() {
        let connector = ScriptedConnector::new();
        let registry = SessionRegistry::new();
        let identity = StreamIdentity::new(MarketKind::Spot, "bnbbtc@depth");

        let first = registry.get_or_create(identity.clone(), || factory(connector.clone(), "bnbbtc@depth"));
        let second = registry.get_or_create(identity.clone(), || panic!("factory must not run"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        // 다른 마켓은 다른 세션
        let futures = registry.get_or_create(
            StreamIdentity::new(MarketKind::UsdMFutures, "bnbbtc@depth"),
            || factory(connector.clone(), "bnbbtc@depth"),
        );
        assert!(!Arc::ptr_eq(&first, &futures));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_open_one_socket() {
        let connector = ScriptedConnector::new();
        let _socket = connector.push_socket();
        let registry = SessionRegistry::new();
        let identity = StreamIdentity::new(MarketKind::Spot, "bnbbtc@trade");

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let connector = connector.clone();
                let identity = identity.clone();
                tokio::spawn(async move {
                    let session =
                        registry.get_or_create(identity, || factory(connector, "bnbbtc@trade"));
                    session.connect().await;
                    session
                })
            })
            .collect();

        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        assert!(Arc::ptr_eq(&sessions[0], &sessions[1]));
        assert_eq!(connector.attempts(), 1);

        sessions[0].close().await;
    }

    #[tokio::test]
    async fn test_exit_removes_entry() {
        let connector = ScriptedConnector::new();
        let _socket = connector.push_socket();
        let registry = SessionRegistry::new();
        let identity = StreamIdentity::new(MarketKind::Spot, "bnbbtc@kline_1m");

        let session = registry.get_or_create(identity.clone(), || factory(connector.clone(), "bnbbtc@kline_1m"));
        session.connect().await;
        assert!(registry.contains(&identity));

        session.close().await;
        assert!(!registry.contains(&identity));
        assert!(registry.is_empty());

        // 끝난 세션 대신 새 세션이 만들어진다
        let fresh = registry.get_or_create(identity.clone(), || factory(connector.clone(), "bnbbtc@kline_1m"));
        assert!(!Arc::ptr_eq(&session, &fresh));
    }

    #[tokio::test]
    async fn test_stale_exit_keeps_newer_session() {
        let connector = ScriptedConnector::new();
        let _socket = connector.push_socket();
        let registry = SessionRegistry::new();
        let identity = StreamIdentity::new(MarketKind::Spot, "bnbbtc@trade");

        let old = registry.get_or_create(identity.clone(), || factory(connector.clone(), "bnbbtc@trade"));
        old.connect().await;

        // 버려진 세션의 read loop가 정리되기 전에 새 세션이 등록된다
        drop(old);
        let newer = registry.get_or_create(identity.clone(), || factory(connector.clone(), "bnbbtc@trade"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // 이전 세션의 종료 콜백은 새 등록을 지우지 않는다
        let current = registry.get(&identity).unwrap();
        assert!(Arc::ptr_eq(&current, &newer));
    }

    #[tokio::test]
    async fn test_dropped_session_is_replaced() {
        let connector = ScriptedConnector::new();
        let registry = SessionRegistry::new();
        let identity = StreamIdentity::new(MarketKind::Options, "BTC-200630-9000-P@depth10");

        let session = registry.get_or_create(identity.clone(), || {
            factory(connector.clone(), "BTC-200630-9000-P@depth10")
        });
        drop(session);

        assert!(registry.get(&identity).is_none());
        assert_eq!(registry.len(), 0);
    }
}
