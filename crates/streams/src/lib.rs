//! Binance WebSocket 스트림 계층
//!
//! - `session`: 끊기면 다시 붙는 WebSocket 세션과 제한된 수신 큐
//! - `keepalive`: listen key 계정 스트림
//! - `socket_manager` / `registry`: 스트림별 세션 생성과 중복 제거
//! - `depth`: REST 스냅샷과 diff 스트림을 맞춘 로컬 호가창

pub mod config;
pub mod connection;
pub mod depth;
pub mod error;
pub mod keepalive;
pub mod logger;
pub mod message;
pub mod queue;
pub mod registry;
pub mod session;
pub mod socket_manager;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{SessionConfig, StreamConfig};
pub use connection::{Connection, Connector, WsConnector};
pub use depth::{DepthCache, DepthCacheManager, DepthCacheOptions, SyncState};
pub use error::{FailureKind, StreamError, StreamFailure};
pub use keepalive::KeepAliveHooks;
pub use message::WsMessage;
pub use registry::{SessionRegistry, StreamIdentity};
pub use session::{ConnectionState, ReconnectingWebsocket, SessionContext, SessionHooks};
pub use socket_manager::{BinanceSocketManager, StreamTarget};
