use async_trait::async_trait;

use interface::{AccountStream, DepthSnapshot, ExchangeError, MarketKind};

pub mod binance;

#[async_trait]
pub trait DepthSnapshotExchange: Send + Sync {
    /// 특정 심볼의 호가 스냅샷 조회 (lastUpdateId 포함)
    /// market: Spot / UsdMFutures / CoinMFutures / Options
    async fn fetch_depth_snapshot(
        &self,
        market: MarketKind,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshot, ExchangeError>;
}

/// 계정 스트림 주소로 쓰이는 listen key 발급/연장/폐기
#[async_trait]
pub trait ListenKeyExchange: Send + Sync {
    async fn create_listen_key(&self, stream: &AccountStream) -> Result<String, ExchangeError>;

    async fn keepalive_listen_key(
        &self,
        stream: &AccountStream,
        listen_key: &str,
    ) -> Result<(), ExchangeError>;

    async fn close_listen_key(
        &self,
        stream: &AccountStream,
        listen_key: &str,
    ) -> Result<(), ExchangeError>;
}

// Convenience re-exports
pub use binance::BinanceClient;
