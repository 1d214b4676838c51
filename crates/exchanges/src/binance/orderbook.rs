use async_trait::async_trait;
use tracing::debug;

use interface::{DepthSnapshot, ExchangeError, MarketKind};

use super::BinanceClient;
use crate::DepthSnapshotExchange;

impl BinanceClient {
    /// 심볼을 Binance 형식으로 변환
    /// 예: "BTC-USDT" -> "BTCUSDT"
    /// options 심볼은 "BTC-200630-9000-P"처럼 '-'가 의미를 가지므로 대문자 변환만 한다
    fn normalize_symbol(&self, market: MarketKind, symbol: &str) -> String {
        match market {
            MarketKind::Options => symbol.to_uppercase(),
            _ => symbol.replace("-", "").to_uppercase(),
        }
    }

    fn depth_url(&self, market: MarketKind, symbol: &str, limit: u32) -> String {
        let path = match market {
            MarketKind::Spot | MarketKind::Account => "/api/v3/depth",
            MarketKind::UsdMFutures => "/fapi/v1/depth",
            MarketKind::CoinMFutures => "/dapi/v1/depth",
            MarketKind::Options => "/eapi/v1/depth",
        };
        format!(
            "{}{}?symbol={}&limit={}",
            self.rest_base(market),
            path,
            self.normalize_symbol(market, symbol),
            limit
        )
    }
}

#[async_trait]
impl DepthSnapshotExchange for BinanceClient {
    async fn fetch_depth_snapshot(
        &self,
        market: MarketKind,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshot, ExchangeError> {
        let url = self.depth_url(market, symbol, limit);
        debug!("fetch_depth_snapshot: {}", url);

        let response_text = self.send_checked(self.http.get(&url)).await?;

        let snapshot: DepthSnapshot = serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::Other(format!(
                "Failed to parse Binance depth response: {}, response: {}",
                e,
                response_text.chars().take(200).collect::<String>()
            ))
        })?;

        Ok(snapshot)
    }
}
