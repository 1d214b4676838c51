use std::fmt;

use rust_decimal::Decimal;
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("binance api error: code={code}, msg={msg}")]
    Api { code: i64, msg: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

/// 스트림이 속한 마켓 분류. 세션 중복 제거 키의 일부로 사용된다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Spot,
    UsdMFutures,
    CoinMFutures,
    Options,
    Account,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketKind::Spot => "Spot",
            MarketKind::UsdMFutures => "USD_M_Futures",
            MarketKind::CoinMFutures => "Coin_M_Futures",
            MarketKind::Options => "Vanilla_Options",
            MarketKind::Account => "Account",
        };
        f.write_str(name)
    }
}

/// 선물 종류 (USD-M / COIN-M)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FuturesType {
    #[default]
    UsdM,
    CoinM,
}

impl FuturesType {
    pub fn market_kind(self) -> MarketKind {
        match self {
            FuturesType::UsdM => MarketKind::UsdMFutures,
            FuturesType::CoinM => MarketKind::CoinMFutures,
        }
    }
}

/// listen key로 주소가 정해지는 계정 스트림 종류
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountStream {
    User,
    /// cross margin
    Margin,
    /// isolated margin (심볼별)
    IsolatedMargin(String),
    Futures,
    CoinFutures,
    PortfolioMargin,
}

impl AccountStream {
    /// 레지스트리 키로 쓰이는 스트림 이름
    /// 예: "user", "coin_futures", isolated margin은 심볼 그대로
    pub fn name(&self) -> String {
        match self {
            AccountStream::User => "user".to_string(),
            AccountStream::Margin => "margin".to_string(),
            AccountStream::IsolatedMargin(symbol) => symbol.to_uppercase(),
            AccountStream::Futures => "futures".to_string(),
            AccountStream::CoinFutures => "coin_futures".to_string(),
            AccountStream::PortfolioMargin => "portfolio_margin".to_string(),
        }
    }
}

/// 호가 한 단계 [price, quantity]
///
/// Binance는 `["0.0024", "10"]` 또는 `["0.0024", "10", []]` 형태로 보내므로
/// 앞의 두 값만 읽고 나머지는 버린다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

impl<'de> Deserialize<'de> for PriceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = PriceLevel;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [price, quantity] array")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<PriceLevel, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let price: Decimal = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let quantity: Decimal = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(PriceLevel { price, quantity })
            }
        }

        deserializer.deserialize_seq(LevelVisitor)
    }
}

/// REST 호가 스냅샷 (`GET depth`)
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    /// options 마켓은 `u` 필드로 내려준다
    #[serde(rename = "lastUpdateId", alias = "u")]
    pub last_update_id: u64,
    /// 선물 마켓만 제공
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}
