use serde::Deserialize;

use interface::PriceLevel;

/// diff depth 이벤트 (`depthUpdate`)
///
/// ```json
/// {"e": "depthUpdate", "E": 123456789, "s": "BNBBTC", "U": 157, "u": 160,
///  "b": [["0.0024", "10"]], "a": [["0.0026", "100"]]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DepthDiff {
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<PriceLevel>,
}

/// partial book 이벤트 (선물 `depthN`, options `depthN`)
///
/// 선물은 `b`/`a`, spot partial book은 `bids`/`asks`로 보낸다.
#[derive(Debug, Clone, Deserialize)]
pub struct PartialDepth {
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    #[serde(rename = "b", alias = "bids")]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "a", alias = "asks")]
    pub asks: Vec<PriceLevel>,
}
