use serde::Deserialize;

use interface::{ExchangeError, MarketKind};

pub mod listen_key;
pub mod orderbook;

const API_KEY_ENV: &str = "BINANCE_API_KEY";

const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

#[derive(Clone)]
pub struct BinanceClient {
    pub(crate) http: reqwest::Client,
    pub api_key: Option<String>,
    tld: String,
    testnet: bool,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            tld: "com".to_string(),
            testnet: false,
        }
    }

    /// `.env` 또는 환경 변수의 BINANCE_API_KEY로 클라이언트 생성
    /// listen key 엔드포인트는 서명 없이 API key 헤더만 요구한다
    pub fn with_credentials() -> Result<Self, ExchangeError> {
        dotenv::dotenv().ok();

        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|e| ExchangeError::Other(format!("{} not found: {}", API_KEY_ENV, e)))?;

        Ok(Self {
            api_key: Some(api_key),
            ..Self::new()
        })
    }

    /// 도메인 변경 (예: "us" -> api.binance.us)
    pub fn with_tld(mut self, tld: &str) -> Self {
        self.tld = tld.to_string();
        self
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn tld(&self) -> &str {
        &self.tld
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }

    /// 마켓별 REST base URL
    pub(crate) fn rest_base(&self, market: MarketKind) -> String {
        match market {
            MarketKind::Spot | MarketKind::Account => {
                if self.testnet {
                    SPOT_TESTNET_URL.to_string()
                } else {
                    format!("https://api.binance.{}", self.tld)
                }
            }
            MarketKind::UsdMFutures => {
                if self.testnet {
                    FUTURES_TESTNET_URL.to_string()
                } else {
                    format!("https://fapi.binance.{}", self.tld)
                }
            }
            MarketKind::CoinMFutures => {
                if self.testnet {
                    FUTURES_TESTNET_URL.to_string()
                } else {
                    format!("https://dapi.binance.{}", self.tld)
                }
            }
            // options는 testnet이 없다
            MarketKind::Options => format!("https://eapi.binance.{}", self.tld),
        }
    }

    pub(crate) fn portfolio_margin_base(&self) -> String {
        format!("https://papi.binance.{}", self.tld)
    }

    pub(crate) fn require_api_key(&self) -> Result<&str, ExchangeError> {
        self.api_key.as_deref().ok_or_else(|| {
            ExchangeError::Other(
                "API key not set. Use BinanceClient::with_credentials()".to_string(),
            )
        })
    }

    /// 요청을 보내고 HTTP 상태를 확인한 뒤 응답 본문을 돌려준다
    /// Binance 에러 본문({"code", "msg"})은 ExchangeError::Api로 변환
    pub(crate) async fn send_checked(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<String, ExchangeError> {
        let response = request.send().await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &response_text));
        }

        Ok(response_text)
    }
}

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

fn api_error(status: reqwest::StatusCode, response_text: &str) -> ExchangeError {
    match serde_json::from_str::<BinanceErrorBody>(response_text) {
        Ok(body) => ExchangeError::Api {
            code: body.code,
            msg: body.msg,
        },
        Err(_) => ExchangeError::Other(format!(
            "Binance API HTTP error: status {}, response: {}",
            status,
            response_text.chars().take(200).collect::<String>()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_base_by_market() {
        let client = BinanceClient::new();
        assert_eq!(client.rest_base(MarketKind::Spot), "https://api.binance.com");
        assert_eq!(
            client.rest_base(MarketKind::UsdMFutures),
            "https://fapi.binance.com"
        );
        assert_eq!(
            client.rest_base(MarketKind::CoinMFutures),
            "https://dapi.binance.com"
        );
        assert_eq!(
            client.rest_base(MarketKind::Options),
            "https://eapi.binance.com"
        );
    }

    #[test]
    fn test_rest_base_tld_and_testnet() {
        let us = BinanceClient::new().with_tld("us");
        assert_eq!(us.rest_base(MarketKind::Spot), "https://api.binance.us");

        let testnet = BinanceClient::new().with_testnet(true);
        assert_eq!(testnet.rest_base(MarketKind::Spot), SPOT_TESTNET_URL);
        assert_eq!(
            testnet.rest_base(MarketKind::CoinMFutures),
            FUTURES_TESTNET_URL
        );
    }

    #[test]
    fn test_api_error_body() {
        let err = api_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code": -1121, "msg": "Invalid symbol."}"#,
        );
        match err {
            ExchangeError::Api { code, msg } => {
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(err, ExchangeError::Other(msg) if msg.contains("502")));
    }

    #[test]
    fn test_require_api_key() {
        let client = BinanceClient::new();
        assert!(client.require_api_key().is_err());

        let client = BinanceClient {
            api_key: Some("key".to_string()),
            ..BinanceClient::new()
        };
        assert_eq!(client.require_api_key().unwrap(), "key");
    }
}
