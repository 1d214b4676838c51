use std::env;
use std::str::FromStr;
use std::time::Duration;

use interface::FuturesType;

use crate::error::StreamError;

pub const MAX_RECONNECTS: u32 = 5;
pub const MAX_RECONNECT_SECONDS: u64 = 60;
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_QUEUE_SIZE: usize = 100;
/// listen key 갱신 주기 (5분)
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

const STREAM_TESTNET_URL: &str = "wss://stream.testnet.binance.vision/";
const STREAM_DEMO_URL: &str = "wss://demo-stream.binance.com/";
const FSTREAM_TESTNET_URL: &str = "wss://stream.binancefuture.com/";
const FSTREAM_DEMO_URL: &str = "wss://fstream.binancefuture.com/";
const DSTREAM_TESTNET_URL: &str = "wss://dstream.binancefuture.com/";

/// 세션 하나의 재연결/큐 설정
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// 연속 연결 실패 허용 횟수 (최초 연결 시도 포함)
    pub max_reconnects: u32,
    /// 재연결 대기 상한(초)
    pub max_reconnect_seconds: u64,
    /// 수신 대기 타임아웃. 초과해도 세션은 유지된다
    pub read_timeout: Duration,
    pub max_queue_size: usize,
    /// 바이너리 프레임을 gzip으로 풀지 여부
    pub compressed: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnects: MAX_RECONNECTS,
            max_reconnect_seconds: MAX_RECONNECT_SECONDS,
            read_timeout: READ_TIMEOUT,
            max_queue_size: MAX_QUEUE_SIZE,
            compressed: false,
        }
    }
}

/// 스트림 엔드포인트와 세션 기본값
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub tld: String,
    pub testnet: bool,
    pub demo: bool,
    pub keepalive_interval: Duration,
    pub session: SessionConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tld: "com".to_string(),
            testnet: false,
            demo: false,
            keepalive_interval: KEEPALIVE_INTERVAL,
            session: SessionConfig::default(),
        }
    }
}

impl StreamConfig {
    /// `.env` 또는 환경 변수에서 설정을 읽는다
    ///
    /// - BINANCE_TLD (기본 "com")
    /// - BINANCE_TESTNET / BINANCE_DEMO ("true"/"false")
    /// - BINANCE_WS_QUEUE_SIZE
    /// - BINANCE_KEEPALIVE_SECS
    pub fn from_env() -> Result<Self, StreamError> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Ok(tld) = env::var("BINANCE_TLD") {
            config.tld = tld;
        }
        if let Some(testnet) = parse_var::<bool>("BINANCE_TESTNET")? {
            config.testnet = testnet;
        }
        if let Some(demo) = parse_var::<bool>("BINANCE_DEMO")? {
            config.demo = demo;
        }
        if let Some(size) = parse_var::<usize>("BINANCE_WS_QUEUE_SIZE")? {
            config.session.max_queue_size = size;
        }
        if let Some(secs) = parse_var::<u64>("BINANCE_KEEPALIVE_SECS")? {
            config.keepalive_interval = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_tld(mut self, tld: &str) -> Self {
        self.tld = tld.to_string();
        self
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn with_demo(mut self, demo: bool) -> Self {
        self.demo = demo;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.session.max_queue_size == 0 {
            return Err(StreamError::Config {
                key: "max_queue_size".to_string(),
                msg: "must be greater than 0".to_string(),
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(StreamError::Config {
                key: "keepalive_interval".to_string(),
                msg: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn spot_url(&self) -> String {
        if self.testnet {
            STREAM_TESTNET_URL.to_string()
        } else if self.demo {
            STREAM_DEMO_URL.to_string()
        } else {
            format!("wss://stream.binance.{}:9443/", self.tld)
        }
    }

    pub fn futures_url(&self, futures_type: FuturesType) -> String {
        match futures_type {
            FuturesType::UsdM => {
                if self.testnet {
                    FSTREAM_TESTNET_URL.to_string()
                } else if self.demo {
                    FSTREAM_DEMO_URL.to_string()
                } else {
                    format!("wss://fstream.binance.{}/", self.tld)
                }
            }
            FuturesType::CoinM => {
                if self.testnet || self.demo {
                    DSTREAM_TESTNET_URL.to_string()
                } else {
                    format!("wss://dstream.binance.{}/", self.tld)
                }
            }
        }
    }

    /// options는 testnet이 없다
    pub fn options_url(&self) -> String {
        format!("wss://nbstream.binance.{}/eoptions/", self.tld)
    }

    pub fn portfolio_margin_url(&self) -> String {
        format!("{}pm/", self.futures_url(FuturesType::UsdM))
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, StreamError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StreamError::Config {
                key: key.to_string(),
                msg: format!("{} ({})", e, raw),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();
        assert_eq!(config.max_reconnects, 5);
        assert_eq!(config.max_reconnect_seconds, 60);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_queue_size, 100);
        assert!(!config.compressed);
    }

    #[test]
    fn test_stream_urls() {
        let config = StreamConfig::default();
        assert_eq!(config.spot_url(), "wss://stream.binance.com:9443/");
        assert_eq!(
            config.futures_url(FuturesType::UsdM),
            "wss://fstream.binance.com/"
        );
        assert_eq!(
            config.futures_url(FuturesType::CoinM),
            "wss://dstream.binance.com/"
        );
        assert_eq!(config.options_url(), "wss://nbstream.binance.com/eoptions/");
        assert_eq!(config.portfolio_margin_url(), "wss://fstream.binance.com/pm/");

        let us = StreamConfig::default().with_tld("us");
        assert_eq!(us.spot_url(), "wss://stream.binance.us:9443/");
    }

    #[test]
    fn test_testnet_and_demo_urls() {
        let testnet = StreamConfig::default().with_testnet(true);
        assert_eq!(testnet.spot_url(), STREAM_TESTNET_URL);
        assert_eq!(testnet.futures_url(FuturesType::UsdM), FSTREAM_TESTNET_URL);
        assert_eq!(testnet.futures_url(FuturesType::CoinM), DSTREAM_TESTNET_URL);

        let demo = StreamConfig::default().with_demo(true);
        assert_eq!(demo.spot_url(), STREAM_DEMO_URL);
        assert_eq!(demo.futures_url(FuturesType::UsdM), FSTREAM_DEMO_URL);
        assert_eq!(demo.futures_url(FuturesType::CoinM), DSTREAM_TESTNET_URL);
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let mut config = StreamConfig::default();
        config.session.max_queue_size = 0;
        assert!(matches!(
            config.validate(),
            Err(StreamError::Config { key, .. }) if key == "max_queue_size"
        ));
    }
}
