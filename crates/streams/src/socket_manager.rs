use std::sync::Arc;

use exchanges::ListenKeyExchange;
use interface::{AccountStream, FuturesType, MarketKind};

use crate::config::StreamConfig;
use crate::connection::{Connector, WsConnector};
use crate::error::StreamError;
use crate::keepalive::KeepAliveHooks;
use crate::registry::{SessionRegistry, StreamIdentity};
use crate::session::{PlainHooks, ReconnectingWebsocket};

const RAW_PREFIX: &str = "ws/";
const MULTIPLEX_PREFIX: &str = "stream?";
/// 선물 스트림 기본 prefix. 메시지가 `{"stream", "data"}`로 감싸져 온다
const FUTURES_PREFIX: &str = "stream?streams=";

/// 세션을 열 주소
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub market: MarketKind,
    pub base_url: String,
    pub prefix: &'static str,
    pub path: String,
}

impl StreamTarget {
    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity::new(self.market, self.path.clone())
    }
}

/// 스트림별 세션을 만들어 주는 진입점
///
/// 공개 생성자는 모두 레지스트리를 거치므로 같은 스트림을 두 번 요청하면
/// 같은 세션을 돌려받는다. 예외는 `dedicated_socket`.
pub struct BinanceSocketManager {
    config: StreamConfig,
    registry: SessionRegistry,
    connector: Arc<dyn Connector>,
    listen_keys: Option<Arc<dyn ListenKeyExchange>>,
}

impl BinanceSocketManager {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            connector: Arc::new(WsConnector),
            listen_keys: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// 계정 스트림에 필요한 listen key API
    pub fn with_listen_keys(mut self, api: Arc<dyn ListenKeyExchange>) -> Self {
        self.listen_keys = Some(api);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 임의의 stream에 대한 세션
    pub fn socket(
        &self,
        market: MarketKind,
        base_url: &str,
        prefix: &str,
        path: &str,
    ) -> Arc<ReconnectingWebsocket> {
        let identity = StreamIdentity::new(market, path);
        self.registry.get_or_create(identity, || {
            ReconnectingWebsocket::with_parts(
                base_url,
                prefix,
                path,
                self.config.session.clone(),
                Arc::new(PlainHooks),
                self.connector.clone(),
            )
        })
    }

    /// 레지스트리를 거치는 공유 세션
    pub fn open_target(&self, target: &StreamTarget) -> Arc<ReconnectingWebsocket> {
        self.socket(target.market, &target.base_url, target.prefix, &target.path)
    }

    /// 레지스트리에 등록하지 않는 전용 세션
    ///
    /// 큐를 혼자 소비해야 하는 쪽(호가창 관리자)이 쓴다. 같은 스트림이라도
    /// 호출마다 연결이 따로 생기고, 닫아도 다른 구독자에게 영향이 없다.
    pub fn dedicated_socket(&self, target: &StreamTarget) -> Arc<ReconnectingWebsocket> {
        Arc::new(ReconnectingWebsocket::with_parts(
            &target.base_url,
            target.prefix,
            &target.path,
            self.config.session.clone(),
            Arc::new(PlainHooks),
            self.connector.clone(),
        ))
    }

    /// identity의 마켓 기본 URL에 raw stream으로 연결하는 세션
    ///
    /// 계정 스트림은 listen key가 필요하므로 `account_socket`을 쓴다.
    pub fn open_stream(
        &self,
        identity: &StreamIdentity,
    ) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        let base_url = match identity.market {
            MarketKind::Spot => self.config.spot_url(),
            MarketKind::UsdMFutures => self.config.futures_url(FuturesType::UsdM),
            MarketKind::CoinMFutures => self.config.futures_url(FuturesType::CoinM),
            MarketKind::Options => self.config.options_url(),
            MarketKind::Account => {
                return Err(StreamError::InvalidArgument(format!(
                    "{} needs a listen key, use account_socket",
                    identity
                )));
            }
        };
        Ok(self.socket(identity.market, &base_url, RAW_PREFIX, &identity.path))
    }

    fn spot_target(&self, path: String, prefix: &'static str) -> StreamTarget {
        StreamTarget {
            market: MarketKind::Spot,
            base_url: self.config.spot_url(),
            prefix,
            path,
        }
    }

    fn futures_target(
        &self,
        path: String,
        futures_type: FuturesType,
        prefix: &'static str,
    ) -> StreamTarget {
        StreamTarget {
            market: futures_type.market_kind(),
            base_url: self.config.futures_url(futures_type),
            prefix,
            path,
        }
    }

    fn options_target(&self, path: String, prefix: &'static str) -> StreamTarget {
        StreamTarget {
            market: MarketKind::Options,
            base_url: self.config.options_url(),
            prefix,
            path,
        }
    }

    fn spot_socket(&self, path: &str, prefix: &'static str) -> Arc<ReconnectingWebsocket> {
        self.open_target(&self.spot_target(path.to_string(), prefix))
    }

    fn futures_socket(
        &self,
        path: &str,
        futures_type: FuturesType,
        prefix: &'static str,
    ) -> Arc<ReconnectingWebsocket> {
        self.open_target(&self.futures_target(path.to_string(), futures_type, prefix))
    }

    fn options_socket(&self, path: &str, prefix: &'static str) -> Arc<ReconnectingWebsocket> {
        self.open_target(&self.options_target(path.to_string(), prefix))
    }

    /// spot 호가 스트림 주소. `interval`이 0/100이 아니면 실패
    pub fn depth_target(
        &self,
        symbol: &str,
        depth: Option<u32>,
        interval: Option<u32>,
    ) -> Result<StreamTarget, StreamError> {
        let path = depth_path(&symbol.to_lowercase(), depth, interval)?;
        Ok(self.spot_target(path, RAW_PREFIX))
    }

    pub fn futures_depth_target(
        &self,
        symbol: &str,
        depth: u32,
        futures_type: FuturesType,
    ) -> StreamTarget {
        let path = format!("{}@depth{}", symbol.to_lowercase(), depth);
        self.futures_target(path, futures_type, FUTURES_PREFIX)
    }

    pub fn options_depth_target(&self, symbol: &str, depth: u32) -> StreamTarget {
        let path = format!("{}@depth{}", symbol.to_uppercase(), depth);
        self.options_target(path, RAW_PREFIX)
    }

    // ========== Spot ==========

    /// 호가 스트림
    ///
    /// `depth`가 5/10/20이면 partial book, 없으면 diff 스트림.
    /// `interval`은 0(기본 주기) 또는 100(ms)만 허용한다.
    pub fn depth_socket(
        &self,
        symbol: &str,
        depth: Option<u32>,
        interval: Option<u32>,
    ) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        Ok(self.open_target(&self.depth_target(symbol, depth, interval)?))
    }

    /// 전체 심볼 mini ticker. `update_time`은 ms 단위 (기본 1000)
    pub fn miniticker_socket(&self, update_time: u32) -> Arc<ReconnectingWebsocket> {
        let path = format!("!miniTicker@arr@{}ms", update_time);
        self.spot_socket(&path, RAW_PREFIX)
    }

    pub fn symbol_miniticker_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@miniTicker", symbol.to_lowercase());
        self.spot_socket(&path, RAW_PREFIX)
    }

    /// 예: interval "1m", "1h"
    pub fn kline_socket(&self, symbol: &str, interval: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@kline_{}", symbol.to_lowercase(), interval);
        self.spot_socket(&path, RAW_PREFIX)
    }

    pub fn trade_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@trade", symbol.to_lowercase());
        self.spot_socket(&path, RAW_PREFIX)
    }

    pub fn aggtrade_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@aggTrade", symbol.to_lowercase());
        self.spot_socket(&path, RAW_PREFIX)
    }

    pub fn symbol_ticker_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@ticker", symbol.to_lowercase());
        self.spot_socket(&path, RAW_PREFIX)
    }

    /// 전체 심볼 24시간 ticker
    pub fn ticker_socket(&self) -> Arc<ReconnectingWebsocket> {
        self.spot_socket("!ticker@arr", RAW_PREFIX)
    }

    pub fn symbol_book_ticker_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@bookTicker", symbol.to_lowercase());
        self.spot_socket(&path, RAW_PREFIX)
    }

    pub fn book_ticker_socket(&self) -> Arc<ReconnectingWebsocket> {
        self.spot_socket("!bookTicker", RAW_PREFIX)
    }

    /// 여러 stream을 한 연결로. 메시지는 `{"stream", "data"}`로 감싸진다
    pub fn multiplex_socket(&self, streams: &[&str]) -> Arc<ReconnectingWebsocket> {
        self.spot_socket(&multiplex_path(streams), MULTIPLEX_PREFIX)
    }

    // ========== Futures ==========

    pub fn futures_multiplex_socket(
        &self,
        streams: &[&str],
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        self.futures_socket(&multiplex_path(streams), futures_type, MULTIPLEX_PREFIX)
    }

    /// 선물 partial book (`depth`: 5/10/20)
    pub fn futures_depth_socket(
        &self,
        symbol: &str,
        depth: u32,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        self.open_target(&self.futures_depth_target(symbol, depth, futures_type))
    }

    pub fn kline_futures_socket(
        &self,
        symbol: &str,
        interval: &str,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@kline_{}", symbol.to_lowercase(), interval);
        self.futures_socket(&path, futures_type, RAW_PREFIX)
    }

    pub fn aggtrade_futures_socket(
        &self,
        symbol: &str,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@aggTrade", symbol.to_lowercase());
        self.futures_socket(&path, futures_type, FUTURES_PREFIX)
    }

    /// mark price. `fast`이면 1초 주기
    pub fn symbol_mark_price_socket(
        &self,
        symbol: &str,
        fast: bool,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let mut path = format!("{}@markPrice", symbol.to_lowercase());
        if fast {
            path.push_str("@1s");
        }
        self.futures_socket(&path, futures_type, FUTURES_PREFIX)
    }

    /// 전체 심볼 mark price
    pub fn all_mark_price_socket(
        &self,
        fast: bool,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let path = if fast { "!markPrice@arr@1s" } else { "!markPrice@arr" };
        self.futures_socket(path, futures_type, FUTURES_PREFIX)
    }

    /// coin-M index price
    pub fn index_price_socket(&self, symbol: &str, fast: bool) -> Arc<ReconnectingWebsocket> {
        let mut path = format!("{}@indexPrice", symbol.to_lowercase());
        if fast {
            path.push_str("@1s");
        }
        self.futures_socket(&path, FuturesType::CoinM, FUTURES_PREFIX)
    }

    /// USD-M 전체 심볼 24시간 ticker
    pub fn futures_ticker_socket(&self) -> Arc<ReconnectingWebsocket> {
        self.futures_socket("!ticker@arr", FuturesType::UsdM, FUTURES_PREFIX)
    }

    /// coin-M 전체 심볼 24시간 ticker
    pub fn futures_coin_ticker_socket(&self) -> Arc<ReconnectingWebsocket> {
        self.futures_socket("!ticker@arr", FuturesType::CoinM, FUTURES_PREFIX)
    }

    /// 심볼 book ticker
    pub fn symbol_ticker_futures_socket(
        &self,
        symbol: &str,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@bookTicker", symbol.to_lowercase());
        self.futures_socket(&path, futures_type, FUTURES_PREFIX)
    }

    /// 심볼 24시간 ticker
    pub fn individual_symbol_ticker_futures_socket(
        &self,
        symbol: &str,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@ticker", symbol.to_lowercase());
        self.futures_socket(&path, futures_type, FUTURES_PREFIX)
    }

    /// 전체 심볼 채널. 예: "!bookTicker", "!ticker@arr"
    pub fn all_ticker_futures_socket(
        &self,
        channel: &str,
        futures_type: FuturesType,
    ) -> Arc<ReconnectingWebsocket> {
        self.futures_socket(channel, futures_type, FUTURES_PREFIX)
    }

    // ========== Options ==========

    /// options 심볼은 대문자 그대로 쓴다 (예: BTC-200630-9000-P)
    pub fn options_depth_socket(&self, symbol: &str, depth: u32) -> Arc<ReconnectingWebsocket> {
        self.open_target(&self.options_depth_target(symbol, depth))
    }

    /// 기초자산 + 만기별 ticker. 예: ("ETH", "220930")
    pub fn options_ticker_by_expiration_socket(
        &self,
        symbol: &str,
        expiration_date: &str,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@ticker@{}", symbol.to_uppercase(), expiration_date);
        self.options_socket(&path, RAW_PREFIX)
    }

    pub fn options_recent_trades_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@trade", symbol.to_uppercase());
        self.options_socket(&path, RAW_PREFIX)
    }

    /// 신규 상장 option
    pub fn options_new_symbol_socket(&self) -> Arc<ReconnectingWebsocket> {
        self.options_socket("option_pair", RAW_PREFIX)
    }

    pub fn options_open_interest_socket(
        &self,
        symbol: &str,
        expiration_date: &str,
    ) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@openInterest@{}", symbol.to_uppercase(), expiration_date);
        self.options_socket(&path, RAW_PREFIX)
    }

    /// 기초자산 기준 mark price. 예: "ETH"
    pub fn options_mark_price_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@markPrice", symbol.to_uppercase());
        self.options_socket(&path, RAW_PREFIX)
    }

    /// 예: "ETHUSDT"
    pub fn options_index_price_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@index", symbol.to_uppercase());
        self.options_socket(&path, RAW_PREFIX)
    }

    pub fn options_ticker_socket(&self, symbol: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@ticker", symbol.to_uppercase());
        self.options_socket(&path, RAW_PREFIX)
    }

    pub fn options_kline_socket(&self, symbol: &str, interval: &str) -> Arc<ReconnectingWebsocket> {
        let path = format!("{}@kline_{}", symbol.to_uppercase(), interval);
        self.options_socket(&path, RAW_PREFIX)
    }

    pub fn options_multiplex_socket(&self, streams: &[&str]) -> Arc<ReconnectingWebsocket> {
        self.options_socket(&multiplex_path(streams), MULTIPLEX_PREFIX)
    }

    // ========== Account (listen key) ==========

    pub fn user_socket(&self) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::User)
    }

    pub fn margin_socket(&self) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::Margin)
    }

    pub fn isolated_margin_socket(&self, symbol: &str) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::IsolatedMargin(symbol.to_uppercase()))
    }

    pub fn futures_user_socket(&self) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::Futures)
    }

    pub fn coin_futures_user_socket(&self) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::CoinFutures)
    }

    pub fn portfolio_margin_socket(&self) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        self.account_socket(AccountStream::PortfolioMargin)
    }

    /// listen key 세션. 레지스트리 키는 스트림 이름이고 path는 연결 시 정해진다
    pub fn account_socket(&self, stream: AccountStream) -> Result<Arc<ReconnectingWebsocket>, StreamError> {
        let api = self.listen_keys.clone().ok_or_else(|| {
            StreamError::InvalidArgument(format!(
                "listen key API not configured for {} stream",
                stream.name()
            ))
        })?;

        let base_url = match stream {
            AccountStream::User | AccountStream::Margin | AccountStream::IsolatedMargin(_) => {
                self.config.spot_url()
            }
            AccountStream::Futures => self.config.futures_url(FuturesType::UsdM),
            AccountStream::CoinFutures => self.config.futures_url(FuturesType::CoinM),
            AccountStream::PortfolioMargin => self.config.portfolio_margin_url(),
        };

        let identity = StreamIdentity::new(MarketKind::Account, stream.name());
        let interval = self.config.keepalive_interval;
        Ok(self.registry.get_or_create(identity, || {
            let hooks = Arc::new(KeepAliveHooks::new(api, stream, interval));
            ReconnectingWebsocket::with_parts(
                &base_url,
                RAW_PREFIX,
                "",
                self.config.session.clone(),
                hooks,
                self.connector.clone(),
            )
        }))
    }
}

/// `{symbol}@depth[{depth}][@100ms]`
fn depth_path(symbol: &str, depth: Option<u32>, interval: Option<u32>) -> Result<String, StreamError> {
    let mut path = format!("{}@depth", symbol);
    if let Some(depth) = depth.filter(|depth| *depth != 1) {
        path.push_str(&depth.to_string());
    }
    match interval {
        None | Some(0) => {}
        Some(100) => path.push_str("@100ms"),
        Some(other) => {
            return Err(StreamError::InvalidArgument(format!(
                "Websocket interval value not allowed. Allowed values are [0, 100], got {}",
                other
            )));
        }
    }
    Ok(path)
}

fn multiplex_path(streams: &[&str]) -> String {
    format!("streams={}", streams.join("/"))
}
