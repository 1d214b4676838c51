use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use interface::{AccountStream, ExchangeError, MarketKind};

use super::BinanceClient;
use crate::ListenKeyExchange;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

impl BinanceClient {
    /// 계정 스트림별 listen key 엔드포인트
    fn listen_key_endpoint(&self, stream: &AccountStream) -> String {
        match stream {
            AccountStream::User => {
                format!("{}/api/v3/userDataStream", self.rest_base(MarketKind::Spot))
            }
            AccountStream::Margin => {
                format!("{}/sapi/v1/userDataStream", self.rest_base(MarketKind::Spot))
            }
            AccountStream::IsolatedMargin(_) => format!(
                "{}/sapi/v1/userDataStream/isolated",
                self.rest_base(MarketKind::Spot)
            ),
            AccountStream::Futures => format!(
                "{}/fapi/v1/listenKey",
                self.rest_base(MarketKind::UsdMFutures)
            ),
            AccountStream::CoinFutures => format!(
                "{}/dapi/v1/listenKey",
                self.rest_base(MarketKind::CoinMFutures)
            ),
            AccountStream::PortfolioMargin => {
                format!("{}/papi/v1/listenKey", self.portfolio_margin_base())
            }
        }
    }

    /// spot/margin 계열은 연장/폐기 시 listenKey 파라미터가 필요하고
    /// 선물 계열은 API key만으로 식별한다
    fn listen_key_params(
        stream: &AccountStream,
        listen_key: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let AccountStream::IsolatedMargin(symbol) = stream {
            params.push(("symbol", symbol.to_uppercase()));
        }
        if let Some(key) = listen_key {
            match stream {
                AccountStream::User | AccountStream::Margin | AccountStream::IsolatedMargin(_) => {
                    params.push(("listenKey", key.to_string()));
                }
                _ => {}
            }
        }
        params
    }

    async fn listen_key_request(
        &self,
        method: Method,
        stream: &AccountStream,
        listen_key: Option<&str>,
    ) -> Result<String, ExchangeError> {
        let api_key = self.require_api_key()?;
        let url = self.listen_key_endpoint(stream);
        let params = Self::listen_key_params(stream, listen_key);

        debug!("listen key {} {} ({:?})", method, url, stream);

        let request = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", api_key)
            .query(&params);

        self.send_checked(request).await
    }
}

#[async_trait]
impl ListenKeyExchange for BinanceClient {
    async fn create_listen_key(&self, stream: &AccountStream) -> Result<String, ExchangeError> {
        let response_text = self.listen_key_request(Method::POST, stream, None).await?;

        let response: ListenKeyResponse = serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::Other(format!(
                "Failed to parse listen key response: {}, response: {}",
                e,
                response_text.chars().take(200).collect::<String>()
            ))
        })?;

        Ok(response.listen_key)
    }

    async fn keepalive_listen_key(
        &self,
        stream: &AccountStream,
        listen_key: &str,
    ) -> Result<(), ExchangeError> {
        self.listen_key_request(Method::PUT, stream, Some(listen_key))
            .await?;
        Ok(())
    }

    async fn close_listen_key(
        &self,
        stream: &AccountStream,
        listen_key: &str,
    ) -> Result<(), ExchangeError> {
        self.listen_key_request(Method::DELETE, stream, Some(listen_key))
            .await?;
        Ok(())
    }
}
