use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::StreamError;

/// 수신 프레임 원본
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// 소켓 한 번 읽기의 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ReadEvent {
    Frame(Frame),
    /// 서버가 닫음 (close code)
    Closed(Option<u16>),
    Error(String),
}

/// 열린 WebSocket 연결 하나
#[async_trait]
pub trait Connection: Send {
    /// 다음 데이터 프레임. ping/pong 같은 제어 프레임은 내부에서 처리한다
    async fn recv(&mut self) -> ReadEvent;

    async fn send_text(&mut self, text: String) -> Result<(), StreamError>;

    async fn close(&mut self);
}

/// URL로 연결을 여는 쪽. 세션은 이 trait만 알고 있다
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, StreamError>;
}

/// tokio-tungstenite 기반 기본 connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, StreamError> {
        let (ws_stream, _) = connect_async(url).await?;
        debug!("WebSocket 연결 성공: {}", url);
        Ok(Box::new(WsConnection { inner: ws_stream }))
    }
}

struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> ReadEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return ReadEvent::Frame(Frame::Text(text)),
                Some(Ok(Message::Binary(data))) => return ReadEvent::Frame(Frame::Binary(data)),
                Some(Ok(Message::Ping(data))) => {
                    // Ping에 대한 Pong 응답
                    if let Err(e) = self.inner.send(Message::Pong(data)).await {
                        return ReadEvent::Error(format!("Pong 전송 실패: {}", e));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return ReadEvent::Closed(frame.map(|f| u16::from(f.code)));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReadEvent::Error(e.to_string()),
                None => return ReadEvent::Closed(None),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            debug!("WebSocket close 실패 (무시): {}", e);
        }
    }
}

/// 프레임을 JSON으로 디코딩한다
///
/// `compressed`이면 바이너리 프레임을 gzip으로 풀고 나서 파싱한다.
/// 디코딩에 실패한 프레임은 경고만 남기고 버린다.
pub fn decode_frame(frame: Frame, compressed: bool) -> Option<Value> {
    let parsed = match frame {
        Frame::Text(text) => serde_json::from_str::<Value>(&text),
        Frame::Binary(data) if compressed => {
            let mut decoder = GzDecoder::new(data.as_slice());
            let mut text = String::new();
            if let Err(e) = decoder.read_to_string(&mut text) {
                warn!("gzip 프레임 해제 실패: {}", e);
                return None;
            }
            serde_json::from_str::<Value>(&text)
        }
        Frame::Binary(data) => serde_json::from_slice::<Value>(&data),
    };

    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("잘못된 프레임을 버립니다: {}", e);
            None
        }
    }
}
