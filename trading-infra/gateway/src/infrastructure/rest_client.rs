use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;
use trading_core::PriceLevel;

use crate::domain::{BookSnapshot, FetchError, SessionGrant, SessionIssuer, SnapshotFetcher};

/// Listen keys stay valid this long after issue or the last keepalive
const LISTEN_KEY_VALIDITY: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {code} - {msg}")]
    Api { code: i64, msg: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convert infrastructure RestError to domain FetchError
impl From<RestError> for FetchError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => FetchError::Network(e.to_string()),
            RestError::Api { code, msg } => FetchError::Api { code, message: msg },
            RestError::Parse(msg) => FetchError::Parse(msg),
        }
    }
}

/// REST client for Binance-style futures APIs (AsterDEX)
/// Infrastructure component - handles HTTP communication
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        RestClient {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Get order book depth snapshot
    pub async fn get_depth(&self, symbol: &str, limit: usize) -> Result<BookSnapshot, RestError> {
        let path = format!("/depth?symbol={}&limit={}", symbol, depth_limit(limit));
        let depth: DepthResponse = self.get(&path).await?;
        depth.into_snapshot(symbol)
    }

    /// Open a user data stream
    pub async fn create_listen_key(&self) -> Result<String, RestError> {
        let resp: ListenKeyResponse = self.send(self.client.post(self.url("/listenKey"))).await?;
        Ok(resp.listen_key)
    }

    /// Extend the user data stream's validity
    pub async fn keepalive_listen_key(&self) -> Result<(), RestError> {
        let _: serde_json::Value = self.send(self.client.put(self.url("/listenKey"))).await?;
        Ok(())
    }

    /// Close the user data stream
    pub async fn close_listen_key(&self) -> Result<(), RestError> {
        let _: serde_json::Value = self.send(self.client.delete(self.url("/listenKey"))).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, RestError> {
        let resp = request.header("X-MBX-APIKEY", &self.api_key).send().await?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, RestError> {
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&text) {
                return Err(RestError::Api {
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(RestError::Parse(format!("HTTP {}: {}", status, text)));
        }

        serde_json::from_str(&text).map_err(|e| RestError::Parse(e.to_string()))
    }
}

/// Round up to a depth the endpoint accepts
fn depth_limit(requested: usize) -> usize {
    const ALLOWED: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];
    ALLOWED
        .iter()
        .copied()
        .find(|allowed| *allowed >= requested)
        .unwrap_or(1000)
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(rename = "T", default)]
    transaction_time: Option<i64>,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

impl DepthResponse {
    fn into_snapshot(self, symbol: &str) -> Result<BookSnapshot, RestError> {
        Ok(BookSnapshot {
            symbol: symbol.to_string(),
            sequence: self.last_update_id,
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
            timestamp: self.transaction_time,
        })
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, RestError> {
    raw.iter()
        .map(|[price, size]| {
            let price: Decimal = price
                .parse()
                .map_err(|e| RestError::Parse(format!("price {}: {}", price, e)))?;
            let size: Decimal = size
                .parse()
                .map_err(|e| RestError::Parse(format!("size {}: {}", size, e)))?;
            Ok(PriceLevel::new(price, size))
        })
        .collect()
}

/// Implement SnapshotFetcher trait for RestClient (Dependency Inversion)
#[async_trait]
impl SnapshotFetcher for RestClient {
    async fn fetch_snapshot(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, FetchError> {
        self.get_depth(symbol, depth).await.map_err(FetchError::from)
    }
}

#[async_trait]
impl SessionIssuer for RestClient {
    async fn issue(&self) -> Result<SessionGrant, FetchError> {
        let token = self.create_listen_key().await.map_err(FetchError::from)?;
        Ok(SessionGrant {
            token,
            validity: LISTEN_KEY_VALIDITY,
        })
    }

    async fn renew(&self, _token: &str) -> Result<(), FetchError> {
        self.keepalive_listen_key().await.map_err(FetchError::from)
    }

    async fn close(&self, _token: &str) -> Result<(), FetchError> {
        self.close_listen_key().await.map_err(FetchError::from)
    }
}
