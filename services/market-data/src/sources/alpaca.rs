use crate::sources::health::{json_f64, HealthTracker};
use crate::types::*;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};

pub const DEFAULT_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

/// Alpaca client for the market clock and stock snapshots
pub struct AlpacaClient {
    client: Client,
    trading_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
    request_timeout: Duration,
    health_tracker: HealthTracker,
}

impl AlpacaClient {
    const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            trading_url: DEFAULT_TRADING_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
            health_tracker: HealthTracker::new("alpaca"),
        })
    }

    pub fn with_urls(mut self, trading_url: Option<String>, data_url: Option<String>) -> Self {
        if let Some(url) = trading_url.filter(|u| !u.is_empty()) {
            self.trading_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = data_url.filter(|u| !u.is_empty()) {
            self.data_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn get_json(&self, endpoint: &'static str, url: &str) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.fetch(url).await;
        self.health_tracker.record(endpoint, started.elapsed(), &outcome);
        outcome
    }

    async fn fetch(&self, url: &str) -> Result<Value> {
        let request_future = self
            .client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .send();

        let response = tokio::time::timeout(self.request_timeout, request_future)
            .await
            .map_err(|_| MarketDataError::Timeout {
                source_name: "alpaca".to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))
    }

    /// Market clock (`/v2/clock`)
    pub async fn get_market_status(&self) -> Result<MarketStatus> {
        let json = self.get_json("clock", &format!("{}/v2/clock", self.trading_url)).await?;

        let text = |key: &str| json.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(MarketStatus {
            is_open: json.get("is_open").and_then(Value::as_bool).unwrap_or(false),
            timestamp: text("timestamp"),
            next_open: text("next_open"),
            next_close: text("next_close"),
        })
    }

    /// Latest quote built from the stock snapshot on the data host
    pub async fn get_snapshot_quote(&self, symbol: &str) -> Result<Quote> {
        let json = self
            .get_json("snapshot", &format!("{}/v2/stocks/{}/snapshot", self.data_url, symbol))
            .await?;

        let bid = json_f64(json.pointer("/latestQuote/bp")).unwrap_or(0.0);
        let ask = json_f64(json.pointer("/latestQuote/ap")).unwrap_or(0.0);
        let last = json_f64(json.pointer("/latestTrade/p"))
            .or_else(|| json_f64(json.pointer("/minuteBar/c")))
            .or_else(|| json_f64(json.pointer("/dailyBar/c")))
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("Alpaca snapshot has no price for {}", symbol)))?;

        Ok(Quote {
            symbol: symbol.to_uppercase(),
            bid,
            ask,
            last,
            volume: json_f64(json.pointer("/dailyBar/v")).map(|v| v.max(0.0) as u64),
            source: "alpaca".to_string(),
        })
    }

    pub fn health(&self) -> SourceHealth {
        self.health_tracker.snapshot()
    }
}

#[async_trait::async_trait]
impl MarketClock for AlpacaClient {
    async fn market_status(&self) -> Result<MarketStatus> {
        self.get_market_status().await
    }
}

#[async_trait::async_trait]
impl QuoteSource for AlpacaClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.get_snapshot_quote(symbol).await
    }

    fn name(&self) -> &str {
        "alpaca"
    }
}
