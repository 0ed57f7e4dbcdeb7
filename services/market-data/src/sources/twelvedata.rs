use crate::sources::health::{json_f64, HealthTracker};
use crate::types::*;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";

/// TwelveData technical indicator client
pub struct TwelveDataClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    health_tracker: HealthTracker,
}

impl TwelveDataClient {
    const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
            health_tracker: HealthTracker::new("twelvedata"),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Latest row of one indicator series, recorded under the indicator name
    async fn latest_values(
        &self,
        indicator: &'static str,
        symbol: &str,
        interval: &str,
        time_period: Option<u32>,
    ) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.fetch_series(indicator, symbol, interval, time_period).await;
        self.health_tracker.record(indicator, started.elapsed(), &outcome);
        outcome
    }

    async fn fetch_series(
        &self,
        indicator: &str,
        symbol: &str,
        interval: &str,
        time_period: Option<u32>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, indicator);

        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("outputsize", "1".to_string()),
            ("apikey", self.api_key.clone()),
        ];
        if let Some(period) = time_period {
            query.push(("time_period", period.to_string()));
        }

        let request_future = self.client.get(&url).query(&query).send();
        let response = tokio::time::timeout(self.request_timeout, request_future)
            .await
            .map_err(|_| MarketDataError::Timeout {
                source_name: "twelvedata".to_string(),
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

        let json = response
            .json::<Value>()
            .await
            .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))?;

        // Errors come back as HTTP 200 with a status field
        if json.get("status").and_then(Value::as_str) == Some("error") {
            let code = json.get("code").and_then(Value::as_u64).unwrap_or(400) as u16;
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(MarketDataError::ApiError { status: code, body: message });
        }

        json.pointer("/values/0")
            .cloned()
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("{} has no values", indicator)))
    }

    /// RSI(14), ATR(14), ADX(14), STOCH and BBANDS(20), fetched concurrently.
    /// Each indicator is independently optional; fails only when all of them do.
    pub async fn get_indicators(&self, symbol: &str, timeframe_minutes: u32) -> Result<Indicators> {
        let interval = interval_for(timeframe_minutes);

        let (rsi, atr, adx, stoch, bbands) = tokio::join!(
            self.latest_values("rsi", symbol, &interval, Some(14)),
            self.latest_values("atr", symbol, &interval, Some(14)),
            self.latest_values("adx", symbol, &interval, Some(14)),
            self.latest_values("stoch", symbol, &interval, None),
            self.latest_values("bbands", symbol, &interval, Some(20)),
        );

        if let (Err(e), Err(_), Err(_), Err(_), Err(_)) = (&rsi, &atr, &adx, &stoch, &bbands) {
            return Err(MarketDataError::InvalidResponse(format!(
                "all TwelveData indicators failed for {}: {}",
                symbol, e
            )));
        }

        let field = |row: &Result<Value>, name: &str| -> Option<f64> {
            match row {
                Ok(v) => json_f64(v.get(name)),
                Err(e) => {
                    debug!("TwelveData {} unavailable for {}: {}", name, symbol, e);
                    None
                }
            }
        };

        Ok(Indicators {
            rsi: field(&rsi, "rsi"),
            atr: field(&atr, "atr"),
            adx: field(&adx, "adx"),
            stoch_k: field(&stoch, "slow_k").or_else(|| field(&stoch, "k")),
            stoch_d: field(&stoch, "slow_d").or_else(|| field(&stoch, "d")),
            bb_upper: field(&bbands, "upper_band"),
            bb_lower: field(&bbands, "lower_band"),
            bb_middle: field(&bbands, "middle_band"),
        })
    }

    pub fn health(&self) -> SourceHealth {
        self.health_tracker.snapshot()
    }
}

/// TwelveData interval string for a timeframe in minutes
pub fn interval_for(timeframe_minutes: u32) -> String {
    match timeframe_minutes {
        0 => "5min".to_string(),
        60 => "1h".to_string(),
        120 => "2h".to_string(),
        240 => "4h".to_string(),
        1440 => "1day".to_string(),
        m => format!("{}min", m),
    }
}

#[async_trait::async_trait]
impl IndicatorSource for TwelveDataClient {
    async fn indicators(&self, symbol: &str, timeframe_minutes: u32) -> Result<Indicators> {
        self.get_indicators(symbol, timeframe_minutes).await
    }
}
