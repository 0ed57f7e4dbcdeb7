use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-of-book quote for an underlying
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: Option<u64>,
    pub source: String,          // "tradier", "alpaca"
}

/// Call or put
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

/// Option sensitivities as reported by the chain provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub iv: Option<f64>,
    pub mid_iv: Option<f64>,
}

/// One contract from an options chain snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionContract {
    pub symbol: String,
    pub underlying: Option<String>,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub greeks: Option<Greeks>,
}

impl OptionContract {
    /// Mid price, only when both sides are quoted and not crossed
    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }

    /// Bid/ask spread as a fraction of the ask (1.0 when the ask is missing)
    pub fn spread_ratio(&self) -> f64 {
        if self.ask > 0.0 {
            (self.ask - self.bid) / self.ask
        } else {
            1.0
        }
    }

    pub fn abs_delta(&self) -> Option<f64> {
        self.greeks
            .as_ref()
            .map(|g| g.delta.abs())
            .filter(|d| d.is_finite())
    }

    /// Implied volatility, preferring the mid IV
    pub fn implied_vol(&self) -> Option<f64> {
        let g = self.greeks.as_ref()?;
        g.mid_iv
            .or(g.iv)
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    pub fn days_to_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days()
    }
}

/// Latest values for the technical indicators used in scoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Indicators {
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_middle: Option<f64>,
}

/// Market clock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketStatus {
    pub is_open: bool,
    pub timestamp: Option<String>,
    pub next_open: Option<String>,
    pub next_close: Option<String>,
}

/// Brokerage account balances
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Balances {
    pub account_number: Option<String>,
    pub equity: Option<f64>,
    pub buying_power: Option<f64>,
    pub cash: Option<f64>,
}

/// Open brokerage position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: Option<f64>,
}

impl Position {
    /// Underlying ticker. OCC option symbols (`AAPL250117C00150000`) carry
    /// the root before the first digit.
    pub fn underlying(&self) -> &str {
        let end = self
            .symbol
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.symbol.len());
        &self.symbol[..end]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    SellShort,
    BuyToOpen,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::SellShort => "sell_short",
            OrderSide::BuyToOpen => "buy_to_open",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Market,
    Limit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Market => "market",
            EntryType::Limit => "limit",
        }
    }
}

/// Single-leg bracket order (entry + stop + take profit)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BracketOrderRequest {
    /// Equity ticker or OCC option symbol
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub entry_type: EntryType,
    pub limit_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Brokerage acknowledgement of a placed order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResponse {
    pub id: Option<String>,
    pub status: Option<String>,
    pub raw: serde_json::Value,
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
    /// Per-endpoint breakdown, sorted by endpoint name
    pub endpoints: Vec<EndpointHealth>,
}

/// Outcome counters for one provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub is_healthy: bool,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Error types for market data collaborators
#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("{source_name} request timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for MarketDataError {
    fn from(e: reqwest::Error) -> Self {
        MarketDataError::Http(e.to_string())
    }
}

/// Result type for market data operations
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Quote provider
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;

    /// Source name
    fn name(&self) -> &str;
}

/// Options chain provider
#[async_trait::async_trait]
pub trait OptionChainSource: Send + Sync {
    /// One snapshot of the chain for an underlying
    async fn option_chain(&self, symbol: &str) -> Result<Vec<OptionContract>>;
}

/// Technical indicator provider
#[async_trait::async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn indicators(&self, symbol: &str, timeframe_minutes: u32) -> Result<Indicators>;
}

/// Market hours provider
#[async_trait::async_trait]
pub trait MarketClock: Send + Sync {
    async fn market_status(&self) -> Result<MarketStatus>;
}

/// Brokerage account reads
#[async_trait::async_trait]
pub trait AccountSource: Send + Sync {
    async fn balances(&self) -> Result<Balances>;

    async fn positions(&self) -> Result<Vec<Position>>;
}

/// Brokerage order placement
#[async_trait::async_trait]
pub trait Brokerage: Send + Sync {
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<OrderResponse>;
}
