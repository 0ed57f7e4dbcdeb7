use crate::sources::health::{json_f64, one_or_many, HealthTracker};
use crate::types::*;
use chrono::{NaiveDate, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://sandbox.tradier.com/v1";

/// Tradier brokerage client: quotes, option chains, account reads and
/// bracket order placement.
pub struct TradierClient {
    client: Client,
    base_url: String,
    api_key: String,
    account_id: Option<String>,
    request_timeout: Duration,
    /// Expirations considered for the chain, in days from today
    min_dte: i64,
    max_dte: i64,
    max_expirations: usize,
    health_tracker: HealthTracker,
}

impl TradierClient {
    /// Per-request timeout when none is configured
    const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn new(api_key: impl Into<String>, account_id: Option<String>, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            account_id,
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
            min_dte: 7,
            max_dte: 45,
            max_expirations: 4,
            health_tracker: HealthTracker::new("tradier"),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Restrict chain fetches to expirations within `[min_dte, max_dte]` days,
    /// at most `max_expirations` of them.
    pub fn with_expiration_window(mut self, min_dte: i64, max_dte: i64, max_expirations: usize) -> Self {
        self.min_dte = min_dte;
        self.max_dte = max_dte;
        self.max_expirations = max_expirations.max(1);
        self
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    fn account_id(&self) -> Result<&str> {
        self.account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(MarketDataError::NotConfigured("TRADIER_ACCOUNT_ID"))
    }

    /// Sends a request with the per-request timeout and records the outcome
    /// against `endpoint`
    async fn send(&self, req: RequestBuilder, endpoint: &'static str) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.exchange(req, endpoint).await;
        self.health_tracker.record(endpoint, started.elapsed(), &outcome);
        outcome
    }

    async fn exchange(&self, req: RequestBuilder, endpoint: &'static str) -> Result<Value> {
        let response = match tokio::time::timeout(self.request_timeout, req.send()).await {
            Ok(response) => response?,
            Err(_) => {
                warn!("Tradier {} request timed out", endpoint);
                return Err(MarketDataError::Timeout {
                    source_name: "tradier".to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                });
            }
        };

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

    async fn get_json(&self, endpoint: &'static str, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let req = self.authorize(self.client.get(&url)).query(query);
        self.send(req, endpoint).await
    }

    /// Latest quote for an underlying
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let json = self
            .get_json("quotes", "/markets/quotes", &[("symbols", symbol), ("greeks", "false")])
            .await?;

        let quote = one_or_many(json.pointer("/quotes/quote"))
            .into_iter()
            .find(|q| {
                q.get("symbol")
                    .and_then(Value::as_str)
                    .map_or(true, |s| s.eq_ignore_ascii_case(symbol))
            })
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("Tradier quote missing for {}", symbol)))?;

        let last = json_f64(quote.get("last"))
            .ok_or_else(|| MarketDataError::InvalidResponse("Tradier quote has no last price".to_string()))?;

        Ok(Quote {
            symbol: quote
                .get("symbol")
                .and_then(Value::as_str)
                .unwrap_or(symbol)
                .to_string(),
            bid: json_f64(quote.get("bid")).unwrap_or(0.0),
            ask: json_f64(quote.get("ask")).unwrap_or(0.0),
            last,
            volume: json_f64(quote.get("volume")).map(|v| v.max(0.0) as u64),
            source: "tradier".to_string(),
        })
    }

    /// Available expirations for an underlying, ascending
    pub async fn get_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let json = self
            .get_json("expirations", "/markets/options/expirations", &[("symbol", symbol)])
            .await?;

        let mut dates: Vec<NaiveDate> = one_or_many(json.pointer("/expirations/date"))
            .into_iter()
            .filter_map(Value::as_str)
            .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    /// Chain for a single expiration with greeks
    pub async fn get_chain(&self, symbol: &str, expiration: NaiveDate) -> Result<Vec<OptionContract>> {
        let expiration = expiration.format("%Y-%m-%d").to_string();
        let json = self
            .get_json(
                "chains",
                "/markets/options/chains",
                &[("symbol", symbol), ("expiration", &expiration), ("greeks", "true")],
            )
            .await?;

        Ok(one_or_many(json.pointer("/options/option"))
            .into_iter()
            .filter_map(parse_option)
            .collect())
    }

    /// One chain snapshot across the expirations inside the DTE window
    pub async fn get_option_chain(&self, symbol: &str) -> Result<Vec<OptionContract>> {
        let expirations = self.get_expirations(symbol).await?;
        let today = Utc::now().date_naive();
        let selected = select_expirations(&expirations, today, self.min_dte, self.max_dte, self.max_expirations);

        if selected.is_empty() {
            debug!("No Tradier expirations for {}", symbol);
            return Ok(Vec::new());
        }

        let results = futures::future::join_all(
            selected.iter().map(|exp| self.get_chain(symbol, *exp)),
        )
        .await;

        let mut contracts = Vec::new();
        let mut last_error = None;
        let mut any_ok = false;
        for (exp, result) in selected.iter().zip(results) {
            match result {
                Ok(mut chain) => {
                    any_ok = true;
                    contracts.append(&mut chain);
                }
                Err(e) => {
                    warn!("Tradier chain {} {} failed: {}", symbol, exp, e);
                    last_error = Some(e);
                }
            }
        }

        match (any_ok, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(contracts),
        }
    }

    /// Account balances with the nested fallbacks margin and cash accounts use
    pub async fn get_balances(&self) -> Result<Balances> {
        let json = self.get_json("balances", "/user/balances", &[]).await?;
        let b = json
            .get("balances")
            .ok_or_else(|| MarketDataError::InvalidResponse("Tradier balances missing".to_string()))?;

        let equity = json_f64(b.get("total_equity"))
            .or_else(|| json_f64(b.pointer("/account_balance/total_equity")));
        let buying_power = json_f64(b.get("buying_power"))
            .or_else(|| json_f64(b.pointer("/account_balance/buying_power")))
            .or_else(|| json_f64(b.pointer("/margin/stock_buying_power")));
        let cash = json_f64(b.pointer("/cash/cash_available"))
            .or_else(|| json_f64(b.pointer("/cash/available")))
            .or_else(|| json_f64(b.get("total_cash")));

        let account_number = match b.get("account_number") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Balances {
            account_number,
            equity,
            buying_power,
            cash,
        })
    }

    /// Open positions with non-zero quantity
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let account_id = self.account_id()?;
        let path = format!("/accounts/{}/positions", account_id);
        let json = self.get_json("positions", &path, &[]).await?;

        Ok(one_or_many(json.pointer("/positions/position"))
            .into_iter()
            .filter_map(|p| {
                let symbol = p.get("symbol").and_then(Value::as_str)?.to_string();
                let quantity = json_f64(p.get("quantity")).unwrap_or(0.0);
                (!symbol.is_empty() && quantity != 0.0).then(|| Position {
                    symbol,
                    quantity,
                    cost_basis: json_f64(p.get("cost_basis")),
                })
            })
            .collect())
    }

    /// Places a single-leg bracket order (`class=bracket`)
    pub async fn place_order(&self, order: &BracketOrderRequest) -> Result<OrderResponse> {
        if order.quantity == 0 {
            return Err(MarketDataError::Rejected("quantity must be positive".to_string()));
        }

        let account_id = self.account_id()?;
        let path = format!("/accounts/{}/orders", account_id);
        let url = format!("{}{}", self.base_url, path);
        let req = self
            .authorize(self.client.post(&url))
            .form(&bracket_order_form(order));

        let json = self.send(req, "orders").await?;

        if let Some(errors) = json.get("errors") {
            return Err(MarketDataError::Rejected(errors.to_string()));
        }

        let id = match json.pointer("/order/id") {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let status = json
            .pointer("/order/status")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(OrderResponse { id, status, raw: json })
    }

    /// Get health status using internal metrics (no API call)
    pub fn health(&self) -> SourceHealth {
        self.health_tracker.snapshot()
    }
}

/// Expirations inside the DTE window, nearest first. Falls back to the
/// nearest listed expiration when none fall inside the window.
pub fn select_expirations(
    expirations: &[NaiveDate],
    today: NaiveDate,
    min_dte: i64,
    max_dte: i64,
    max_expirations: usize,
) -> Vec<NaiveDate> {
    let in_window: Vec<NaiveDate> = expirations
        .iter()
        .copied()
        .filter(|d| {
            let dte = (*d - today).num_days();
            dte >= min_dte && dte <= max_dte
        })
        .take(max_expirations)
        .collect();

    if !in_window.is_empty() {
        return in_window;
    }

    expirations
        .iter()
        .copied()
        .find(|d| *d >= today)
        .into_iter()
        .collect()
}

/// Form fields for a Tradier bracket order
pub fn bracket_order_form(order: &BracketOrderRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("class", "bracket".to_string()),
        ("symbol", order.symbol.clone()),
        ("side", order.side.as_str().to_string()),
        ("quantity", order.quantity.to_string()),
        ("type", order.entry_type.as_str().to_string()),
        ("duration", "day".to_string()),
    ];

    if order.entry_type == EntryType::Limit {
        if let Some(price) = order.limit_price {
            form.push(("price", price.to_string()));
        }
    }

    form.push(("take_profit[price]", order.take_profit.to_string()));
    form.push(("stop_loss[stop]", order.stop_loss.to_string()));
    form
}

fn parse_option(o: &Value) -> Option<OptionContract> {
    let strike = json_f64(o.get("strike"))?;
    let expiration = o
        .get("expiration_date")
        .or_else(|| o.get("expiration"))
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())?;

    let option_type = match o
        .get("option_type")
        .or_else(|| o.get("type"))
        .and_then(Value::as_str)
    {
        Some(t) if t.eq_ignore_ascii_case("put") => OptionType::Put,
        _ => OptionType::Call,
    };

    let greeks = o.get("greeks").and_then(|g| {
        let delta = json_f64(g.get("delta"))?;
        Some(Greeks {
            delta,
            gamma: json_f64(g.get("gamma")),
            theta: json_f64(g.get("theta")),
            vega: json_f64(g.get("vega")),
            rho: json_f64(g.get("rho")),
            iv: json_f64(g.get("smv_vol")).or_else(|| json_f64(g.get("iv"))),
            mid_iv: json_f64(g.get("mid_iv")),
        })
    });

    Some(OptionContract {
        symbol: o.get("symbol").and_then(Value::as_str)?.to_string(),
        underlying: o
            .get("underlying")
            .or_else(|| o.get("root_symbol"))
            .and_then(Value::as_str)
            .map(str::to_string),
        strike,
        expiration,
        option_type,
        bid: json_f64(o.get("bid")).unwrap_or(0.0),
        ask: json_f64(o.get("ask")).unwrap_or(0.0),
        last: json_f64(o.get("last")).unwrap_or(0.0),
        volume: json_f64(o.get("volume")).map_or(0, |v| v.max(0.0) as u64),
        open_interest: json_f64(o.get("open_interest")).map_or(0, |v| v.max(0.0) as u64),
        greeks,
    })
}

#[async_trait::async_trait]
impl QuoteSource for TradierClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.get_quote(symbol).await
    }

    fn name(&self) -> &str {
        "tradier"
    }
}

#[async_trait::async_trait]
impl OptionChainSource for TradierClient {
    async fn option_chain(&self, symbol: &str) -> Result<Vec<OptionContract>> {
        self.get_option_chain(symbol).await
    }
}

#[async_trait::async_trait]
impl AccountSource for TradierClient {
    async fn balances(&self) -> Result<Balances> {
        self.get_balances().await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.get_positions().await
    }
}

#[async_trait::async_trait]
impl Brokerage for TradierClient {
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<OrderResponse> {
        self.place_order(order).await
    }
}
