//! Enrichment orchestrator
//!
//! Fans out to every configured collaborator concurrently, degrades each
//! failure or timeout to an absent field, and computes the derived metrics
//! once all calls have settled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use market_data::{
    AccountSource, Balances, Brokerage, IndicatorSource, Indicators, MarketClock, MarketStatus,
    OptionChainSource, OptionContract, OptionType, Position, Quote, QuoteSource, SourceHealth,
};
use serde::Serialize;
use tracing::{debug, warn};

/// External collaborators; each is optional and enabled by credential presence
#[derive(Clone, Default)]
pub struct Collaborators {
    pub primary_quote: Option<Arc<dyn QuoteSource>>,
    pub secondary_quote: Option<Arc<dyn QuoteSource>>,
    pub option_chain: Option<Arc<dyn OptionChainSource>>,
    pub indicators: Option<Arc<dyn IndicatorSource>>,
    pub market_clock: Option<Arc<dyn MarketClock>>,
    pub account: Option<Arc<dyn AccountSource>>,
    pub brokerage: Option<Arc<dyn Brokerage>>,
    /// Health probes for the live clients
    pub health_probes: Vec<Arc<dyn Fn() -> SourceHealth + Send + Sync>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_quote(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.primary_quote = Some(source);
        self
    }

    pub fn with_secondary_quote(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.secondary_quote = Some(source);
        self
    }

    pub fn with_option_chain(mut self, source: Arc<dyn OptionChainSource>) -> Self {
        self.option_chain = Some(source);
        self
    }

    pub fn with_indicators(mut self, source: Arc<dyn IndicatorSource>) -> Self {
        self.indicators = Some(source);
        self
    }

    pub fn with_market_clock(mut self, source: Arc<dyn MarketClock>) -> Self {
        self.market_clock = Some(source);
        self
    }

    pub fn with_account(mut self, source: Arc<dyn AccountSource>) -> Self {
        self.account = Some(source);
        self
    }

    pub fn with_brokerage(mut self, brokerage: Arc<dyn Brokerage>) -> Self {
        self.brokerage = Some(brokerage);
        self
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn Fn() -> SourceHealth + Send + Sync>) -> Self {
        self.health_probes.push(probe);
        self
    }
}

/// Metrics computed once from the raw enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    /// Underlying bid/ask spread, percent of last
    pub spread_pct: Option<f64>,
    /// Put volume / call volume
    pub put_call_ratio: Option<f64>,
    /// Approximate IV rank from one chain snapshot, 0..=100
    pub iv_rank: Option<f64>,
}

/// Best-effort market context for one signal. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Enrichment {
    pub quote: Option<Quote>,
    pub secondary_quote: Option<Quote>,
    pub options: Option<Vec<OptionContract>>,
    pub indicators: Option<Indicators>,
    pub market_status: Option<MarketStatus>,
    pub balances: Option<Balances>,
    pub positions: Option<Vec<Position>>,
    pub derived: DerivedMetrics,
}

impl Enrichment {
    /// Last trade from the primary quote, else the secondary
    pub fn last_price(&self) -> Option<f64> {
        [&self.quote, &self.secondary_quote]
            .into_iter()
            .flatten()
            .map(|q| q.last)
            .find(|p| p.is_finite() && *p > 0.0)
    }

    pub fn equity(&self) -> Option<f64> {
        self.balances.as_ref().and_then(|b| b.equity)
    }

    pub fn buying_power(&self) -> Option<f64> {
        self.balances.as_ref().and_then(|b| b.buying_power)
    }

    pub fn options(&self) -> &[OptionContract] {
        self.options.as_deref().unwrap_or_default()
    }
}

/// Await a collaborator call under the timeout; failures degrade to `None`
async fn settle<T, F>(source: &str, timeout: Duration, call: F) -> Option<T>
where
    F: Future<Output = market_data::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(source, error = %e, "Enrichment source failed");
            None
        }
        Err(_) => {
            warn!(source, timeout_ms = timeout.as_millis() as u64, "Enrichment source timed out");
            None
        }
    }
}

/// Query every configured collaborator concurrently and assemble the bundle.
/// Returns only after all launched calls have settled.
pub async fn enrich(
    collaborators: &Collaborators,
    ticker: &str,
    timeframe_minutes: u32,
    timeout: Duration,
) -> Enrichment {
    let c = collaborators;

    let (quote, secondary_quote, options, indicators, market_status, balances, positions) = tokio::join!(
        async {
            match &c.primary_quote {
                Some(src) => settle(src.name(), timeout, src.quote(ticker)).await,
                None => None,
            }
        },
        async {
            match &c.secondary_quote {
                Some(src) => settle(src.name(), timeout, src.quote(ticker)).await,
                None => None,
            }
        },
        async {
            match &c.option_chain {
                Some(src) => settle("option_chain", timeout, src.option_chain(ticker)).await,
                None => None,
            }
        },
        async {
            match &c.indicators {
                Some(src) => settle("indicators", timeout, src.indicators(ticker, timeframe_minutes)).await,
                None => None,
            }
        },
        async {
            match &c.market_clock {
                Some(src) => settle("market_clock", timeout, src.market_status()).await,
                None => None,
            }
        },
        async {
            match &c.account {
                Some(src) => settle("balances", timeout, src.balances()).await,
                None => None,
            }
        },
        async {
            match &c.account {
                Some(src) => settle("positions", timeout, src.positions()).await,
                None => None,
            }
        },
    );

    let spread_quote = quote.as_ref().or(secondary_quote.as_ref());
    let derived = DerivedMetrics {
        spread_pct: spread_quote.and_then(spread_pct),
        put_call_ratio: options.as_deref().and_then(put_call_ratio),
        iv_rank: options.as_deref().and_then(iv_rank_proxy),
    };

    debug!(
        ticker,
        has_quote = quote.is_some(),
        contracts = options.as_ref().map_or(0, Vec::len),
        has_indicators = indicators.is_some(),
        "Enrichment settled"
    );

    Enrichment {
        quote,
        secondary_quote,
        options,
        indicators,
        market_status,
        balances,
        positions,
        derived,
    }
}

/// Bid/ask spread as a percent of last; undefined without a last price
pub fn spread_pct(quote: &Quote) -> Option<f64> {
    if quote.last > 0.0 && quote.last.is_finite() {
        Some((quote.ask - quote.bid) / quote.last * 100.0)
    } else {
        None
    }
}

/// Put volume over call volume; undefined when call volume is zero
pub fn put_call_ratio(options: &[OptionContract]) -> Option<f64> {
    if options.is_empty() {
        return None;
    }
    let volume = |t: OptionType| -> f64 {
        options
            .iter()
            .filter(|o| o.option_type == t)
            .map(|o| o.volume as f64)
            .sum()
    };
    let calls = volume(OptionType::Call);
    if calls <= 0.0 {
        return None;
    }
    Some(volume(OptionType::Put) / calls)
}

/// Position of the chain's median IV between its observed min and max,
/// scaled to 0..=100. This is a single-snapshot approximation, not a
/// historical IV percentile.
pub fn iv_rank_proxy(options: &[OptionContract]) -> Option<f64> {
    let mut ivs: Vec<f64> = options.iter().filter_map(OptionContract::implied_vol).collect();
    if ivs.is_empty() {
        return None;
    }
    ivs.sort_by(f64::total_cmp);

    let n = ivs.len();
    let median = if n % 2 == 1 {
        ivs[n / 2]
    } else {
        (ivs[n / 2 - 1] + ivs[n / 2]) / 2.0
    };
    let (min, max) = (ivs[0], ivs[n - 1]);

    if max - min <= f64::EPSILON {
        return Some(50.0);
    }
    Some(((median - min) / (max - min) * 100.0).clamp(0.0, 100.0))
}
