//! Engine configuration
//!
//! Built-in defaults, then an optional file named by `ENGINE_CONFIG_FILE`,
//! then environment variables (`SIGNAL_MAX_AGE_MS`, `DAILY_TRADE_LIMIT`, ...).

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, Result};

/// Dedupe TTL bounds in seconds
const MIN_DEDUPE_TTL_SECS: u64 = 60;
const MAX_DEDUPE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Named policy presets from the legacy strategy engine. A preset seeds
/// the confluence minimums, the minimum reward/risk and the size
/// multiplier; keys set explicitly in the file or environment win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreset {
    /// No seeding, every value comes from defaults/file/env
    #[default]
    Custom,
    MegaOnly,
    Conservative,
    Balanced,
    Aggressive,
    ReversalOnly,
    MeanReversion,
    Scalping,
}

/// Values a preset seeds; `None` leaves the configured value alone
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PresetSeed {
    pub min_confluence_scanner: Option<f64>,
    pub min_confluence_full: Option<f64>,
    pub min_risk_reward: Option<f64>,
    pub risk_multiplier: Option<f64>,
}

impl StrategyPreset {
    pub fn seed(&self) -> PresetSeed {
        let seed = |scanner, full, rr, multiplier| PresetSeed {
            min_confluence_scanner: scanner,
            min_confluence_full: full,
            min_risk_reward: rr,
            risk_multiplier: Some(multiplier),
        };
        match self {
            StrategyPreset::Custom => PresetSeed::default(),
            StrategyPreset::MegaOnly => seed(Some(3.0), Some(10.0), Some(1.5), 2.0),
            StrategyPreset::Conservative => seed(Some(3.0), Some(8.0), Some(1.3), 1.2),
            StrategyPreset::Balanced => seed(Some(2.0), Some(6.0), Some(1.0), 1.0),
            StrategyPreset::Aggressive => seed(Some(1.0), Some(4.0), Some(0.8), 0.7),
            StrategyPreset::ReversalOnly => seed(None, None, None, 2.0),
            StrategyPreset::MeanReversion => seed(None, None, None, 1.2),
            StrategyPreset::Scalping => seed(Some(2.0), Some(4.0), Some(0.8), 0.5),
        }
    }
}

fn seed_field(slot: &mut f64, value: Option<f64>, explicit: bool) {
    if let (Some(value), false) = (value, explicit) {
        *slot = value;
    }
}

/// Decision engine thresholds, risk caps and selection policy
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyPreset,

    // Gating
    pub signal_max_age_ms: i64,
    pub min_confluence_scanner: f64,
    #[serde(alias = "min_confluence_score")]
    pub min_confluence_full: f64,
    /// Confidence below this is SKIP
    pub paper_threshold: f64,
    /// Confidence at or above this is EXECUTE
    pub execute_threshold: f64,
    pub daily_trade_limit: u32,
    pub min_buying_power: f64,
    pub enable_auto_trading: bool,

    // Idempotency
    #[serde(alias = "webhook_dedupe_enabled")]
    pub dedupe_enabled: bool,
    #[serde(alias = "webhook_dedupe_ttl_sec")]
    pub dedupe_ttl_secs: u64,

    /// Per-collaborator timeout for enrichment calls
    pub collaborator_timeout_ms: u64,

    // Sizing
    /// Flat-dollar risk budget when equity is unknown
    pub max_risk_per_trade: f64,
    #[serde(alias = "max_position_size")]
    pub max_position_notional: f64,
    /// Scales the risk budget
    pub risk_multiplier: f64,
    /// Percent of equity risked per quality tier
    pub risk_pct_legendary: f64,
    pub risk_pct_mega: f64,
    pub risk_pct_high: f64,
    pub risk_pct_standard: f64,
    pub max_option_contracts: u32,
    pub max_spread_contracts: u32,

    // Contract selection
    pub options_enabled: bool,
    pub spreads_enabled: bool,
    pub min_dte: i64,
    pub max_dte: i64,
    /// Expirations fetched per chain snapshot
    pub max_expirations: usize,
    pub min_option_volume: u64,
    pub min_open_interest: u64,
    /// Bid/ask spread ceiling, percent of the ask
    pub max_option_spread_pct: f64,
    pub min_delta: f64,
    pub max_delta: f64,
    pub max_implied_vol: f64,
    pub iv_rank_high_threshold: f64,
    pub debit_long_delta: f64,
    pub debit_short_delta: f64,
    pub credit_short_delta: f64,
    pub credit_long_delta: f64,
    pub max_spread_width: f64,

    // Risk plan
    pub atr_stop_multiplier: f64,
    pub atr_target1_multiplier: f64,
    pub atr_target2_multiplier: f64,
    pub option_stop_pct: f64,
    pub option_take_profit_pct: f64,

    // Policy filters (empty / zero disables)
    #[serde(deserialize_with = "comma_list")]
    pub allowed_tickers: Vec<String>,
    #[serde(deserialize_with = "comma_list")]
    pub allowed_timeframes: Vec<u32>,
    pub min_risk_reward: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyPreset::Custom,
            signal_max_age_ms: 120_000,
            min_confluence_scanner: 2.0,
            min_confluence_full: 5.0,
            paper_threshold: 50.0,
            execute_threshold: 65.0,
            daily_trade_limit: 10,
            min_buying_power: 1000.0,
            enable_auto_trading: false,

            dedupe_enabled: true,
            dedupe_ttl_secs: 86_400,

            collaborator_timeout_ms: 8000,

            max_risk_per_trade: 500.0,
            max_position_notional: 10_000.0,
            risk_multiplier: 1.0,
            risk_pct_legendary: 2.0,
            risk_pct_mega: 1.5,
            risk_pct_high: 1.0,
            risk_pct_standard: 0.5,
            max_option_contracts: 10,
            max_spread_contracts: 5,

            options_enabled: true,
            spreads_enabled: true,
            min_dte: 7,
            max_dte: 45,
            max_expirations: 4,
            min_option_volume: 10,
            min_open_interest: 100,
            max_option_spread_pct: 15.0,
            min_delta: 0.25,
            max_delta: 0.75,
            max_implied_vol: 1.5,
            iv_rank_high_threshold: 50.0,
            debit_long_delta: 0.50,
            debit_short_delta: 0.30,
            credit_short_delta: 0.30,
            credit_long_delta: 0.15,
            max_spread_width: 10.0,

            atr_stop_multiplier: 1.5,
            atr_target1_multiplier: 2.0,
            atr_target2_multiplier: 3.0,
            option_stop_pct: 50.0,
            option_take_profit_pct: 100.0,

            allowed_tickers: Vec::new(),
            allowed_timeframes: Vec::new(),
            min_risk_reward: 0.0,
        }
    }
}

/// Public thresholds reported at start-up
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigSummary {
    pub strategy: StrategyPreset,
    pub signal_max_age_ms: i64,
    pub daily_trade_limit: u32,
    pub min_confluence_scanner: f64,
    pub min_confluence_full: f64,
    pub enable_auto_trading: bool,
    pub min_buying_power: f64,
}

impl EngineConfig {
    /// Load from defaults, `ENGINE_CONFIG_FILE` and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("ENGINE_CONFIG_FILE").ok();
        Self::load_from(file.as_deref().map(Path::new))
    }

    /// Load with an explicit config file (yaml/toml/json by extension)
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::default().try_parsing(true));

        let raw = builder.build()?;
        let mut cfg: EngineConfig = raw.clone().try_deserialize()?;
        cfg.apply_strategy(|key| raw.get_string(key).is_ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Seed the preset's values into every key `explicit` reports unset
    pub fn apply_strategy(&mut self, explicit: impl Fn(&str) -> bool) {
        let seed = self.strategy.seed();
        seed_field(
            &mut self.min_confluence_scanner,
            seed.min_confluence_scanner,
            explicit("min_confluence_scanner"),
        );
        seed_field(
            &mut self.min_confluence_full,
            seed.min_confluence_full,
            explicit("min_confluence_full") || explicit("min_confluence_score"),
        );
        seed_field(&mut self.min_risk_reward, seed.min_risk_reward, explicit("min_risk_reward"));
        seed_field(&mut self.risk_multiplier, seed.risk_multiplier, explicit("risk_multiplier"));
    }

    /// Reject incoherent values
    pub fn validate(&self) -> Result<()> {
        let in_pct = |v: f64| (0.0..=100.0).contains(&v);

        if !in_pct(self.paper_threshold) || !in_pct(self.execute_threshold) {
            return Err(invalid("thresholds must be within 0..=100"));
        }
        if self.paper_threshold > self.execute_threshold {
            return Err(invalid("paper_threshold must not exceed execute_threshold"));
        }
        if self.signal_max_age_ms <= 0 {
            return Err(invalid("signal_max_age_ms must be positive"));
        }
        if self.min_dte < 0 || self.min_dte > self.max_dte {
            return Err(invalid("DTE window is inverted"));
        }
        if !(self.min_delta > 0.0 && self.min_delta <= self.max_delta && self.max_delta <= 1.0) {
            return Err(invalid("delta band must satisfy 0 < min_delta <= max_delta <= 1"));
        }
        for (name, delta) in [
            ("debit_long_delta", self.debit_long_delta),
            ("debit_short_delta", self.debit_short_delta),
            ("credit_short_delta", self.credit_short_delta),
            ("credit_long_delta", self.credit_long_delta),
        ] {
            if !(delta > 0.0 && delta <= 1.0) {
                return Err(invalid(format!("{} must be within (0, 1]", name)));
            }
        }
        if self.max_option_contracts == 0 || self.max_spread_contracts == 0 || self.max_expirations == 0 {
            return Err(invalid("contract caps must be at least 1"));
        }
        for (name, pct) in [
            ("risk_pct_legendary", self.risk_pct_legendary),
            ("risk_pct_mega", self.risk_pct_mega),
            ("risk_pct_high", self.risk_pct_high),
            ("risk_pct_standard", self.risk_pct_standard),
        ] {
            if !(pct > 0.0) {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        if !(self.max_risk_per_trade > 0.0)
            || !(self.max_position_notional > 0.0)
            || !(self.risk_multiplier > 0.0)
        {
            return Err(invalid("risk caps must be positive"));
        }
        if !(self.max_spread_width > 0.0) {
            return Err(invalid("max_spread_width must be positive"));
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(invalid("collaborator_timeout_ms must be positive"));
        }
        if !(self.option_stop_pct > 0.0 && self.option_stop_pct < 100.0) {
            return Err(invalid("option_stop_pct must be within (0, 100)"));
        }
        Ok(())
    }

    /// Dedupe TTL clamped to [60s, 7d]
    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(
            self.dedupe_ttl_secs
                .clamp(MIN_DEDUPE_TTL_SECS, MAX_DEDUPE_TTL_SECS),
        )
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            strategy: self.strategy,
            signal_max_age_ms: self.signal_max_age_ms,
            daily_trade_limit: self.daily_trade_limit,
            min_confluence_scanner: self.min_confluence_scanner,
            min_confluence_full: self.min_confluence_full,
            enable_auto_trading: self.enable_auto_trading,
            min_buying_power: self.min_buying_power,
        }
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Config(msg.into())
}

/// Provider credentials; a collaborator is enabled only when its
/// credentials are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    pub tradier_api_key: Option<String>,
    pub tradier_account_id: Option<String>,
    pub tradier_base_url: Option<String>,
    pub twelvedata_api_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub alpaca_base_url: Option<String>,
    pub alpaca_data_url: Option<String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Result<Self> {
        let creds: ProviderCredentials = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()?;
        Ok(creds.without_blanks())
    }

    fn without_blanks(self) -> Self {
        let keep = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            tradier_api_key: keep(self.tradier_api_key),
            tradier_account_id: keep(self.tradier_account_id),
            tradier_base_url: keep(self.tradier_base_url),
            twelvedata_api_key: keep(self.twelvedata_api_key),
            alpaca_api_key: keep(self.alpaca_api_key),
            alpaca_secret_key: keep(self.alpaca_secret_key),
            alpaca_base_url: keep(self.alpaca_base_url),
            alpaca_data_url: keep(self.alpaca_data_url),
        }
    }
}

/// Accepts either a list or a comma-separated string
fn comma_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrText<T> {
        List(Vec<T>),
        Text(String),
        Single(T),
    }

    match ListOrText::<T>::deserialize(deserializer)? {
        ListOrText::List(items) => Ok(items),
        ListOrText::Single(item) => Ok(vec![item]),
        ListOrText::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<T>().map_err(serde::de::Error::custom))
            .collect(),
    }
}
