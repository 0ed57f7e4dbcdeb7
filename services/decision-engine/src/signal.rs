//! Inbound alert payloads and the canonical `Signal`
//!
//! Two alert shapes arrive on the same endpoint: a lightweight multi-ticker
//! scanner alert and a comprehensive single-ticker alert. Both are resolved
//! here, once, into a `Signal`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Timeframe used when the payload carries none
pub const DEFAULT_TIMEFRAME_MINUTES: u32 = 5;
/// Max confluence for full alerts that omit it
pub const DEFAULT_FULL_MAX_CONFLUENCE: f64 = 10.0;
/// Scanner confluence scale
pub const SCANNER_MAX_CONFLUENCE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Scanner,
    Full,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Scanner => "scanner",
            SignalSource::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// +1 for LONG, -1 for SHORT
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("LONG") => Ok(Direction::Long),
            Some("SHORT") => Ok(Direction::Short),
            other => Err(EngineError::UnrecognizedPayload(format!(
                "invalid direction: {:?}",
                other
            ))),
        }
    }

    fn matches_label(&self, label: &str) -> bool {
        match self {
            Direction::Long => label.contains('▲') || label.contains('↑'),
            Direction::Short => label.contains('▼') || label.contains('↓'),
        }
    }
}

/// Signal quality tier, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLabel {
    Legendary,
    Mega,
    High,
    Standard,
}

impl QualityLabel {
    fn from_label(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("LEGENDARY") => QualityLabel::Legendary,
            Some("MEGA") => QualityLabel::Mega,
            Some("HIGH") => QualityLabel::High,
            _ => QualityLabel::Standard,
        }
    }
}

/// Canonical alert record. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub source: SignalSource,
    pub ticker: String,
    pub direction: Direction,
    /// Event time, epoch milliseconds
    pub timestamp_ms: i64,
    pub timeframe_minutes: u32,
    /// Source-native confluence; compare only through `confluence_ratio`
    pub confluence_score: f64,
    pub max_confluence: f64,
    pub quality: QualityLabel,
    pub is_legendary: bool,
    pub is_mega: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr: Option<f64>,
    /// Bar close at alert time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amd_phase: Option<String>,
    /// Original payload, kept for audit
    pub raw: Value,
}

impl Signal {
    /// Confluence normalized to 0..=1
    pub fn confluence_ratio(&self) -> f64 {
        if self.max_confluence > 0.0 {
            (self.confluence_score / self.max_confluence).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Signal age relative to `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp_ms
    }
}

// Scanner alert

#[derive(Debug, Clone, Deserialize)]
struct ScannerPayload {
    signal: ScannerSignal,
    #[serde(default)]
    strat: Option<ScannerStrat>,
    #[serde(default)]
    conditions: Option<BTreeMap<String, Value>>,
    #[serde(default, deserialize_with = "loose_f64")]
    timestamp: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScannerSignal {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    trigger_tf: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScannerStrat {
    tf1: Option<String>,
    tf2: Option<String>,
    tf3: Option<String>,
}

// Full alert

#[derive(Debug, Clone, Deserialize)]
struct FullPayload {
    signal: FullSignal,
    market: FullMarket,
    price: FullPrice,
    #[serde(default)]
    risk_management: Option<RiskManagement>,
    #[serde(default)]
    confluence: Option<FullConfluence>,
    #[serde(default)]
    levels: Option<Levels>,
    #[serde(default)]
    strat: Option<FullStrat>,
    #[serde(default)]
    ict: Option<Ict>,
}

#[derive(Debug, Clone, Deserialize)]
struct FullSignal {
    #[serde(default)]
    direction: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    confluence_score: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    max_confluence: Option<f64>,
    #[serde(default)]
    quality_stars: Option<String>,
    #[serde(default)]
    is_legendary: bool,
    #[serde(default)]
    is_mega: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct FullMarket {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    timestamp: Option<f64>,
    #[serde(default)]
    timeframe: Option<Value>,
    #[serde(default, deserialize_with = "loose_f64")]
    timeframe_minutes: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FullPrice {
    #[serde(default, deserialize_with = "loose_f64")]
    entry: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    close: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RiskManagement {
    #[serde(default, deserialize_with = "loose_f64")]
    stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    target_1: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    target_2: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    atr_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FullConfluence {
    #[serde(default, deserialize_with = "loose_f64")]
    total_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Levels {
    #[serde(default, deserialize_with = "loose_f64")]
    atr: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FullStrat {
    #[serde(default)]
    patterns: Option<Patterns>,
}

#[derive(Debug, Clone, Deserialize)]
struct Patterns {
    #[serde(default)]
    detected_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ict {
    #[serde(default)]
    amd_phase: Option<String>,
}

/// The two accepted alert shapes
enum WebhookPayload {
    Scanner(ScannerPayload),
    Full(Box<FullPayload>),
}

impl WebhookPayload {
    fn classify(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| EngineError::UnrecognizedPayload("payload is not a JSON object".to_string()))?;

        if obj.contains_key("scanner") {
            let payload = ScannerPayload::deserialize(raw)
                .map_err(|e| EngineError::UnrecognizedPayload(format!("scanner payload: {}", e)))?;
            return Ok(WebhookPayload::Scanner(payload));
        }

        let has_object = |key: &str| obj.get(key).map_or(false, Value::is_object);
        if !(has_object("signal") && has_object("market") && has_object("price")) {
            return Err(EngineError::UnrecognizedPayload(
                "expected a scanner marker or signal/market/price objects".to_string(),
            ));
        }

        let payload = FullPayload::deserialize(raw)
            .map_err(|e| EngineError::UnrecognizedPayload(format!("full payload: {}", e)))?;
        Ok(WebhookPayload::Full(Box::new(payload)))
    }
}

/// Normalize a raw webhook body into a `Signal`
pub fn normalize(raw: &Value) -> Result<Signal> {
    match WebhookPayload::classify(raw)? {
        WebhookPayload::Scanner(p) => normalize_scanner(p, raw),
        WebhookPayload::Full(p) => normalize_full(*p, raw),
    }
}

fn normalize_scanner(p: ScannerPayload, raw: &Value) -> Result<Signal> {
    let direction = Direction::parse(p.signal.direction.as_deref())?;
    let quality = QualityLabel::from_label(p.signal.quality.as_deref());
    let (confluence_score, max_confluence) = scanner_confluence(direction, p.strat.as_ref(), p.conditions.as_ref());

    Ok(Signal {
        source: SignalSource::Scanner,
        ticker: normalize_ticker(p.signal.ticker.as_deref()),
        direction,
        timestamp_ms: p.timestamp.map_or(0, |t| t as i64),
        timeframe_minutes: parse_timeframe(p.signal.trigger_tf.as_ref()),
        confluence_score,
        max_confluence,
        quality,
        is_legendary: quality == QualityLabel::Legendary,
        is_mega: quality == QualityLabel::Mega,
        entry: None,
        stop_loss: None,
        target1: None,
        target2: None,
        atr: None,
        close: None,
        pattern: None,
        amd_phase: None,
        raw: raw.clone(),
    })
}

/// Confluence from three timeframe labels, else from the conditions map
/// rescaled to a maximum of 3.
fn scanner_confluence(
    direction: Direction,
    strat: Option<&ScannerStrat>,
    conditions: Option<&BTreeMap<String, Value>>,
) -> (f64, f64) {
    if let Some(ScannerStrat {
        tf1: Some(tf1),
        tf2: Some(tf2),
        tf3: Some(tf3),
    }) = strat
    {
        let count = [tf1, tf2, tf3]
            .iter()
            .filter(|label| direction.matches_label(label))
            .count();
        return (count as f64, SCANNER_MAX_CONFLUENCE);
    }

    if let Some(conditions) = conditions.filter(|c| !c.is_empty()) {
        let size = conditions.len() as f64;
        let count = conditions.values().filter(|v| v.as_bool() == Some(true)).count() as f64;
        if size > SCANNER_MAX_CONFLUENCE {
            return ((count / size * SCANNER_MAX_CONFLUENCE).round(), SCANNER_MAX_CONFLUENCE);
        }
        return (count, size);
    }

    (0.0, SCANNER_MAX_CONFLUENCE)
}

fn normalize_full(p: FullPayload, raw: &Value) -> Result<Signal> {
    let direction = Direction::parse(p.signal.direction.as_deref())?;

    let confluence_score = p
        .signal
        .confluence_score
        .or_else(|| p.confluence.as_ref().and_then(|c| c.total_score))
        .unwrap_or(0.0);
    let max_confluence = p
        .signal
        .max_confluence
        .filter(|m| *m > 0.0)
        .unwrap_or(DEFAULT_FULL_MAX_CONFLUENCE);

    let stars = p
        .signal
        .quality_stars
        .as_deref()
        .map_or(0, |s| s.chars().filter(|c| *c == '★').count());
    let quality = if p.signal.is_legendary {
        QualityLabel::Legendary
    } else if p.signal.is_mega {
        QualityLabel::Mega
    } else if stars >= 4 {
        QualityLabel::High
    } else {
        QualityLabel::Standard
    };

    let timeframe_minutes = p
        .market
        .timeframe_minutes
        .filter(|m| *m >= 1.0)
        .map(|m| m as u32)
        .unwrap_or_else(|| parse_timeframe(p.market.timeframe.as_ref()));

    let rm = p.risk_management.as_ref();
    let positive = |v: Option<f64>| v.filter(|x| *x > 0.0);

    Ok(Signal {
        source: SignalSource::Full,
        ticker: normalize_ticker(p.market.ticker.as_deref()),
        direction,
        timestamp_ms: p.market.timestamp.map_or(0, |t| t as i64),
        timeframe_minutes,
        confluence_score,
        max_confluence,
        quality,
        is_legendary: p.signal.is_legendary,
        is_mega: p.signal.is_mega,
        entry: positive(p.price.entry).or(positive(p.price.close)),
        stop_loss: positive(rm.and_then(|r| r.stop_loss)),
        target1: positive(rm.and_then(|r| r.target_1)),
        target2: positive(rm.and_then(|r| r.target_2)),
        atr: positive(p.levels.and_then(|l| l.atr)).or(positive(rm.and_then(|r| r.atr_value))),
        close: positive(p.price.close),
        pattern: p
            .strat
            .and_then(|s| s.patterns)
            .and_then(|pt| pt.detected_name)
            .filter(|s| !s.is_empty()),
        amd_phase: p.ict.and_then(|i| i.amd_phase).filter(|s| !s.is_empty()),
        raw: raw.clone(),
    })
}

fn normalize_ticker(raw: Option<&str>) -> String {
    raw.unwrap_or_default().trim().to_uppercase()
}

/// Minutes from a number or numeric string; 5 when missing or invalid
fn parse_timeframe(raw: Option<&Value>) -> u32 {
    let minutes = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    minutes
        .filter(|m| m.is_finite() && *m >= 1.0)
        .map_or(DEFAULT_TIMEFRAME_MINUTES, |m| m as u32)
}

/// Numbers that may arrive as JSON numbers or numeric strings
fn loose_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}
