//! Gating checks, evaluated in a fixed order without short-circuiting

use serde::Serialize;

use crate::config::EngineConfig;
use crate::enrichment::Enrichment;
use crate::signal::{Signal, SignalSource};
use crate::sizing::RiskPlan;

pub const HAS_REQUIRED_FIELDS: &str = "hasRequiredFields";
pub const NOT_STALE: &str = "notStale";
pub const MARKET_OPEN: &str = "marketOpen";
pub const NO_CONFLICTING_POSITION: &str = "noConflictingPosition";
pub const MEETS_MIN_CONFLUENCE: &str = "meetsMinConfluence";
pub const UNDER_DAILY_LIMIT: &str = "underDailyLimit";
pub const SUFFICIENT_BUYING_POWER: &str = "sufficientBuyingPower";
pub const TICKER_ALLOWED: &str = "tickerAllowed";
pub const TIMEFRAME_ALLOWED: &str = "timeframeAllowed";
pub const MEETS_MIN_RISK_REWARD: &str = "meetsMinRiskReward";
pub const NOT_DUPLICATE: &str = "notDuplicate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCheck {
    pub name: &'static str,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// In evaluation order
    pub checks: Vec<ValidationCheck>,
    pub is_valid: bool,
    pub failed_checks: Vec<String>,
}

impl ValidationResult {
    fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        let failed_checks: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.to_string())
            .collect();
        Self {
            is_valid: failed_checks.is_empty(),
            checks,
            failed_checks,
        }
    }

    /// Result for a webhook that lost its dedupe claim
    pub fn duplicate() -> Self {
        Self::from_checks(vec![ValidationCheck {
            name: NOT_DUPLICATE,
            passed: false,
        }])
    }

    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.passed)
    }
}

/// Everything validation reads besides config
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub signal: &'a Signal,
    pub enrichment: &'a Enrichment,
    pub plan: &'a RiskPlan,
    pub daily_trade_count: u32,
    /// Whether a market clock is configured at all
    pub market_clock_configured: bool,
    pub now_ms: i64,
}

pub fn validate(input: &ValidationInput<'_>, cfg: &EngineConfig) -> ValidationResult {
    let signal = input.signal;
    let enrichment = input.enrichment;

    let mut checks = vec![
        ValidationCheck {
            name: HAS_REQUIRED_FIELDS,
            passed: !signal.ticker.is_empty() && signal.timestamp_ms > 0 && signal.max_confluence > 0.0,
        },
        ValidationCheck {
            name: NOT_STALE,
            passed: signal.timestamp_ms > 0 && signal.age_ms(input.now_ms) <= cfg.signal_max_age_ms,
        },
    ];

    if input.market_clock_configured {
        // Unknown status does not block
        checks.push(ValidationCheck {
            name: MARKET_OPEN,
            passed: enrichment.market_status.as_ref().map_or(true, |m| m.is_open),
        });
    }

    let conflicting = enrichment
        .positions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|p| p.quantity != 0.0 && p.underlying().eq_ignore_ascii_case(&signal.ticker));

    let min_confluence = match signal.source {
        SignalSource::Scanner => cfg.min_confluence_scanner,
        SignalSource::Full => cfg.min_confluence_full,
    };

    checks.extend([
        ValidationCheck {
            name: NO_CONFLICTING_POSITION,
            passed: !conflicting,
        },
        ValidationCheck {
            name: MEETS_MIN_CONFLUENCE,
            passed: signal.confluence_score >= min_confluence,
        },
        ValidationCheck {
            name: UNDER_DAILY_LIMIT,
            passed: input.daily_trade_count < cfg.daily_trade_limit,
        },
        ValidationCheck {
            name: SUFFICIENT_BUYING_POWER,
            passed: enrichment.buying_power().map_or(true, |bp| bp >= cfg.min_buying_power),
        },
    ]);

    if !cfg.allowed_tickers.is_empty() {
        checks.push(ValidationCheck {
            name: TICKER_ALLOWED,
            passed: cfg
                .allowed_tickers
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(&signal.ticker)),
        });
    }

    if !cfg.allowed_timeframes.is_empty() {
        checks.push(ValidationCheck {
            name: TIMEFRAME_ALLOWED,
            passed: cfg.allowed_timeframes.contains(&signal.timeframe_minutes),
        });
    }

    if cfg.min_risk_reward > 0.0 {
        checks.push(ValidationCheck {
            name: MEETS_MIN_RISK_REWARD,
            passed: input.plan.risk_reward().map_or(false, |rr| rr >= cfg.min_risk_reward),
        });
    }

    ValidationResult::from_checks(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::PlanSource;
    use market_data::{Balances, MarketStatus, Position};
    use serde_json::json;

    const NOW: i64 = 1_700_000_060_000;

    fn full_signal(score: f64, timestamp: i64) -> Signal {
        let raw = json!({
            "signal": {"direction": "LONG", "confluence_score": score, "max_confluence": 8},
            "market": {"ticker": "SPY", "timestamp": timestamp, "timeframe": "15"},
            "price": {"entry": 100.0},
            "risk_management": {"stop_loss": 98.0, "target_1": 103.0}
        });
        crate::signal::normalize(&raw).unwrap()
    }

    fn plan() -> RiskPlan {
        RiskPlan {
            entry: Some(100.0),
            stop_loss: Some(98.0),
            target1: Some(103.0),
            target2: Some(103.0),
            source: PlanSource::Signal,
        }
    }

    fn run(signal: &Signal, enrichment: &Enrichment, daily: u32, clock: bool, cfg: &EngineConfig) -> ValidationResult {
        let plan = plan();
        validate(
            &ValidationInput {
                signal,
                enrichment,
                plan: &plan,
                daily_trade_count: daily,
                market_clock_configured: clock,
                now_ms: NOW,
            },
            cfg,
        )
    }

    #[test]
    fn test_all_core_checks_pass() {
        let s = full_signal(6.0, NOW - 1000);
        let result = run(&s, &Enrichment::default(), 0, false, &EngineConfig::default());
        assert!(result.is_valid);
        let names: Vec<&str> = result.checks.iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                HAS_REQUIRED_FIELDS,
                NOT_STALE,
                NO_CONFLICTING_POSITION,
                MEETS_MIN_CONFLUENCE,
                UNDER_DAILY_LIMIT,
                SUFFICIENT_BUYING_POWER
            ]
        );
    }

    #[test]
    fn test_stale_signal_fails_only_not_stale() {
        let s = full_signal(6.0, NOW - 10 * 60 * 1000);
        let result = run(&s, &Enrichment::default(), 0, false, &EngineConfig::default());
        assert!(!result.is_valid);
        assert_eq!(result.failed_checks, vec![NOT_STALE.to_string()]);
    }

    #[test]
    fn test_every_check_evaluates() {
        let s = full_signal(1.0, NOW - 10 * 60 * 1000);
        let enrichment = Enrichment {
            market_status: Some(MarketStatus {
                is_open: false,
                timestamp: None,
                next_open: None,
                next_close: None,
            }),
            balances: Some(Balances {
                buying_power: Some(10.0),
                ..Default::default()
            }),
            positions: Some(vec![Position {
                symbol: "SPY250221C00500000".to_string(),
                quantity: 2.0,
                cost_basis: None,
            }]),
            ..Default::default()
        };
        let result = run(&s, &enrichment, 10, true, &EngineConfig::default());
        assert_eq!(
            result.failed_checks,
            vec![
                NOT_STALE,
                MARKET_OPEN,
                NO_CONFLICTING_POSITION,
                MEETS_MIN_CONFLUENCE,
                UNDER_DAILY_LIMIT,
                SUFFICIENT_BUYING_POWER
            ]
        );
    }

    #[test]
    fn test_unknown_market_status_passes() {
        let s = full_signal(6.0, NOW - 1000);
        let result = run(&s, &Enrichment::default(), 0, true, &EngineConfig::default());
        assert_eq!(result.check(MARKET_OPEN), Some(true));
    }

    #[test]
    fn test_scanner_uses_scanner_minimum() {
        let raw = json!({
            "scanner": "x",
            "signal": {"ticker": "SPY", "direction": "LONG"},
            "strat": {"tf1": "▲", "tf2": "▲", "tf3": "▼"},
            "timestamp": NOW - 1000
        });
        let s = crate::signal::normalize(&raw).unwrap();
        let result = run(&s, &Enrichment::default(), 0, false, &EngineConfig::default());
        assert_eq!(result.check(MEETS_MIN_CONFLUENCE), Some(true));
    }

    #[test]
    fn test_policy_checks_appended_when_configured() {
        let s = full_signal(6.0, NOW - 1000);
        let cfg = EngineConfig {
            allowed_tickers: vec!["QQQ".to_string()],
            allowed_timeframes: vec![15, 60],
            min_risk_reward: 2.0,
            ..Default::default()
        };
        let result = run(&s, &Enrichment::default(), 0, false, &cfg);
        assert_eq!(result.check(TICKER_ALLOWED), Some(false));
        assert_eq!(result.check(TIMEFRAME_ALLOWED), Some(true));
        // 3 / 2 = 1.5
        assert_eq!(result.check(MEETS_MIN_RISK_REWARD), Some(false));
        assert_eq!(result.failed_checks, vec![TICKER_ALLOWED.to_string(), MEETS_MIN_RISK_REWARD.to_string()]);
    }

    #[test]
    fn test_duplicate_result() {
        let result = ValidationResult::duplicate();
        assert!(!result.is_valid);
        assert_eq!(result.failed_checks, vec![NOT_DUPLICATE.to_string()]);
    }
}
