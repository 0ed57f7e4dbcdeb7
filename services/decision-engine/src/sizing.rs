//! Risk plan derivation and position sizing

use market_data::OptionContract;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::enrichment::Enrichment;
use crate::selector::OptionSpread;
use crate::signal::{QualityLabel, Signal};

/// Where the stop/targets came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Signal,
    /// Signal levels with the missing ones filled from ATR
    SignalWithAtr,
    Atr,
    Unavailable,
}

/// Entry, stop and targets on the underlying
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskPlan {
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target1: Option<f64>,
    pub target2: Option<f64>,
    pub source: PlanSource,
}

impl RiskPlan {
    /// Underlying move from entry to stop
    pub fn risk_per_share(&self) -> Option<f64> {
        match (self.entry, self.stop_loss) {
            (Some(entry), Some(stop)) => Some((entry - stop).abs()).filter(|r| *r > 0.0),
            _ => None,
        }
    }

    /// Reward to target1 over risk to stop
    pub fn risk_reward(&self) -> Option<f64> {
        let risk = self.risk_per_share()?;
        let reward = (self.target1? - self.entry?).abs();
        Some(reward / risk)
    }
}

/// Signal levels where present; missing levels are ATR multiples around entry
pub fn derive_risk_plan(signal: &Signal, enrichment: &Enrichment, cfg: &EngineConfig) -> RiskPlan {
    let entry = signal.entry.or_else(|| enrichment.last_price());

    if let (Some(stop), Some(target1)) = (signal.stop_loss, signal.target1) {
        return RiskPlan {
            entry,
            stop_loss: Some(stop),
            target1: Some(target1),
            target2: signal.target2.or(Some(target1)),
            source: PlanSource::Signal,
        };
    }

    let atr = signal
        .atr
        .or_else(|| enrichment.indicators.as_ref().and_then(|i| i.atr))
        .filter(|a| *a > 0.0);

    match (entry, atr) {
        (Some(entry), Some(atr)) => {
            let sign = signal.direction.sign();
            let source = if signal.stop_loss.is_some() || signal.target1.is_some() {
                PlanSource::SignalWithAtr
            } else {
                PlanSource::Atr
            };
            RiskPlan {
                entry: Some(entry),
                stop_loss: signal
                    .stop_loss
                    .or(Some(entry - sign * cfg.atr_stop_multiplier * atr)),
                target1: signal
                    .target1
                    .or(Some(entry + sign * cfg.atr_target1_multiplier * atr)),
                target2: signal
                    .target2
                    .or(Some(entry + sign * cfg.atr_target2_multiplier * atr)),
                source,
            }
        }
        _ => RiskPlan {
            entry,
            stop_loss: signal.stop_loss,
            target1: signal.target1,
            target2: signal.target2,
            source: PlanSource::Unavailable,
        },
    }
}

/// Dollar risk budget: tiered percent of equity, flat fallback without equity
pub fn risk_budget(signal: &Signal, equity: Option<f64>, cfg: &EngineConfig) -> f64 {
    let pct = match signal.quality {
        QualityLabel::Legendary => cfg.risk_pct_legendary,
        QualityLabel::Mega => cfg.risk_pct_mega,
        QualityLabel::High => cfg.risk_pct_high,
        QualityLabel::Standard => cfg.risk_pct_standard,
    };
    let budget = match equity.filter(|e| *e > 0.0) {
        Some(equity) => equity * pct / 100.0,
        None => cfg.max_risk_per_trade,
    };
    budget * cfg.risk_multiplier
}

fn floor_count(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.floor().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Shares: min of risk, notional and buying-power limits
pub fn size_stock(plan: &RiskPlan, budget: f64, buying_power: Option<f64>, cfg: &EngineConfig) -> u32 {
    let Some(entry) = plan.entry.filter(|e| *e > 0.0) else {
        return 0;
    };

    let from_risk = plan
        .risk_per_share()
        .map_or(1, |risk| floor_count(budget / risk));
    let from_notional = floor_count(cfg.max_position_notional / entry);
    let from_power = buying_power.map_or(u32::MAX, |bp| floor_count(bp / entry));

    from_risk.min(from_notional).min(from_power)
}

/// Premium paid per contract in option price units
pub fn option_premium(contract: &OptionContract) -> Option<f64> {
    [contract.ask, contract.mid().unwrap_or(0.0), contract.last]
        .into_iter()
        .find(|p| p.is_finite() && *p > 0.0)
}

/// Per-contract loss if the underlying reaches the stop:
/// min(premium x 100, |delta| x 100 x move + 0.5 x |gamma| x 100 x move^2)
pub fn option_loss_estimate(contract: &OptionContract, premium: f64, underlying_move: Option<f64>) -> f64 {
    let full_premium = premium * 100.0;
    let (Some(mv), Some(greeks)) = (underlying_move, contract.greeks.as_ref()) else {
        return full_premium;
    };

    let delta_component = greeks.delta.abs() * 100.0 * mv;
    let gamma_component = 0.5 * greeks.gamma.unwrap_or(0.0).abs() * 100.0 * mv * mv;
    let estimate = delta_component + gamma_component;

    if estimate > 0.0 {
        full_premium.min(estimate)
    } else {
        full_premium
    }
}

/// Contracts: min of risk, buying-power and hard-cap limits
pub fn size_option(
    contract: &OptionContract,
    plan: &RiskPlan,
    budget: f64,
    buying_power: Option<f64>,
    cfg: &EngineConfig,
) -> u32 {
    let Some(premium) = option_premium(contract) else {
        return 0;
    };

    let loss = option_loss_estimate(contract, premium, plan.risk_per_share());
    let from_risk = floor_count(budget / loss);
    let from_power = buying_power.map_or(u32::MAX, |bp| floor_count(bp / (premium * 100.0)));

    from_risk.min(from_power).min(cfg.max_option_contracts)
}

/// Spreads: min of risk, buying-power and hard-cap limits on max loss
pub fn size_spread(spread: &OptionSpread, budget: f64, buying_power: Option<f64>, cfg: &EngineConfig) -> u32 {
    let Some(max_loss) = spread.estimated_max_loss.filter(|l| *l > 0.0) else {
        return 0;
    };

    let from_risk = floor_count(budget / max_loss);
    let from_power = buying_power.map_or(u32::MAX, |bp| floor_count(bp / max_loss));

    from_risk.min(from_power).min(cfg.max_spread_contracts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{price_spread, OptionStructure};
    use chrono::NaiveDate;
    use market_data::{Greeks, Indicators, OptionType};
    use serde_json::json;

    fn signal(extra_rm: serde_json::Value, legendary: bool) -> Signal {
        let raw = json!({
            "signal": {"direction": "LONG", "confluence_score": 6, "max_confluence": 8, "is_legendary": legendary},
            "market": {"ticker": "SPY", "timestamp": 1},
            "price": {"entry": 100.0, "close": 100.0},
            "risk_management": extra_rm
        });
        crate::signal::normalize(&raw).unwrap()
    }

    fn contract(strike: f64, bid: f64, ask: f64, delta: f64, gamma: Option<f64>) -> OptionContract {
        OptionContract {
            symbol: format!("SPY_C{strike}"),
            underlying: None,
            strike,
            expiration: NaiveDate::from_ymd_opt(2025, 2, 21).unwrap(),
            option_type: OptionType::Call,
            bid,
            ask,
            last: ask,
            volume: 100,
            open_interest: 1000,
            greeks: Some(Greeks { delta, gamma, ..Default::default() }),
        }
    }

    #[test]
    fn test_risk_plan_from_signal() {
        let s = signal(json!({"stop_loss": 98.0, "target_1": 104.0}), false);
        let plan = derive_risk_plan(&s, &Enrichment::default(), &EngineConfig::default());
        assert_eq!(plan.source, PlanSource::Signal);
        assert_eq!(plan.target2, Some(104.0));
        assert_eq!(plan.risk_reward(), Some(2.0));
    }

    #[test]
    fn test_risk_plan_from_indicator_atr() {
        let s = signal(json!({}), false);
        let enrichment = Enrichment {
            indicators: Some(Indicators { atr: Some(2.0), ..Default::default() }),
            ..Default::default()
        };
        let plan = derive_risk_plan(&s, &enrichment, &EngineConfig::default());
        assert_eq!(plan.source, PlanSource::Atr);
        assert_eq!(plan.stop_loss, Some(97.0));
        assert_eq!(plan.target1, Some(104.0));
        assert_eq!(plan.target2, Some(106.0));
    }

    #[test]
    fn test_risk_plan_keeps_signal_stop_without_target() {
        let raw = json!({
            "signal": {"direction": "LONG", "confluence_score": 6, "max_confluence": 8},
            "market": {"ticker": "SPY", "timestamp": 1},
            "price": {"entry": 100.0, "close": 100.0},
            "levels": {"atr": 2.0},
            "risk_management": {"stop_loss": 98.0}
        });
        let s = crate::signal::normalize(&raw).unwrap();
        let plan = derive_risk_plan(&s, &Enrichment::default(), &EngineConfig::default());
        assert_eq!(plan.source, PlanSource::SignalWithAtr);
        assert_eq!(plan.stop_loss, Some(98.0));
        assert_eq!(plan.target1, Some(104.0));
        assert_eq!(plan.target2, Some(106.0));
        assert_eq!(plan.risk_per_share(), Some(2.0));
        assert_eq!(plan.risk_reward(), Some(2.0));
    }

    #[test]
    fn test_risk_plan_keeps_signal_targets_without_stop() {
        let s = signal(json!({"target_1": 105.0, "target_2": 110.0}), false);
        let enrichment = Enrichment {
            indicators: Some(Indicators { atr: Some(2.0), ..Default::default() }),
            ..Default::default()
        };
        let plan = derive_risk_plan(&s, &enrichment, &EngineConfig::default());
        assert_eq!(plan.source, PlanSource::SignalWithAtr);
        assert_eq!(plan.stop_loss, Some(97.0));
        assert_eq!(plan.target1, Some(105.0));
        assert_eq!(plan.target2, Some(110.0));
    }

    #[test]
    fn test_partial_plan_without_atr_is_unavailable() {
        let s = signal(json!({"stop_loss": 98.0}), false);
        let plan = derive_risk_plan(&s, &Enrichment::default(), &EngineConfig::default());
        assert_eq!(plan.source, PlanSource::Unavailable);
        assert_eq!(plan.stop_loss, Some(98.0));
        assert_eq!(plan.target1, None);
        assert_eq!(plan.risk_reward(), None);
        // the signal's stop still bounds stock size: 500 / 2 = 250, notional 100
        assert_eq!(size_stock(&plan, 500.0, None, &EngineConfig::default()), 100);
        assert_eq!(size_stock(&plan, 100.0, None, &EngineConfig::default()), 50);
    }

    #[test]
    fn test_risk_budget_tiers() {
        let cfg = EngineConfig::default();
        let legendary = signal(json!({}), true);
        let standard = signal(json!({}), false);
        assert_eq!(risk_budget(&legendary, Some(50_000.0), &cfg), 1000.0);
        assert_eq!(risk_budget(&standard, Some(50_000.0), &cfg), 250.0);
        assert_eq!(risk_budget(&standard, None, &cfg), cfg.max_risk_per_trade);
    }

    #[test]
    fn test_risk_budget_scaled_by_multiplier() {
        let cfg = EngineConfig {
            risk_multiplier: 0.5,
            ..Default::default()
        };
        let standard = signal(json!({}), false);
        assert_eq!(risk_budget(&standard, Some(50_000.0), &cfg), 125.0);
        assert_eq!(risk_budget(&standard, None, &cfg), cfg.max_risk_per_trade * 0.5);
    }

    #[test]
    fn test_size_stock_takes_tightest_limit() {
        let cfg = EngineConfig::default();
        let plan = RiskPlan {
            entry: Some(100.0),
            stop_loss: Some(98.0),
            target1: None,
            target2: None,
            source: PlanSource::Signal,
        };
        // risk: 500/2 = 250, notional: 10000/100 = 100, power: 5000/100 = 50
        assert_eq!(size_stock(&plan, 500.0, Some(5000.0), &cfg), 50);
        assert_eq!(size_stock(&plan, 500.0, None, &cfg), 100);
        assert_eq!(size_stock(&plan, 100.0, None, &cfg), 50);
    }

    #[test]
    fn test_size_stock_without_stop_uses_one() {
        let cfg = EngineConfig::default();
        let plan = RiskPlan {
            entry: Some(100.0),
            stop_loss: None,
            target1: None,
            target2: None,
            source: PlanSource::Unavailable,
        };
        assert_eq!(size_stock(&plan, 500.0, None, &cfg), 1);
        let no_entry = RiskPlan { entry: None, ..plan };
        assert_eq!(size_stock(&no_entry, 500.0, None, &cfg), 0);
    }

    #[test]
    fn test_option_loss_estimate_caps_at_premium() {
        let c = contract(100.0, 1.9, 2.0, 0.5, Some(0.05));
        // move 2: delta 0.5*100*2 = 100, gamma 0.5*0.05*100*4 = 10
        assert!((option_loss_estimate(&c, 2.0, Some(2.0)) - 110.0).abs() < 1e-9);
        // move 10 exceeds the premium
        assert_eq!(option_loss_estimate(&c, 2.0, Some(10.0)), 200.0);
        assert_eq!(option_loss_estimate(&c, 2.0, None), 200.0);
    }

    #[test]
    fn test_size_option_caps() {
        let cfg = EngineConfig::default();
        let c = contract(100.0, 1.9, 2.0, 0.5, Some(0.05));
        let plan = RiskPlan {
            entry: Some(100.0),
            stop_loss: Some(98.0),
            target1: None,
            target2: None,
            source: PlanSource::Signal,
        };
        // 500 / 110 = 4
        assert_eq!(size_option(&c, &plan, 500.0, None, &cfg), 4);
        // power 500 / 200 = 2
        assert_eq!(size_option(&c, &plan, 500.0, Some(500.0), &cfg), 2);
        // hard cap
        assert_eq!(size_option(&c, &plan, 100_000.0, None, &cfg), cfg.max_option_contracts);
        // budget below one contract
        assert_eq!(size_option(&c, &plan, 50.0, None, &cfg), 0);
    }

    #[test]
    fn test_size_spread() {
        let cfg = EngineConfig::default();
        let long = contract(100.0, 1.15, 1.25, 0.5, None);
        let short = contract(105.0, 0.38, 0.42, 0.3, None);
        let spread = price_spread(OptionStructure::CallDebitSpread, &long, &short).unwrap();
        // max loss 80: 500 / 80 = 6, capped at 5
        assert_eq!(size_spread(&spread, 500.0, None, &cfg), 5);
        assert_eq!(size_spread(&spread, 200.0, None, &cfg), 2);
        assert_eq!(size_spread(&spread, 500.0, Some(100.0), &cfg), 1);
    }
}
