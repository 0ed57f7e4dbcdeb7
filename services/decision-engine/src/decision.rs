//! Disposition state machine and the reasoned `Decision`

use chrono::NaiveDate;
use market_data::{OptionContract, OptionType};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::enrichment::Enrichment;
use crate::scoring::Scores;
use crate::selector::{select_instrument, Instrument, OptionLeg, OptionSpread, OptionStructure, SelectionContext};
use crate::signal::{Direction, Signal};
use crate::sizing::{self, PlanSource, RiskPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Skip,
    Paper,
    Execute,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Skip => "SKIP",
            Disposition::Paper => "PAPER",
            Disposition::Execute => "EXECUTE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    Stock,
    Call,
    Put,
}

impl From<OptionType> for InstrumentType {
    fn from(t: OptionType) -> Self {
        match t {
            OptionType::Call => InstrumentType::Call,
            OptionType::Put => InstrumentType::Put,
        }
    }
}

/// Final verdict for one webhook. Not mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub disposition: Disposition,
    pub action: TradeAction,
    pub instrument_type: InstrumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_structure: Option<OptionStructure>,
    /// Ticker, or the option symbol for a single leg
    pub symbol: String,
    /// Shares or contracts
    pub quantity: u32,
    pub confidence: f64,
    pub risk_budget: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target1: Option<f64>,
    pub target2: Option<f64>,
    /// Ordered justification lines
    pub reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_contract: Option<OptionContract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_spread: Option<OptionSpread>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_legs: Option<Vec<OptionLeg>>,
}

impl Decision {
    /// SKIP for a webhook that lost its dedupe claim
    pub fn duplicate(signal: &Signal, original_id: &str) -> Self {
        Self {
            disposition: Disposition::Skip,
            action: TradeAction::Hold,
            instrument_type: InstrumentType::Stock,
            option_structure: None,
            symbol: signal.ticker.clone(),
            quantity: 0,
            confidence: 0.0,
            risk_budget: 0.0,
            entry_price: None,
            stop_loss: None,
            target1: None,
            target2: None,
            reasoning: vec![format!("Duplicate webhook (deduped). Original: {}", original_id)],
            option_contract: None,
            option_spread: None,
            option_legs: None,
        }
    }
}

/// Confidence thresholds, then the zero-quantity downgrade
pub fn resolve_disposition(confidence: f64, quantity: u32, cfg: &EngineConfig) -> Disposition {
    let by_score = if confidence < cfg.paper_threshold {
        Disposition::Skip
    } else if confidence < cfg.execute_threshold {
        Disposition::Paper
    } else {
        Disposition::Execute
    };

    match by_score {
        Disposition::Execute if quantity == 0 => Disposition::Paper,
        other => other,
    }
}

pub fn action_for(direction: Direction, disposition: Disposition) -> TradeAction {
    match (disposition, direction) {
        (Disposition::Skip, _) => TradeAction::Hold,
        (_, Direction::Long) => TradeAction::Buy,
        (_, Direction::Short) => TradeAction::Sell,
    }
}

/// Inputs shared with validation; one enrichment snapshot
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub signal: &'a Signal,
    pub enrichment: &'a Enrichment,
    pub scores: &'a Scores,
    pub plan: &'a RiskPlan,
    pub today: NaiveDate,
}

/// Select the instrument, size it and resolve the disposition
pub fn decide(input: &DecisionInput<'_>, cfg: &EngineConfig) -> Decision {
    let DecisionInput {
        signal,
        enrichment,
        scores,
        plan,
        today,
    } = *input;

    let ctx = SelectionContext {
        direction: signal.direction,
        price: plan.entry,
        atr: signal
            .atr
            .or_else(|| enrichment.indicators.as_ref().and_then(|i| i.atr)),
        iv_rank: enrichment.derived.iv_rank,
        today,
    };
    let instrument = select_instrument(enrichment.options(), &ctx, cfg);

    let budget = sizing::risk_budget(signal, enrichment.equity(), cfg);
    let buying_power = enrichment.buying_power();
    let quantity = match &instrument {
        Instrument::Stock => sizing::size_stock(plan, budget, buying_power, cfg),
        Instrument::Single(contract) => sizing::size_option(contract, plan, budget, buying_power, cfg),
        Instrument::Spread(spread) => sizing::size_spread(spread, budget, buying_power, cfg),
    };

    let disposition = resolve_disposition(scores.confidence, quantity, cfg);

    let mut reasoning = vec![
        format!("Original confluence: {}/{}", scores.original_score, scores.original_max),
        format!("Technical score: {:.1}/10", scores.technical_score),
        format!("Options score: {:.1}/10", scores.options_score),
    ];
    if let Some(spread_pct) = enrichment.derived.spread_pct {
        reasoning.push(format!("Spread: {:.2}%", spread_pct));
    }
    if let Some(pattern) = &signal.pattern {
        reasoning.push(format!("Pattern: {}", pattern));
    }
    if let Some(phase) = &signal.amd_phase {
        reasoning.push(format!("AMD: {}", phase));
    }
    reasoning.push(plan_note(plan, cfg));
    reasoning.push(instrument_note(&instrument, enrichment, cfg));
    reasoning.push(format!("Risk budget: ${:.2}, quantity {}", budget, quantity));
    if quantity == 0 && scores.confidence >= cfg.execute_threshold {
        reasoning.push("Sizing produced 0 units; EXECUTE downgraded to PAPER".to_string());
    }
    reasoning.push(format!("Confidence {:.1} -> {}", scores.confidence, disposition.as_str()));

    let mut decision = Decision {
        disposition,
        action: action_for(signal.direction, disposition),
        instrument_type: InstrumentType::Stock,
        option_structure: None,
        symbol: signal.ticker.clone(),
        quantity,
        confidence: scores.confidence,
        risk_budget: budget,
        entry_price: plan.entry,
        stop_loss: plan.stop_loss,
        target1: plan.target1,
        target2: plan.target2,
        reasoning,
        option_contract: None,
        option_spread: None,
        option_legs: None,
    };

    match instrument {
        Instrument::Stock => {}
        Instrument::Single(contract) => {
            decision.instrument_type = contract.option_type.into();
            decision.option_structure = Some(OptionStructure::Single);
            decision.symbol = contract.symbol.clone();
            decision.option_contract = Some(contract);
        }
        Instrument::Spread(mut spread) => {
            spread.long_leg.quantity = quantity;
            spread.short_leg.quantity = quantity;
            decision.instrument_type = spread.long_leg.option_type.into();
            decision.option_structure = Some(spread.structure);
            decision.option_legs = Some(vec![spread.long_leg.clone(), spread.short_leg.clone()]);
            decision.option_spread = Some(spread);
        }
    }

    decision
}

fn plan_note(plan: &RiskPlan, cfg: &EngineConfig) -> String {
    match plan.source {
        PlanSource::Signal => "Risk plan: signal levels".to_string(),
        PlanSource::SignalWithAtr => format!(
            "Risk plan: signal levels, missing levels ATR-derived (stop {}x, targets {}x/{}x)",
            cfg.atr_stop_multiplier, cfg.atr_target1_multiplier, cfg.atr_target2_multiplier
        ),
        PlanSource::Atr => format!(
            "Risk plan: ATR-derived (stop {}x, targets {}x/{}x)",
            cfg.atr_stop_multiplier, cfg.atr_target1_multiplier, cfg.atr_target2_multiplier
        ),
        PlanSource::Unavailable => "Risk plan: unavailable (no stop/targets or ATR)".to_string(),
    }
}

fn instrument_note(instrument: &Instrument, enrichment: &Enrichment, cfg: &EngineConfig) -> String {
    match instrument {
        Instrument::Stock if !cfg.options_enabled => "Instrument: stock (options disabled)".to_string(),
        Instrument::Stock if enrichment.options().is_empty() => "Instrument: stock (no option chain)".to_string(),
        Instrument::Stock => "Instrument: stock (no option candidate passed filters)".to_string(),
        Instrument::Single(c) => format!(
            "Instrument: {} {} strike {} exp {}",
            c.option_type.as_str(),
            c.symbol,
            c.strike,
            c.expiration
        ),
        Instrument::Spread(s) => {
            let net = match (s.estimated_debit, s.estimated_credit) {
                (Some(debit), _) => format!("debit {:.2}", debit),
                (None, Some(credit)) => format!("credit {:.2}", credit),
                _ => "unpriced".to_string(),
            };
            format!(
                "Instrument: {:?} {}/{} exp {}, {}",
                s.structure, s.long_leg.strike, s.short_leg.strike, s.expiration, net
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring;
    use crate::sizing::derive_risk_plan;
    use market_data::{Balances, Greeks};
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()
    }

    fn signal() -> Signal {
        let raw = json!({
            "signal": {"direction": "LONG", "confluence_score": 6, "max_confluence": 8},
            "market": {"ticker": "SPY", "timestamp": 1},
            "price": {"entry": 100.0, "close": 100.0},
            "risk_management": {"stop_loss": 98.0, "target_1": 104.0, "target_2": 108.0},
            "strat": {"patterns": {"detected_name": "2-1-2"}}
        });
        crate::signal::normalize(&raw).unwrap()
    }

    fn scores(confidence: f64) -> Scores {
        Scores {
            technical_score: 7.0,
            options_score: 5.0,
            original_score: 6.0,
            original_max: 8.0,
            final_score: confidence,
            confidence,
        }
    }

    fn call(strike: f64, bid: f64, ask: f64, delta: f64) -> OptionContract {
        OptionContract {
            symbol: format!("SPY250214C{:08}", (strike * 1000.0) as u64),
            underlying: Some("SPY".to_string()),
            strike,
            expiration: NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
            option_type: OptionType::Call,
            bid,
            ask,
            last: ask,
            volume: 500,
            open_interest: 2000,
            greeks: Some(Greeks {
                delta,
                gamma: Some(0.05),
                theta: Some(-0.05),
                mid_iv: Some(0.2),
                ..Default::default()
            }),
        }
    }

    fn run(enrichment: &Enrichment, confidence: f64, cfg: &EngineConfig) -> Decision {
        let s = signal();
        let sc = scores(confidence);
        let plan = derive_risk_plan(&s, enrichment, cfg);
        decide(
            &DecisionInput {
                signal: &s,
                enrichment,
                scores: &sc,
                plan: &plan,
                today: today(),
            },
            cfg,
        )
    }

    #[test]
    fn test_disposition_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(resolve_disposition(49.9, 10, &cfg), Disposition::Skip);
        assert_eq!(resolve_disposition(50.0, 10, &cfg), Disposition::Paper);
        assert_eq!(resolve_disposition(64.9, 10, &cfg), Disposition::Paper);
        assert_eq!(resolve_disposition(68.5, 10, &cfg), Disposition::Execute);
        assert_eq!(resolve_disposition(68.5, 0, &cfg), Disposition::Paper);
        assert_eq!(resolve_disposition(10.0, 0, &cfg), Disposition::Skip);
    }

    #[test]
    fn test_action_for() {
        assert_eq!(action_for(Direction::Long, Disposition::Execute), TradeAction::Buy);
        assert_eq!(action_for(Direction::Short, Disposition::Paper), TradeAction::Sell);
        assert_eq!(action_for(Direction::Short, Disposition::Skip), TradeAction::Hold);
    }

    #[test]
    fn test_stock_decision_without_chain() {
        let d = run(&Enrichment::default(), 68.5, &EngineConfig::default());
        assert_eq!(d.disposition, Disposition::Execute);
        assert_eq!(d.action, TradeAction::Buy);
        assert_eq!(d.instrument_type, InstrumentType::Stock);
        assert_eq!(d.symbol, "SPY");
        // flat 500 budget / 2 risk = 250, notional 10000 / 100 = 100
        assert_eq!(d.quantity, 100);
        assert_eq!(d.stop_loss, Some(98.0));
        assert_eq!(d.reasoning[0], "Original confluence: 6/8");
        assert_eq!(d.reasoning[1], "Technical score: 7.0/10");
        assert_eq!(d.reasoning[3], "Pattern: 2-1-2");
        assert!(d.reasoning.last().unwrap().ends_with("EXECUTE"));
    }

    #[test]
    fn test_zero_quantity_never_executes() {
        let enrichment = Enrichment {
            balances: Some(Balances {
                buying_power: Some(50.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let d = run(&enrichment, 90.0, &EngineConfig::default());
        assert_eq!(d.quantity, 0);
        assert_eq!(d.disposition, Disposition::Paper);
        assert!(d.reasoning.iter().any(|r| r.contains("downgraded")));
    }

    #[test]
    fn test_spread_decision_carries_legs() {
        let enrichment = Enrichment {
            options: Some(vec![call(100.0, 1.15, 1.25, 0.50), call(105.0, 0.38, 0.42, 0.30)]),
            ..Default::default()
        };
        let d = run(&enrichment, 70.0, &EngineConfig::default());
        assert_eq!(d.option_structure, Some(OptionStructure::CallDebitSpread));
        assert_eq!(d.instrument_type, InstrumentType::Call);
        let spread = d.option_spread.as_ref().unwrap();
        assert_eq!(spread.estimated_debit, Some(0.8));
        // 500 / 80 = 6, capped at 5
        assert_eq!(d.quantity, 5);
        let legs = d.option_legs.as_ref().unwrap();
        assert!(legs.iter().all(|l| l.quantity == 5));
    }

    #[test]
    fn test_single_leg_when_spreads_disabled() {
        let cfg = EngineConfig {
            spreads_enabled: false,
            ..Default::default()
        };
        let enrichment = Enrichment {
            options: Some(vec![call(100.0, 1.95, 2.0, 0.50)]),
            ..Default::default()
        };
        let d = run(&enrichment, 70.0, &cfg);
        assert_eq!(d.option_structure, Some(OptionStructure::Single));
        assert_eq!(d.symbol, "SPY250214C00100000");
        assert!(d.option_contract.is_some());
        assert!(d.quantity > 0);
    }

    #[test]
    fn test_duplicate_decision() {
        let d = Decision::duplicate(&signal(), "wh_abc");
        assert_eq!(d.disposition, Disposition::Skip);
        assert_eq!(d.action, TradeAction::Hold);
        assert_eq!(d.reasoning, vec!["Duplicate webhook (deduped). Original: wh_abc".to_string()]);
    }

    #[test]
    fn test_scored_all_absent_enrichment_skips() {
        let s = signal();
        let sc = scoring::score(&s, &Enrichment::default());
        let cfg = EngineConfig::default();
        assert_eq!(resolve_disposition(sc.confidence, 1, &cfg), Disposition::Skip);
    }
}
