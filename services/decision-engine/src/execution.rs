//! Execution gate: turn an EXECUTE decision into one bracket order

use market_data::{BracketOrderRequest, Brokerage, EntryType, OrderSide};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::decision::{Decision, InstrumentType, TradeAction};
use crate::sizing::option_premium;

pub const SPREADS_NOT_SUPPORTED: &str = "multi-leg spread orders are not supported";

/// Outcome of a placement attempt. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<BracketOrderRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            executed: false,
            order_id: None,
            status: None,
            order: None,
            error: Some(error.into()),
        }
    }
}

/// Price rounded half away from zero to cents
pub fn to_cents(v: f64) -> Option<Decimal> {
    Decimal::from_f64(v).map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Bracket order for a stock or single-option decision
pub fn build_order(decision: &Decision, cfg: &EngineConfig) -> Result<BracketOrderRequest, String> {
    if decision.option_spread.is_some() {
        return Err(SPREADS_NOT_SUPPORTED.to_string());
    }
    if decision.quantity == 0 {
        return Err("quantity is 0".to_string());
    }

    match decision.instrument_type {
        InstrumentType::Stock => {
            let side = match decision.action {
                TradeAction::Buy => OrderSide::Buy,
                TradeAction::Sell => OrderSide::SellShort,
                TradeAction::Hold => return Err("HOLD decisions are not executable".to_string()),
            };
            let stop_loss = decision
                .stop_loss
                .and_then(to_cents)
                .ok_or("stop loss unavailable")?;
            let take_profit = decision
                .target1
                .and_then(to_cents)
                .ok_or("take profit unavailable")?;

            Ok(BracketOrderRequest {
                symbol: decision.symbol.clone(),
                side,
                quantity: decision.quantity,
                entry_type: EntryType::Market,
                limit_price: None,
                stop_loss,
                take_profit,
            })
        }
        InstrumentType::Call | InstrumentType::Put => {
            let contract = decision
                .option_contract
                .as_ref()
                .ok_or("option contract missing")?;
            let premium = option_premium(contract).ok_or("option premium unavailable")?;

            let limit = to_cents(premium).ok_or("invalid premium")?;
            let stop_loss = to_cents(premium * (1.0 - cfg.option_stop_pct / 100.0)).ok_or("invalid stop")?;
            let take_profit =
                to_cents(premium * (1.0 + cfg.option_take_profit_pct / 100.0)).ok_or("invalid take profit")?;

            Ok(BracketOrderRequest {
                symbol: contract.symbol.clone(),
                side: OrderSide::BuyToOpen,
                quantity: decision.quantity,
                entry_type: EntryType::Limit,
                limit_price: Some(limit),
                stop_loss,
                take_profit,
            })
        }
    }
}

/// Best-effort placement; brokerage errors come back as `executed: false`
pub async fn execute(decision: &Decision, brokerage: Option<&dyn Brokerage>, cfg: &EngineConfig) -> ExecutionResult {
    let Some(brokerage) = brokerage else {
        return ExecutionResult::failed("brokerage not configured");
    };

    let order = match build_order(decision, cfg) {
        Ok(order) => order,
        Err(e) => return ExecutionResult::failed(e),
    };

    match brokerage.place_bracket_order(&order).await {
        Ok(resp) => {
            info!(
                symbol = %order.symbol,
                side = order.side.as_str(),
                quantity = order.quantity,
                order_id = resp.id.as_deref().unwrap_or("-"),
                "Bracket order placed"
            );
            ExecutionResult {
                executed: true,
                order_id: resp.id,
                status: resp.status,
                order: Some(order),
                error: None,
            }
        }
        Err(e) => {
            error!(symbol = %order.symbol, error = %e, "Bracket order failed");
            ExecutionResult {
                order: Some(order),
                ..ExecutionResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Disposition;
    use crate::selector::{price_spread, OptionStructure};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use market_data::{Greeks, MarketDataError, OptionContract, OptionType, OrderResponse};
    use std::str::FromStr;
    use std::sync::Mutex;

    fn stock_decision(action: TradeAction) -> Decision {
        Decision {
            disposition: Disposition::Execute,
            action,
            instrument_type: InstrumentType::Stock,
            option_structure: None,
            symbol: "SPY".to_string(),
            quantity: 10,
            confidence: 70.0,
            risk_budget: 500.0,
            entry_price: Some(100.0),
            stop_loss: Some(98.0),
            target1: Some(104.0),
            target2: None,
            reasoning: vec![],
            option_contract: None,
            option_spread: None,
            option_legs: None,
        }
    }

    fn contract(strike: f64, bid: f64, ask: f64) -> OptionContract {
        OptionContract {
            symbol: "SPY250214C00100000".to_string(),
            underlying: Some("SPY".to_string()),
            strike,
            expiration: NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
            option_type: OptionType::Call,
            bid,
            ask,
            last: ask,
            volume: 100,
            open_interest: 100,
            greeks: Some(Greeks {
                delta: 0.5,
                ..Default::default()
            }),
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct RecordingBroker {
        orders: Mutex<Vec<BracketOrderRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl Brokerage for RecordingBroker {
        async fn place_bracket_order(&self, order: &BracketOrderRequest) -> market_data::Result<OrderResponse> {
            self.orders.lock().unwrap().push(order.clone());
            if self.fail {
                return Err(MarketDataError::Rejected("insufficient funds".to_string()));
            }
            Ok(OrderResponse {
                id: Some("123".to_string()),
                status: Some("ok".to_string()),
                raw: serde_json::Value::Null,
            })
        }
    }

    #[test]
    fn test_stock_order() {
        let order = build_order(&stock_decision(TradeAction::Sell), &EngineConfig::default()).unwrap();
        assert_eq!(order.side, OrderSide::SellShort);
        assert_eq!(order.entry_type, EntryType::Market);
        assert_eq!(order.limit_price, None);
        assert_eq!(order.quantity, 10);
        assert_eq!(order.take_profit, dec("104.00"));
        assert_eq!(order.stop_loss, dec("98.00"));
    }

    #[test]
    fn test_single_option_order() {
        let mut d = stock_decision(TradeAction::Buy);
        d.instrument_type = InstrumentType::Call;
        d.option_structure = Some(OptionStructure::Single);
        d.option_contract = Some(contract(100.0, 1.9, 2.0));
        let order = build_order(&d, &EngineConfig::default()).unwrap();
        assert_eq!(order.symbol, "SPY250214C00100000");
        assert_eq!(order.side, OrderSide::BuyToOpen);
        assert_eq!(order.entry_type, EntryType::Limit);
        assert_eq!(order.limit_price, Some(dec("2.00")));
        assert_eq!(order.stop_loss, dec("1.00"));
        assert_eq!(order.take_profit, dec("4.00"));
    }

    #[test]
    fn test_spread_not_supported() {
        let mut d = stock_decision(TradeAction::Buy);
        d.instrument_type = InstrumentType::Call;
        d.option_spread = price_spread(
            OptionStructure::CallDebitSpread,
            &contract(100.0, 1.15, 1.25),
            &contract(105.0, 0.38, 0.42),
        );
        assert!(d.option_spread.is_some());
        assert_eq!(build_order(&d, &EngineConfig::default()), Err(SPREADS_NOT_SUPPORTED.to_string()));
    }

    #[tokio::test]
    async fn test_execute_without_brokerage() {
        let result = execute(&stock_decision(TradeAction::Buy), None, &EngineConfig::default()).await;
        assert!(!result.executed);
        assert_eq!(result.error.as_deref(), Some("brokerage not configured"));
    }

    #[tokio::test]
    async fn test_execute_places_order() {
        let broker = RecordingBroker {
            orders: Mutex::new(vec![]),
            fail: false,
        };
        let result = execute(&stock_decision(TradeAction::Buy), Some(&broker), &EngineConfig::default()).await;
        assert!(result.executed);
        assert_eq!(result.order_id.as_deref(), Some("123"));
        assert_eq!(broker.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_reports_broker_failure() {
        let broker = RecordingBroker {
            orders: Mutex::new(vec![]),
            fail: true,
        };
        let result = execute(&stock_decision(TradeAction::Buy), Some(&broker), &EngineConfig::default()).await;
        assert!(!result.executed);
        assert!(result.error.unwrap().contains("insufficient funds"));
        assert!(result.order.is_some());
    }
}
