//! Contract and vertical-spread selection from one chain snapshot

use chrono::NaiveDate;
use market_data::{Greeks, OptionContract, OptionType};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::scoring::{delta_points, option_type_for, spread_points};
use crate::signal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionStructure {
    Single,
    CallDebitSpread,
    PutDebitSpread,
    CallCreditSpread,
    PutCreditSpread,
}

impl OptionStructure {
    pub fn is_credit(&self) -> bool {
        matches!(self, OptionStructure::CallCreditSpread | OptionStructure::PutCreditSpread)
    }

    pub fn option_type(&self) -> Option<OptionType> {
        match self {
            OptionStructure::Single => None,
            OptionStructure::CallDebitSpread | OptionStructure::CallCreditSpread => Some(OptionType::Call),
            OptionStructure::PutDebitSpread | OptionStructure::PutCreditSpread => Some(OptionType::Put),
        }
    }

    /// Debit and credit spread for a direction, in that order
    fn spreads_for(direction: Direction) -> [OptionStructure; 2] {
        match direction {
            Direction::Long => [OptionStructure::CallDebitSpread, OptionStructure::PutCreditSpread],
            Direction::Short => [OptionStructure::PutDebitSpread, OptionStructure::CallCreditSpread],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    BuyToOpen,
    SellToOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionLeg {
    pub option_symbol: String,
    pub side: LegSide,
    /// Contracts
    pub quantity: u32,
    pub expiration: NaiveDate,
    pub strike: f64,
    pub option_type: OptionType,
    pub greeks: Option<Greeks>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

impl OptionLeg {
    fn from_contract(c: &OptionContract, side: LegSide) -> Self {
        Self {
            option_symbol: c.symbol.clone(),
            side,
            quantity: 1,
            expiration: c.expiration,
            strike: c.strike,
            option_type: c.option_type,
            greeks: c.greeks.clone(),
            bid: c.bid,
            ask: c.ask,
            last: c.last,
        }
    }
}

/// Two-leg vertical. Debit/credit are per spread in option price units;
/// max loss/profit are dollars per spread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSpread {
    pub structure: OptionStructure,
    pub expiration: NaiveDate,
    pub width: f64,
    pub estimated_debit: Option<f64>,
    pub estimated_credit: Option<f64>,
    pub estimated_max_loss: Option<f64>,
    pub estimated_max_profit: Option<f64>,
    pub long_leg: OptionLeg,
    pub short_leg: OptionLeg,
}

impl OptionSpread {
    pub fn legs(&self) -> [&OptionLeg; 2] {
        [&self.long_leg, &self.short_leg]
    }
}

/// Chosen instrument for a decision
#[derive(Debug, Clone, PartialEq)]
pub enum Instrument {
    Stock,
    Single(OptionContract),
    Spread(OptionSpread),
}

/// Selection inputs beyond the chain itself
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext {
    pub direction: Direction,
    /// Underlying reference price
    pub price: Option<f64>,
    pub atr: Option<f64>,
    pub iv_rank: Option<f64>,
    pub today: NaiveDate,
}

/// Spreads in IV-driven preference order, then a single leg, then stock
pub fn select_instrument(chain: &[OptionContract], ctx: &SelectionContext, cfg: &EngineConfig) -> Instrument {
    if !cfg.options_enabled || chain.is_empty() {
        return Instrument::Stock;
    }

    if cfg.spreads_enabled {
        for structure in structure_preference(ctx.direction, ctx.iv_rank, cfg) {
            if let Some(spread) = build_spread(chain, structure, ctx.today, cfg) {
                return Instrument::Spread(spread);
            }
        }
    }

    match select_single(chain, ctx, cfg) {
        Some(contract) => Instrument::Single(contract),
        None => Instrument::Stock,
    }
}

/// High IV rank prefers credit spreads first, otherwise debit first
pub fn structure_preference(direction: Direction, iv_rank: Option<f64>, cfg: &EngineConfig) -> [OptionStructure; 2] {
    let [debit, credit] = OptionStructure::spreads_for(direction);
    match iv_rank {
        Some(rank) if rank >= cfg.iv_rank_high_threshold => [credit, debit],
        _ => [debit, credit],
    }
}

/// Liquidity gates shared by single legs and spread legs
fn is_liquid(o: &OptionContract, today: NaiveDate, cfg: &EngineConfig) -> bool {
    let dte = o.days_to_expiration(today);
    dte >= cfg.min_dte
        && dte <= cfg.max_dte
        && o.volume >= cfg.min_option_volume
        && o.open_interest >= cfg.min_open_interest
        && o.ask > 0.0
        && o.spread_ratio() * 100.0 <= cfg.max_option_spread_pct
        && o.abs_delta().is_some()
        && o.implied_vol().map_or(true, |iv| iv <= cfg.max_implied_vol)
}

/// All single-leg filters: type, DTE, liquidity, spread, delta band, IV
pub fn passes_single_filters(o: &OptionContract, direction: Direction, today: NaiveDate, cfg: &EngineConfig) -> bool {
    o.option_type == option_type_for(direction)
        && is_liquid(o, today, cfg)
        && o
            .abs_delta()
            .map_or(false, |d| d >= cfg.min_delta && d <= cfg.max_delta)
}

/// Ranking score for a single-leg candidate
pub fn rank_single(o: &OptionContract, price: f64, atr_ref: f64, today: NaiveDate) -> f64 {
    let mut score = 0.0;

    let strike_diff = (o.strike - price).abs();
    if strike_diff < atr_ref * 0.5 {
        score += 3.0;
    } else if strike_diff < atr_ref {
        score += 2.0;
    } else if strike_diff < atr_ref * 1.5 {
        score += 1.0;
    }

    if o.volume > 100 {
        score += 2.0;
    }
    if o.open_interest > 500 {
        score += 2.0;
    }

    score += spread_points(o.spread_ratio());
    score += delta_points(o.abs_delta());

    if o.greeks.as_ref().and_then(|g| g.theta).map_or(false, |t| t > -0.10) {
        score += 1.0;
    }

    let dte = o.days_to_expiration(today);
    if (14..=30).contains(&dte) {
        score += 2.0;
    } else if (7..=45).contains(&dte) {
        score += 1.0;
    }

    score
}

/// Highest-ranked filtered contract; ties go to the earliest in chain order
pub fn select_single(chain: &[OptionContract], ctx: &SelectionContext, cfg: &EngineConfig) -> Option<OptionContract> {
    let price = ctx.price.filter(|p| *p > 0.0)?;
    let atr_ref = ctx.atr.filter(|a| *a > 0.0).unwrap_or(price * 0.005);

    let mut best: Option<(&OptionContract, f64)> = None;
    for o in chain.iter().filter(|o| passes_single_filters(o, ctx.direction, ctx.today, cfg)) {
        let s = rank_single(o, price, atr_ref, ctx.today);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((o, s));
        }
    }
    best.map(|(o, _)| o.clone())
}

/// Mid when the quote is two-sided, otherwise the ask
pub fn leg_price(o: &OptionContract) -> f64 {
    o.mid().unwrap_or(o.ask)
}

pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Build one vertical: a base leg near the structure's target delta, then
/// the further-OTM partner of the same expiration minimizing the weighted
/// (delta gap, width) distance.
pub fn build_spread(
    chain: &[OptionContract],
    structure: OptionStructure,
    today: NaiveDate,
    cfg: &EngineConfig,
) -> Option<OptionSpread> {
    let option_type = structure.option_type()?;
    let (base_target, partner_target) = if structure.is_credit() {
        (cfg.credit_short_delta, cfg.credit_long_delta)
    } else {
        (cfg.debit_long_delta, cfg.debit_short_delta)
    };

    let liquid: Vec<&OptionContract> = chain
        .iter()
        .filter(|o| o.option_type == option_type && is_liquid(o, today, cfg))
        .collect();

    let base = nearest_by(&liquid, |o| delta_gap(o, base_target))?;

    let further_otm = |o: &OptionContract| match option_type {
        OptionType::Call => o.strike > base.strike,
        OptionType::Put => o.strike < base.strike,
    };
    let partners: Vec<&OptionContract> = liquid
        .iter()
        .copied()
        .filter(|o| o.expiration == base.expiration && further_otm(*o))
        .filter(|o| (o.strike - base.strike).abs() <= cfg.max_spread_width)
        .collect();

    let partner = nearest_by(&partners, |o| {
        delta_gap(o, partner_target) * 10.0 + (o.strike - base.strike).abs() / cfg.max_spread_width
    })?;

    // Debit: buy the base, sell the partner. Credit: sell the base, buy the partner.
    let (long, short) = if structure.is_credit() {
        (partner, base)
    } else {
        (base, partner)
    };
    price_spread(structure, long, short)
}

/// Price a vertical from leg quotes; `None` unless 0 < net < width
pub fn price_spread(structure: OptionStructure, long: &OptionContract, short: &OptionContract) -> Option<OptionSpread> {
    let width = (long.strike - short.strike).abs();
    if !(width > 0.0) || long.expiration != short.expiration {
        return None;
    }

    let long_price = leg_price(long);
    let short_price = leg_price(short);

    let mut spread = OptionSpread {
        structure,
        expiration: long.expiration,
        width,
        estimated_debit: None,
        estimated_credit: None,
        estimated_max_loss: None,
        estimated_max_profit: None,
        long_leg: OptionLeg::from_contract(long, LegSide::BuyToOpen),
        short_leg: OptionLeg::from_contract(short, LegSide::SellToOpen),
    };

    if structure.is_credit() {
        let credit = round_cents(short_price - long_price);
        if !(credit > 0.0 && credit < width) {
            return None;
        }
        let max_profit = round_cents(credit * 100.0);
        spread.estimated_credit = Some(credit);
        spread.estimated_max_profit = Some(max_profit);
        spread.estimated_max_loss = Some(round_cents(width * 100.0 - max_profit));
    } else {
        let debit = round_cents(long_price - short_price);
        if !(debit > 0.0 && debit < width) {
            return None;
        }
        let max_loss = round_cents(debit * 100.0);
        spread.estimated_debit = Some(debit);
        spread.estimated_max_loss = Some(max_loss);
        spread.estimated_max_profit = Some(round_cents(width * 100.0 - max_loss));
    }

    Some(spread)
}

fn delta_gap(o: &OptionContract, target: f64) -> f64 {
    o.abs_delta().map_or(f64::INFINITY, |d| (d - target).abs())
}

/// Minimum by key; ties keep the first
fn nearest_by<'a>(items: &[&'a OptionContract], key: impl Fn(&OptionContract) -> f64) -> Option<&'a OptionContract> {
    let mut best: Option<(&'a OptionContract, f64)> = None;
    for &o in items {
        let k = key(o);
        if best.map_or(true, |(_, b)| k < b) {
            best = Some((o, k));
        }
    }
    best.map(|(o, _)| o)
}
