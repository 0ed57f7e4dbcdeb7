//! Technical, options and blended confidence scores

use market_data::{OptionContract, OptionType};
use serde::Serialize;

use crate::enrichment::Enrichment;
use crate::signal::{Direction, Signal};

/// Confidence weights: confluence, technical, options
pub const CONFLUENCE_WEIGHT: f64 = 0.5;
pub const TECHNICAL_WEIGHT: f64 = 0.3;
pub const OPTIONS_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scores {
    /// 0..=10
    pub technical_score: f64,
    /// 0..=10
    pub options_score: f64,
    /// Source-native confluence
    pub original_score: f64,
    pub original_max: f64,
    /// Unclamped blend
    pub final_score: f64,
    /// 0..=100
    pub confidence: f64,
}

/// Score a signal against one enrichment snapshot
pub fn score(signal: &Signal, enrichment: &Enrichment) -> Scores {
    let technical_score = technical_score(signal, enrichment);
    let options_score = options_score(signal.direction, enrichment);
    let final_score = blend(signal.confluence_ratio(), technical_score, options_score);

    Scores {
        technical_score,
        options_score,
        original_score: signal.confluence_score,
        original_max: signal.max_confluence,
        final_score,
        confidence: final_score.clamp(0.0, 100.0),
    }
}

/// Weighted 50/30/20 blend on a 0..=100 scale
pub fn blend(confluence_ratio: f64, technical_score: f64, options_score: f64) -> f64 {
    CONFLUENCE_WEIGHT * (confluence_ratio * 100.0)
        + TECHNICAL_WEIGHT * (technical_score / 10.0 * 100.0)
        + OPTIONS_WEIGHT * (options_score / 10.0 * 100.0)
}

/// Additive indicator rules; a missing indicator contributes nothing
pub fn technical_score(signal: &Signal, enrichment: &Enrichment) -> f64 {
    let Some(ind) = enrichment.indicators.as_ref() else {
        return 0.0;
    };
    let direction = signal.direction;
    let mut score = 0.0;

    if let Some(rsi) = ind.rsi {
        score += match direction {
            Direction::Long if (30.0..=50.0).contains(&rsi) => 2.0,
            Direction::Long if rsi > 50.0 && rsi <= 70.0 => 1.0,
            Direction::Short if (50.0..=70.0).contains(&rsi) => 2.0,
            Direction::Short if (30.0..50.0).contains(&rsi) => 1.0,
            _ => 0.0,
        };
    }

    if let Some(adx) = ind.adx {
        if adx > 25.0 {
            score += 2.0;
        } else if adx > 20.0 {
            score += 1.0;
        }
    }

    if let (Some(k), Some(d)) = (ind.stoch_k, ind.stoch_d) {
        score += match direction {
            Direction::Long if k < 30.0 && k > d => 2.0,
            Direction::Long if k < 50.0 => 1.0,
            Direction::Short if k > 70.0 && k < d => 2.0,
            Direction::Short if k > 50.0 => 1.0,
            _ => 0.0,
        };
    }

    let price = signal.close.or_else(|| enrichment.last_price()).or(signal.entry);
    if let (Some(upper), Some(lower), Some(price)) = (ind.bb_upper, ind.bb_lower, price) {
        let extreme = match direction {
            Direction::Long => price <= lower * 1.02,
            Direction::Short => price >= upper * 0.98,
        };
        if extreme {
            score += 2.0;
        }
    }

    f64::min(score, 10.0)
}

/// IV rank, put/call agreement and the best candidate's liquidity/greeks
pub fn options_score(direction: Direction, enrichment: &Enrichment) -> f64 {
    let mut score = 0.0;

    if let Some(iv_rank) = enrichment.derived.iv_rank {
        if iv_rank < 30.0 {
            score += 2.0;
        } else if iv_rank < 50.0 {
            score += 1.0;
        } else if iv_rank > 70.0 {
            score -= 1.0;
        }
    }

    if let Some(pcr) = enrichment.derived.put_call_ratio {
        match direction {
            Direction::Long if pcr > 1.2 => score += 2.0,
            Direction::Short if pcr < 0.8 => score += 2.0,
            _ => {}
        }
    }

    let wanted = option_type_for(direction);
    let best = enrichment
        .options()
        .iter()
        .filter(|o| o.option_type == wanted)
        .map(candidate_quality)
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
    score += best.unwrap_or(0.0);

    score.clamp(0.0, 10.0)
}

/// Calls for LONG, puts for SHORT
pub fn option_type_for(direction: Direction) -> OptionType {
    match direction {
        Direction::Long => OptionType::Call,
        Direction::Short => OptionType::Put,
    }
}

/// Liquidity + greeks sub-score of one contract (0..=6)
pub fn candidate_quality(o: &OptionContract) -> f64 {
    let mut s = 0.0;
    if o.volume > 100 {
        s += 1.0;
    }
    if o.open_interest > 1000 {
        s += 1.0;
    }
    s += spread_points(o.spread_ratio());
    s += delta_points(o.abs_delta());
    s
}

/// Bid/ask tightness: 2 under 5%, 1 under 10%
pub(crate) fn spread_points(spread_ratio: f64) -> f64 {
    if spread_ratio < 0.05 {
        2.0
    } else if spread_ratio < 0.10 {
        1.0
    } else {
        0.0
    }
}

/// Delta centering: 2 inside 0.4..=0.6, 1 inside 0.3..=0.7
pub(crate) fn delta_points(abs_delta: Option<f64>) -> f64 {
    match abs_delta {
        Some(d) if (0.4..=0.6).contains(&d) => 2.0,
        Some(d) if (0.3..=0.7).contains(&d) => 1.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::DerivedMetrics;
    use chrono::NaiveDate;
    use market_data::{Greeks, Indicators};
    use serde_json::json;

    fn signal(direction: Direction, score: f64, max: f64) -> Signal {
        let raw = json!({
            "signal": {"direction": direction.as_str(), "confluence_score": score, "max_confluence": max},
            "market": {"ticker": "SPY", "timestamp": 1},
            "price": {"close": 100.0}
        });
        crate::signal::normalize(&raw).unwrap()
    }

    fn call(volume: u64, oi: u64, bid: f64, ask: f64, delta: f64) -> OptionContract {
        OptionContract {
            symbol: "SPY_C".to_string(),
            underlying: None,
            strike: 100.0,
            expiration: NaiveDate::from_ymd_opt(2025, 2, 21).unwrap(),
            option_type: OptionType::Call,
            bid,
            ask,
            last: ask,
            volume,
            open_interest: oi,
            greeks: Some(Greeks { delta, ..Default::default() }),
        }
    }

    #[test]
    fn test_blend_scenario() {
        // 6/8 confluence, technical 7, options 5
        let c = blend(0.75, 7.0, 5.0);
        assert!((c - 68.5).abs() < 1e-9);
    }

    #[test]
    fn test_all_absent_enrichment_scores_zero() {
        let s = signal(Direction::Long, 6.0, 8.0);
        let scores = score(&s, &Enrichment::default());
        assert_eq!(scores.technical_score, 0.0);
        assert_eq!(scores.options_score, 0.0);
        assert!((scores.confidence - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_technical_score_long_full_marks() {
        let s = signal(Direction::Long, 6.0, 8.0);
        let enrichment = Enrichment {
            indicators: Some(Indicators {
                rsi: Some(40.0),
                adx: Some(30.0),
                stoch_k: Some(20.0),
                stoch_d: Some(15.0),
                bb_upper: Some(110.0),
                bb_lower: Some(99.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(technical_score(&s, &enrichment), 8.0);
    }

    #[test]
    fn test_technical_score_short_partial() {
        let s = signal(Direction::Short, 3.0, 8.0);
        let enrichment = Enrichment {
            indicators: Some(Indicators {
                rsi: Some(45.0),
                adx: Some(22.0),
                stoch_k: Some(60.0),
                stoch_d: Some(65.0),
                bb_upper: Some(120.0),
                bb_lower: Some(90.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        // rsi 1 + adx 1 + stoch 1 + bb 0
        assert_eq!(technical_score(&s, &enrichment), 3.0);
    }

    #[test]
    fn test_options_score_components() {
        let enrichment = Enrichment {
            options: Some(vec![call(500, 2000, 1.98, 2.0, 0.5), call(5, 5, 1.0, 2.0, 0.9)]),
            derived: DerivedMetrics {
                spread_pct: None,
                put_call_ratio: Some(1.5),
                iv_rank: Some(20.0),
            },
            ..Default::default()
        };
        // iv 2 + pcr 2 + best candidate 6 = 10
        assert_eq!(options_score(Direction::Long, &enrichment), 10.0);
    }

    #[test]
    fn test_options_score_never_negative() {
        let enrichment = Enrichment {
            derived: DerivedMetrics {
                iv_rank: Some(90.0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(options_score(Direction::Short, &enrichment), 0.0);
    }

    #[test]
    fn test_confidence_bounded_across_extremes() {
        let full_marks = Indicators {
            rsi: Some(40.0),
            adx: Some(30.0),
            stoch_k: Some(20.0),
            stoch_d: Some(15.0),
            bb_upper: Some(110.0),
            bb_lower: Some(99.0),
            ..Default::default()
        };
        let pinned = Indicators {
            rsi: Some(100.0),
            adx: Some(100.0),
            stoch_k: Some(100.0),
            stoch_d: Some(100.0),
            bb_upper: Some(0.0),
            bb_lower: Some(0.0),
            ..Default::default()
        };
        let rich_chain = Enrichment {
            indicators: Some(full_marks),
            options: Some(vec![call(500, 2000, 1.98, 2.0, 0.5)]),
            derived: DerivedMetrics {
                spread_pct: None,
                put_call_ratio: Some(1.5),
                iv_rank: Some(20.0),
            },
            ..Default::default()
        };
        let pinned_empty_chain = Enrichment {
            indicators: Some(pinned),
            options: Some(Vec::new()),
            derived: DerivedMetrics {
                iv_rank: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        };

        let cases = [
            (Direction::Long, 0.0, 8.0, Enrichment::default(), 0.0),
            (Direction::Long, 8.0, 8.0, Enrichment::default(), 50.0),
            (Direction::Long, 50.0, 8.0, Enrichment::default(), 50.0),
            (Direction::Long, 8.0, 8.0, rich_chain, 94.0),
            // adx 2 + stoch 1 + bb 2; iv rank 100 clamps options at 0
            (Direction::Short, 0.0, 10.0, pinned_empty_chain, 15.0),
        ];

        for (direction, confluence, max, enrichment, expected) in cases {
            let s = signal(direction, confluence, max);
            let scores = score(&s, &enrichment);
            assert!((0.0..=10.0).contains(&scores.technical_score));
            assert!((0.0..=10.0).contains(&scores.options_score));
            assert!((0.0..=100.0).contains(&scores.confidence));
            let blended = blend(s.confluence_ratio(), scores.technical_score, scores.options_score);
            assert!((scores.confidence - blended.clamp(0.0, 100.0)).abs() < 1e-9);
            assert!(
                (scores.confidence - expected).abs() < 1e-9,
                "{:?} {}/{}: {}",
                direction,
                confluence,
                max,
                scores.confidence
            );
        }
    }
}
