//! Wyckoff-phase behavioral scoring, softmax normalization, and evidence
//! generation (C4, spec.md §4.4).

use crate::features::is_high_effort_low_result;
use crate::features::Features;
use crate::types::{
    Bar, Behavior, BehaviorPhase, Direction, Evidence, EvidenceType, MarketState, Regime, Severity,
    Signal, SignalType, Zone, Zones,
};
use std::collections::HashMap;

fn is_near_zone(price: f64, zones: &[Zone], threshold: f64) -> bool {
    zones.iter().any(|z| (price - z.mid()).abs() <= z.width() * threshold)
}

fn nearest_zone(price: f64, zones: &[Zone], threshold: f64) -> Option<&Zone> {
    zones
        .iter()
        .filter(|z| (price - z.mid()).abs() <= z.width() * threshold)
        .min_by(|a, b| {
            (price - a.mid())
                .abs()
                .partial_cmp(&(price - b.mid()).abs())
                .unwrap()
        })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn window(values: &[f64], lookback: usize) -> &[f64] {
    let start = values.len().saturating_sub(lookback);
    &values[start..]
}

/// accumulation scorer — lookback of 20 bars near support zones.
pub fn score_accumulation(bars: &[Bar], features: &Features, zones: &Zones, lookback: usize) -> f64 {
    if zones.support.is_empty() {
        return 0.0;
    }
    let n = bars.len();
    let current_price = bars[n - 1].close;
    let start = n.saturating_sub(lookback);

    let mut score = 0.0;
    if is_near_zone(current_price, &zones.support, 0.5) {
        score += 0.25;
    }

    let mut near_with_volume = 0u32;
    let mut near_with_absorption = 0u32;
    for i in start..n {
        let near = is_near_zone(bars[i].close, &zones.support, 0.5);
        if !near {
            continue;
        }
        if !features.rvol[i].is_nan() && features.rvol[i] >= 1.5 {
            near_with_volume += 1;
        }
        if is_high_effort_low_result(features.effort[i], features.result[i]) {
            near_with_absorption += 1;
        }
    }
    if near_with_volume >= 2 {
        score += 0.20;
    }
    if near_with_absorption >= 1 {
        score += 0.25;
    }

    let down_window = window(&features.down_eff, lookback);
    if mean(down_window) < mean(&features.down_eff) * 0.7 {
        score += 0.15;
    }
    if mean(window(&features.wick_lower, lookback)) > 0.3 {
        score += 0.15;
    }

    score
}

/// shakeout scorer — lookback of 10 bars, scans for a sweep-and-reclaim at
/// each support zone.
pub fn score_shakeout(bars: &[Bar], features: &Features, zones: &Zones, lookback: usize) -> f64 {
    let n = bars.len();
    let start = n.saturating_sub(lookback);

    for zone in &zones.support {
        for i in start..n {
            if bars[i].low >= zone.low {
                continue;
            }
            // same-bar reclaim
            if bars[i].close >= zone.low {
                let mut score = 0.35;
                if features.wick_lower[i] > 0.4 {
                    score += 0.2;
                }
                if !features.rvol[i].is_nan() && features.rvol[i] >= 1.5 {
                    score += 0.2;
                }
                if is_high_effort_low_result(features.effort[i], features.result[i]) {
                    score += 0.1;
                }
                return score;
            }
            // reclaim within the next 3 bars
            for j in (i + 1)..=(i + 3).min(n - 1) {
                if bars[j].close >= zone.low {
                    let mut score = 0.35;
                    if j - i <= 2 {
                        score += 0.15;
                    }
                    if features.wick_lower[i] > 0.3 {
                        score += 0.2;
                    }
                    if !features.rvol[i].is_nan() && features.rvol[i] >= 1.5 {
                        score += 0.2;
                    }
                    return score;
                }
            }
        }
    }
    0.0
}

/// markup scorer — continuation strength in an uptrend.
pub fn score_markup(bars: &[Bar], features: &Features, market_state: &MarketState, signals: &[Signal], lookback: usize) -> f64 {
    let n = bars.len();
    let start = n.saturating_sub(lookback);

    let mut score = 0.0;
    if signals
        .iter()
        .any(|s| s.kind == SignalType::BreakoutConfirmed && s.direction == Direction::Up)
    {
        score += 0.35;
    }
    if market_state.regime == Regime::Uptrend {
        score += 0.2 * market_state.confidence;
    }

    let mut pullback_rvol = Vec::new();
    let mut advance_rvol = Vec::new();
    for i in (start.max(1))..n {
        let rv = features.rvol[i];
        if rv.is_nan() {
            continue;
        }
        if bars[i].close < bars[i - 1].close {
            pullback_rvol.push(rv);
        } else {
            advance_rvol.push(rv);
        }
    }
    if !pullback_rvol.is_empty() && !advance_rvol.is_empty() && mean(&pullback_rvol) < 0.8 * mean(&advance_rvol) {
        score += 0.2;
    }

    score += 0.25 * (mean(window(&features.up_eff, lookback)) * 1000.0).min(1.0);
    score
}

/// distribution scorer — symmetric to accumulation at resistance zones.
pub fn score_distribution(bars: &[Bar], features: &Features, zones: &Zones, lookback: usize) -> f64 {
    if zones.resistance.is_empty() {
        return 0.0;
    }
    let n = bars.len();
    let current_price = bars[n - 1].close;
    let start = n.saturating_sub(lookback);

    let mut score = 0.0;
    if is_near_zone(current_price, &zones.resistance, 0.5) {
        score += 0.25;
    }

    let mut near_with_volume = 0u32;
    let mut near_with_absorption = 0u32;
    for i in start..n {
        let near = is_near_zone(bars[i].close, &zones.resistance, 0.5);
        if !near {
            continue;
        }
        if !features.rvol[i].is_nan() && features.rvol[i] >= 1.5 {
            near_with_volume += 1;
        }
        if is_high_effort_low_result(features.effort[i], features.result[i]) {
            near_with_absorption += 1;
        }
    }
    if near_with_volume >= 2 {
        score += 0.20;
    }
    if near_with_absorption >= 1 {
        score += 0.25;
    }

    let up_window = window(&features.up_eff, lookback);
    if mean(up_window) < mean(&features.up_eff) * 0.7 {
        score += 0.15;
    }
    if mean(window(&features.wick_upper, lookback)) > 0.3 {
        score += 0.15;
    }

    score
}

/// markdown scorer — symmetric to markup for down-breakouts/downtrend.
pub fn score_markdown(bars: &[Bar], features: &Features, market_state: &MarketState, signals: &[Signal], lookback: usize) -> f64 {
    let n = bars.len();
    let start = n.saturating_sub(lookback);

    let mut score = 0.0;
    if signals
        .iter()
        .any(|s| s.kind == SignalType::BreakoutConfirmed && s.direction == Direction::Down)
    {
        score += 0.35;
    }
    if market_state.regime == Regime::Downtrend {
        score += 0.2 * market_state.confidence;
    }

    let mut bounce_rvol = Vec::new();
    let mut decline_rvol = Vec::new();
    for i in (start.max(1))..n {
        let rv = features.rvol[i];
        if rv.is_nan() {
            continue;
        }
        if bars[i].close > bars[i - 1].close {
            bounce_rvol.push(rv);
        } else {
            decline_rvol.push(rv);
        }
    }
    if !bounce_rvol.is_empty() && !decline_rvol.is_empty() && mean(&bounce_rvol) < 0.8 * mean(&decline_rvol) {
        score += 0.2;
    }

    score += 0.25 * (mean(window(&features.down_eff, lookback)) * 1000.0).min(1.0);
    score
}

/// Numerically-stable softmax over the 5 raw phase scores.
pub fn scores_to_probabilities(scores: &HashMap<BehaviorPhase, f64>) -> HashMap<BehaviorPhase, f64> {
    if scores.is_empty() {
        return BehaviorPhase::ALL.iter().map(|p| (*p, 0.2)).collect();
    }
    let max = scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: HashMap<BehaviorPhase, f64> = scores.iter().map(|(k, v)| (*k, (v - max).exp())).collect();
    let sum: f64 = exps.values().sum();
    exps.into_iter().map(|(k, v)| (k, v / sum)).collect()
}

fn severity_of(rvol: f64, wick_ratio: f64) -> Severity {
    if (!rvol.is_nan() && rvol >= 2.0) || wick_ratio >= 0.5 {
        Severity::High
    } else if (!rvol.is_nan() && rvol >= 1.5) || wick_ratio >= 0.3 {
        Severity::Med
    } else {
        Severity::Low
    }
}

fn make_metrics(rvol: f64, wick_ratio: f64, effort: f64, result: f64) -> HashMap<String, f64> {
    let mut m = HashMap::new();
    if !rvol.is_nan() {
        m.insert("rvol".to_string(), rvol);
    }
    m.insert("wick_ratio".to_string(), wick_ratio);
    if !effort.is_nan() {
        m.insert("effort".to_string(), effort);
    }
    if !result.is_nan() {
        m.insert("result".to_string(), result);
    }
    m
}

/// Generate up to 3 evidence items for the dominant phase, anchored on the
/// current (last) bar and nearest relevant zone.
pub fn generate_evidence(bars: &[Bar], dominant: BehaviorPhase, features: &Features, zones: &Zones) -> Vec<Evidence> {
    let i = bars.len() - 1;
    let bar = &bars[i];
    let rvol = features.rvol[i];
    let effort = features.effort[i];
    let result = features.result[i];
    let wick_upper = features.wick_upper[i];
    let wick_lower = features.wick_lower[i];
    let absorption = is_high_effort_low_result(effort, result);

    let mut evidence = Vec::new();

    match dominant {
        BehaviorPhase::Accumulation => {
            if absorption {
                evidence.push(Evidence {
                    kind: EvidenceType::Absorption,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_lower),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_lower, effort, result),
                    note: "evidence.accumulation.absorption".to_string(),
                });
            }
            if !rvol.is_nan() && rvol >= 1.5 {
                evidence.push(Evidence {
                    kind: EvidenceType::VolumeSpike,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_lower),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_lower, f64::NAN, f64::NAN),
                    note: "evidence.accumulation.volume_spike".to_string(),
                });
            }
            if wick_lower > 0.3 {
                evidence.push(Evidence {
                    kind: EvidenceType::Rejection,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_lower),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_lower, f64::NAN, f64::NAN),
                    note: "evidence.accumulation.lower_wick_rejection".to_string(),
                });
            }
            if let Some(_zone) = nearest_zone(bar.close, &zones.support, 0.5) {
                if evidence.is_empty() {
                    evidence.push(Evidence {
                        kind: EvidenceType::Rejection,
                        behavior: dominant,
                        severity: Severity::Low,
                        bar_time: bar.timestamp,
                        bar_index: i as i64,
                        metrics: make_metrics(rvol, wick_lower, f64::NAN, f64::NAN),
                        note: "evidence.accumulation.near_support".to_string(),
                    });
                }
            }
        }
        BehaviorPhase::Shakeout => {
            evidence.push(Evidence {
                kind: EvidenceType::Sweep,
                behavior: dominant,
                severity: severity_of(rvol, wick_lower),
                bar_time: bar.timestamp,
                bar_index: i as i64,
                metrics: make_metrics(rvol, wick_lower, effort, result),
                note: "evidence.shakeout.sweep_and_reclaim".to_string(),
            });
            if !rvol.is_nan() && rvol >= 1.5 {
                evidence.push(Evidence {
                    kind: EvidenceType::VolumeSpike,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_lower),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_lower, f64::NAN, f64::NAN),
                    note: "evidence.shakeout.volume_spike".to_string(),
                });
            }
        }
        BehaviorPhase::Markup => {
            evidence.push(Evidence {
                kind: EvidenceType::Breakout,
                behavior: dominant,
                severity: severity_of(rvol, 0.0),
                bar_time: bar.timestamp,
                bar_index: i as i64,
                metrics: make_metrics(rvol, 0.0, effort, result),
                note: "evidence.markup.uptrend_continuation".to_string(),
            });
            if !rvol.is_nan() && rvol >= 1.5 {
                evidence.push(Evidence {
                    kind: EvidenceType::VolumeSpike,
                    behavior: dominant,
                    severity: severity_of(rvol, 0.0),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, 0.0, f64::NAN, f64::NAN),
                    note: "evidence.markup.volume_confirmation".to_string(),
                });
            }
        }
        BehaviorPhase::Distribution => {
            if absorption {
                evidence.push(Evidence {
                    kind: EvidenceType::Absorption,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_upper),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_upper, effort, result),
                    note: "evidence.distribution.absorption".to_string(),
                });
            }
            if wick_upper > 0.3 {
                evidence.push(Evidence {
                    kind: EvidenceType::Rejection,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_upper),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_upper, f64::NAN, f64::NAN),
                    note: "evidence.distribution.rejection_wick".to_string(),
                });
            }
            if !rvol.is_nan() && rvol >= 1.5 {
                evidence.push(Evidence {
                    kind: EvidenceType::VolumeSpike,
                    behavior: dominant,
                    severity: severity_of(rvol, wick_upper),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, wick_upper, f64::NAN, f64::NAN),
                    note: "evidence.distribution.volume_spike".to_string(),
                });
            }
        }
        BehaviorPhase::Markdown => {
            evidence.push(Evidence {
                kind: EvidenceType::Breakout,
                behavior: dominant,
                severity: severity_of(rvol, 0.0),
                bar_time: bar.timestamp,
                bar_index: i as i64,
                metrics: make_metrics(rvol, 0.0, effort, result),
                note: "evidence.markdown.downtrend_continuation".to_string(),
            });
            if !rvol.is_nan() && rvol >= 1.5 {
                evidence.push(Evidence {
                    kind: EvidenceType::VolumeSpike,
                    behavior: dominant,
                    severity: severity_of(rvol, 0.0),
                    bar_time: bar.timestamp,
                    bar_index: i as i64,
                    metrics: make_metrics(rvol, 0.0, f64::NAN, f64::NAN),
                    note: "evidence.markdown.volume_confirmation".to_string(),
                });
            }
        }
    }

    evidence.truncate(3);
    evidence
}

/// Pick the highest-probability phase, breaking ties in `BehaviorPhase::ALL`
/// order (first maximum wins). `HashMap` iteration order is randomized per
/// process, so selecting via `.iter().max_by(...)` over the map directly
/// would make ties — all-zero raw scores, or the uniform 0.2 empty-scores
/// case — nondeterministic across runs.
fn pick_dominant(probabilities: &HashMap<BehaviorPhase, f64>) -> BehaviorPhase {
    let mut dominant = BehaviorPhase::ALL[0];
    let mut best = f64::NEG_INFINITY;
    for phase in BehaviorPhase::ALL {
        let p = probabilities.get(&phase).copied().unwrap_or(0.0);
        if p > best {
            best = p;
            dominant = phase;
        }
    }
    dominant
}

/// Score all five phases, softmax-normalize, pick the dominant, and generate
/// supporting evidence. `lookback` is the general scoring window (spec.md §6
/// `behavior_lookback`, default 20); the shakeout scorer uses half of it, as
/// the source's tighter sweep-detection window.
pub fn infer_behavior(bars: &[Bar], features: &Features, zones: &Zones, market_state: &MarketState, signals: &[Signal], lookback: usize) -> Behavior {
    let shakeout_lookback = (lookback / 2).max(1);
    let mut raw = HashMap::new();
    raw.insert(BehaviorPhase::Accumulation, score_accumulation(bars, features, zones, lookback));
    raw.insert(BehaviorPhase::Shakeout, score_shakeout(bars, features, zones, shakeout_lookback));
    raw.insert(BehaviorPhase::Markup, score_markup(bars, features, market_state, signals, lookback));
    raw.insert(BehaviorPhase::Distribution, score_distribution(bars, features, zones, lookback));
    raw.insert(BehaviorPhase::Markdown, score_markdown(bars, features, market_state, signals, lookback));

    let probabilities = scores_to_probabilities(&raw);
    let dominant = pick_dominant(&probabilities);

    let evidence = generate_evidence(bars, dominant, features, zones);

    Behavior {
        probabilities,
        dominant,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_simplex_sums_to_one() {
        let mut raw = HashMap::new();
        raw.insert(BehaviorPhase::Accumulation, 0.5);
        raw.insert(BehaviorPhase::Shakeout, 0.1);
        raw.insert(BehaviorPhase::Markup, 0.8);
        raw.insert(BehaviorPhase::Distribution, 0.0);
        raw.insert(BehaviorPhase::Markdown, 0.2);
        let probs = scores_to_probabilities(&raw);
        let sum: f64 = probs.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        let dominant = probs.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).unwrap().0;
        assert_eq!(*dominant, BehaviorPhase::Markup);
    }

    #[test]
    fn dominant_tie_is_deterministic() {
        let mut raw = HashMap::new();
        for phase in BehaviorPhase::ALL {
            raw.insert(phase, 0.0);
        }
        let probs = scores_to_probabilities(&raw);
        for _ in 0..10 {
            assert_eq!(pick_dominant(&probs), BehaviorPhase::ALL[0]);
        }
    }

    #[test]
    fn empty_scores_are_uniform() {
        let raw: HashMap<BehaviorPhase, f64> = HashMap::new();
        let probs = scores_to_probabilities(&raw);
        for v in probs.values() {
            assert!((v - 0.2).abs() < 1e-9);
        }
    }
}
