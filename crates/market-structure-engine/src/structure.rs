//! Fractal swing detection, zone clustering, and regime classification (C2,
//! spec.md §4.2).

use crate::types::{Bar, MarketState, Regime, SwingPoint, Zone, Zones};

/// `find_swing_points(bars, n)`: a bar `i` is a swing high iff
/// `h_i = max(h_{i-n..i+n})` (ties at the center count as a swing).
/// Symmetric for lows. Bars in `[0,n) ∪ [N-n,N)` are never swings.
pub fn find_swing_points(bars: &[Bar], n: usize) -> (Vec<SwingPoint>, Vec<SwingPoint>) {
    let len = bars.len();
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if len == 0 || n == 0 || len <= 2 * n {
        return (highs, lows);
    }

    for i in n..(len - n) {
        let window = &bars[(i - n)..=(i + n)];
        let max_h = window.iter().fold(f64::NEG_INFINITY, |m, b| m.max(b.high));
        if bars[i].high >= max_h {
            highs.push(SwingPoint {
                index: i,
                price: bars[i].high,
                bar_time: bars[i].timestamp,
                is_high: true,
            });
        }
        let min_l = window.iter().fold(f64::INFINITY, |m, b| m.min(b.low));
        if bars[i].low <= min_l {
            lows.push(SwingPoint {
                index: i,
                price: bars[i].low,
                bar_time: bars[i].timestamp,
                is_high: false,
            });
        }
    }

    (highs, lows)
}

fn padding_multiplier(timeframe: &str) -> f64 {
    match timeframe {
        "1m" => 0.35,
        "5m" => 0.4,
        _ => 0.5,
    }
}

/// Single-pass 1-D clustering of sorted swing points into zones, each scored
/// by touches, rejections, reaction magnitude, and recency (spec.md §4.2).
///
/// `rejections` and `last_reaction` are the baseline approximation spec.md's
/// Open Questions section flags: `rejections = floor(0.8 * touches)` and
/// `last_reaction` is fixed at `1.0` ATR unit, which makes the reaction term
/// of the score a constant `0.5` — a faithful port of the source rather than
/// a richer per-zone reaction history.
fn cluster_side(points: &[SwingPoint], atr: f64, timeframe: &str, current_bar_index: i64) -> Vec<Zone> {
    if points.is_empty() || atr <= 0.0 {
        return Vec::new();
    }
    let padding = padding_multiplier(timeframe) * atr;
    let bin_width = 0.5 * atr;

    let mut sorted: Vec<&SwingPoint> = points.iter().collect();
    sorted.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap());

    let mut clusters: Vec<Vec<&SwingPoint>> = Vec::new();
    for p in sorted {
        if let Some(last) = clusters.last_mut() {
            let cluster_max = last.iter().map(|sp| sp.price).fold(f64::NEG_INFINITY, f64::max);
            if (p.price - cluster_max).abs() <= bin_width {
                last.push(p);
                continue;
            }
        }
        clusters.push(vec![p]);
    }

    let mut zones: Vec<Zone> = clusters
        .into_iter()
        .map(|cluster| {
            let prices: Vec<f64> = cluster.iter().map(|sp| sp.price).collect();
            let low = prices.iter().cloned().fold(f64::INFINITY, f64::min) - padding;
            let high = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max) + padding;
            let touches = cluster.len() as u32;
            let rejections = ((touches as f64) * 0.8).floor() as u32;
            let last_reaction = 1.0_f64;
            let latest = cluster.iter().max_by_key(|sp| sp.index).unwrap();
            let bars_since_last_test = (current_bar_index - latest.index as i64).max(0) as f64;

            let tests_score = (touches.min(5) as f64) / 5.0;
            let rejections_score = (rejections.min(5) as f64) / 5.0;
            let reaction_score = (last_reaction / 2.0).min(1.0);
            let recency_score = (1.0 - bars_since_last_test / 100.0).max(0.0);

            let score = 0.30 * tests_score + 0.30 * rejections_score + 0.25 * reaction_score + 0.15 * recency_score;

            Zone {
                low,
                high,
                score,
                touches,
                rejections,
                last_reaction,
                last_test_time: Some(latest.bar_time),
            }
        })
        .collect();

    zones.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    zones
}

/// Cluster swing highs/lows into `resistance`/`support` zones, capped at
/// `max_zones` per side, ordered by score descending.
pub fn cluster_zones(
    swing_highs: &[SwingPoint],
    swing_lows: &[SwingPoint],
    atr: f64,
    timeframe: &str,
    max_zones: usize,
    current_bar_index: i64,
) -> Zones {
    let mut resistance = cluster_side(swing_highs, atr, timeframe, current_bar_index);
    let mut support = cluster_side(swing_lows, atr, timeframe, current_bar_index);
    resistance.truncate(max_zones);
    support.truncate(max_zones);
    Zones { support, resistance }
}

/// Inject external key levels (e.g. EH YC/YH/YL/PMH/PML/AHH/AHL) as narrow,
/// high-score pseudo-zones into whichever side sits relative to `current_price`.
/// They participate in C3/C6 exactly like clustered zones.
pub fn inject_eh_levels(zones: &mut Zones, levels: &[f64], current_price: f64, atr: f64) {
    let pad = if atr > 0.0 { (atr * 0.02).max(0.01) } else { 0.01 };
    for &level in levels {
        let zone = Zone {
            low: level - pad,
            high: level + pad,
            score: 0.95,
            touches: 1,
            rejections: 0,
            last_reaction: 1.0,
            last_test_time: None,
        };
        if level >= current_price {
            zones.resistance.push(zone);
        } else {
            zones.support.push(zone);
        }
    }
    zones.resistance.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    zones.support.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
}

/// Regime classification over the last `m` swings on each side (spec.md §4.2).
pub fn classify_regime(swing_highs: &[SwingPoint], swing_lows: &[SwingPoint], m: usize) -> MarketState {
    if swing_highs.len() < 2 || swing_lows.len() < 2 {
        return MarketState {
            regime: Regime::Range,
            confidence: 0.5,
        };
    }

    let recent_highs = &swing_highs[swing_highs.len().saturating_sub(m)..];
    let recent_lows = &swing_lows[swing_lows.len().saturating_sub(m)..];

    let mut hh = 0u32;
    let mut lh = 0u32;
    for w in recent_highs.windows(2) {
        if w[1].price > w[0].price {
            hh += 1;
        } else {
            lh += 1;
        }
    }

    let mut hl = 0u32;
    let mut ll = 0u32;
    for w in recent_lows.windows(2) {
        if w[1].price > w[0].price {
            hl += 1;
        } else {
            ll += 1;
        }
    }

    let total = (recent_highs.len().saturating_sub(1)).max(1) + (recent_lows.len().saturating_sub(1)).max(1);
    let total = total as f64;
    let up = (hh + hl) as f64;
    let down = (ll + lh) as f64;

    if up / total >= 0.6 {
        MarketState {
            regime: Regime::Uptrend,
            confidence: up / total,
        }
    } else if down / total >= 0.6 {
        MarketState {
            regime: Regime::Downtrend,
            confidence: down / total,
        }
    } else {
        MarketState {
            regime: Regime::Range,
            confidence: 1.0 - (up - down).abs() / total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(t: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            vwap: None,
        }
    }

    #[test]
    fn swing_points_exclude_edges() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| bar(i as i64 * 60, 100.0, 100.0 + (i % 3) as f64, 99.0, 100.0, 1e6))
            .collect();
        let (highs, lows) = find_swing_points(&bars, 4);
        assert!(highs.iter().all(|sp| sp.index >= 4 && sp.index < 16));
        assert!(lows.iter().all(|sp| sp.index >= 4 && sp.index < 16));
    }

    #[test]
    fn zone_ordering_and_bounds() {
        let points: Vec<SwingPoint> = (0..10)
            .map(|i| SwingPoint {
                index: i,
                price: 100.0 + (i as f64) * 0.05,
                bar_time: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
                is_high: true,
            })
            .collect();
        let zones = cluster_side(&points, 1.0, "1d", 20);
        for pair in zones.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for z in &zones {
            assert!(z.low < z.high);
        }
    }

    #[test]
    fn regime_needs_two_swings_per_side() {
        let ms = classify_regime(&[], &[], 6);
        assert_eq!(ms.regime, Regime::Range);
        assert!((ms.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn regime_uptrend_on_higher_highs_and_lows() {
        let highs: Vec<SwingPoint> = (0..6)
            .map(|i| SwingPoint {
                index: i * 10,
                price: 100.0 + i as f64,
                bar_time: Utc.timestamp_opt(0, 0).unwrap(),
                is_high: true,
            })
            .collect();
        let lows: Vec<SwingPoint> = (0..6)
            .map(|i| SwingPoint {
                index: i * 10 + 5,
                price: 98.0 + i as f64,
                bar_time: Utc.timestamp_opt(0, 0).unwrap(),
                is_high: false,
            })
            .collect();
        let ms = classify_regime(&highs, &lows, 6);
        assert_eq!(ms.regime, Regime::Uptrend);
        assert!(ms.confidence >= 0.6);
    }
}
