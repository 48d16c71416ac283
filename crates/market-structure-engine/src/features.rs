//! Per-bar indicator pipeline (C1, spec.md §4.1): ATR, RVOL, VSA Effort/Result,
//! wick ratios, directional efficiency. NaN is never invented — it propagates
//! per spec.md §4.1/§7, and downstream consumers branch on `is_nan()`.

use crate::error::{EngineError, EngineResult};
use crate::types::{Bar, VolumeDataQuality};

/// Named parallel arrays, one entry per bar, all of length `N = bars.len()`.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub atr: Vec<f64>,
    pub rvol: Vec<f64>,
    pub effort: Vec<f64>,
    pub result: Vec<f64>,
    pub wick_upper: Vec<f64>,
    pub wick_lower: Vec<f64>,
    pub up_eff: Vec<f64>,
    pub down_eff: Vec<f64>,
}

/// Wilder-smoothed ATR. `atr[i]` is NaN for `i < period`; `atr[period]` is the
/// simple mean of `TR_{1..period}`; thereafter the Wilder recurrence applies.
pub fn calculate_atr(bars: &[Bar], period: usize) -> EngineResult<Vec<f64>> {
    let n = bars.len();
    if n < period + 1 {
        return Err(EngineError::InsufficientData(format!(
            "ATR period {period} requires at least {} bars, got {n}",
            period + 1
        )));
    }

    let mut tr = vec![0.0_f64; n];
    for i in 1..n {
        let h = bars[i].high;
        let l = bars[i].low;
        let pc = bars[i - 1].close;
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }

    let mut atr = vec![f64::NAN; n];
    let seed: f64 = tr[1..=period].iter().sum::<f64>() / period as f64;
    atr[period] = seed;
    for i in (period + 1)..n {
        atr[i] = (atr[i - 1] * (period as f64 - 1.0) + tr[i]) / period as f64;
    }
    Ok(atr)
}

/// Relative volume: current bar's volume over the mean of the trailing
/// window's strictly-positive volumes. NaN when the current bar's volume is
/// non-positive, or when fewer than `period/2` positive entries exist in the
/// window, or when that mean is non-positive.
pub fn calculate_rvol(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut rvol = vec![f64::NAN; n];
    if period == 0 {
        return rvol;
    }
    for i in 0..n {
        if i + 1 < period {
            continue;
        }
        let v_i = bars[i].volume;
        if v_i <= 0.0 {
            continue;
        }
        let start = i + 1 - period;
        let window: Vec<f64> = bars[start..=i]
            .iter()
            .map(|b| b.volume)
            .filter(|&v| v > 0.0)
            .collect();
        if (window.len() as f64) < (period as f64) * 0.5 {
            continue;
        }
        let mean: f64 = window.iter().sum::<f64>() / window.len() as f64;
        if mean <= 0.0 {
            continue;
        }
        rvol[i] = v_i / mean;
    }
    rvol
}

/// `(upper_wick_ratio, lower_wick_ratio)`, both in `[0,1]`. `(0.5, 0.5)` when
/// the bar has zero or negative range.
pub fn calculate_wick_ratios(bar: &Bar) -> (f64, f64) {
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return (0.5, 0.5);
    }
    let (upper, lower) = if bar.close >= bar.open {
        (bar.high - bar.close, bar.open - bar.low)
    } else {
        (bar.high - bar.open, bar.close - bar.low)
    };
    (upper / range, lower / range)
}

/// `(up_efficiency, down_efficiency)` — how much of a unit of volume produced
/// upward/downward close movement. `(0, 0)` when volume is non-positive.
pub fn calculate_efficiency(bar: &Bar) -> (f64, f64) {
    if bar.volume <= 0.0 {
        return (0.0, 0.0);
    }
    let up_eff = (bar.close - bar.open).max(0.0) / bar.volume;
    let down_eff = (bar.open - bar.close).max(0.0) / bar.volume;
    (up_eff, down_eff)
}

/// VSA absorption predicate: high effort (RVOL) without commensurate result
/// (range/ATR). NaN inputs never satisfy the predicate.
pub fn is_high_effort_low_result(effort: f64, result: f64) -> bool {
    effort >= 1.5 && result <= 0.6
}

/// Fraction of non-NaN RVOL entries determines the report-level volume
/// quality tier that downstream components (C3, C4) use to downgrade
/// confidence.
pub fn get_volume_quality(rvol: &[f64]) -> VolumeDataQuality {
    if rvol.is_empty() {
        return VolumeDataQuality::Unavailable;
    }
    let valid = rvol.iter().filter(|v| !v.is_nan()).count();
    let fraction = valid as f64 / rvol.len() as f64;
    if fraction >= 0.7 {
        VolumeDataQuality::Reliable
    } else if fraction >= 0.5 {
        VolumeDataQuality::Partial
    } else {
        VolumeDataQuality::Unavailable
    }
}

/// Compute the full feature set for a bar sequence.
pub fn calculate_features(
    bars: &[Bar],
    atr_period: usize,
    volume_period: usize,
) -> EngineResult<Features> {
    let atr = calculate_atr(bars, atr_period)?;
    let rvol = calculate_rvol(bars, volume_period);
    let effort = rvol.clone();

    let n = bars.len();
    let mut result = vec![f64::NAN; n];
    let mut wick_upper = vec![0.0; n];
    let mut wick_lower = vec![0.0; n];
    let mut up_eff = vec![0.0; n];
    let mut down_eff = vec![0.0; n];

    for i in 0..n {
        let atr_i = atr[i];
        if atr_i.is_finite() && atr_i > 0.0 {
            result[i] = (bars[i].high - bars[i].low) / atr_i;
        }
        let (wu, wl) = calculate_wick_ratios(&bars[i]);
        wick_upper[i] = wu;
        wick_lower[i] = wl;
        let (ue, de) = calculate_efficiency(&bars[i]);
        up_eff[i] = ue;
        down_eff[i] = de;
    }

    Ok(Features {
        atr,
        rvol,
        effort,
        result,
        wick_upper,
        wick_lower,
        up_eff,
        down_eff,
    })
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

    fn flat_bars(n: usize, price: f64, vol: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| bar(i as i64 * 60, price, price + 1.0, price - 1.0, price, vol))
            .collect()
    }

    #[test]
    fn atr_insufficient_data_errs() {
        let bars = flat_bars(5, 100.0, 1e6);
        let err = calculate_atr(&bars, 14).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn atr_identity_at_seed_and_recurrence() {
        let bars = flat_bars(20, 100.0, 1e6);
        let atr = calculate_atr(&bars, 14).unwrap();
        for i in 0..14 {
            assert!(atr[i].is_nan());
        }
        assert!(atr[14].is_finite());
        // true range is 2.0 for every bar (flat high/low band, no gaps)
        assert!((atr[14] - 2.0).abs() < 1e-9);
        for i in 15..20 {
            let tr_i = 2.0;
            let expected = (atr[i - 1] * 13.0 + tr_i) / 14.0;
            assert!((atr[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn rvol_nan_on_zero_current_volume() {
        let mut bars = flat_bars(40, 100.0, 1e6);
        bars[39].volume = 0.0;
        let rvol = calculate_rvol(&bars, 30);
        assert!(rvol[39].is_nan());
    }

    #[test]
    fn rvol_is_one_for_uniform_volume() {
        let bars = flat_bars(40, 100.0, 1e6);
        let rvol = calculate_rvol(&bars, 30);
        assert!((rvol[35] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn wick_ratios_degenerate_range() {
        let b = bar(0, 100.0, 100.0, 100.0, 100.0, 1e6);
        assert_eq!(calculate_wick_ratios(&b), (0.5, 0.5));
    }

    #[test]
    fn efficiency_zero_volume() {
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 0.0);
        assert_eq!(calculate_efficiency(&b), (0.0, 0.0));
    }

    #[test]
    fn volume_quality_tiers() {
        assert_eq!(get_volume_quality(&[1.0, 1.0, 1.0, 1.0, f64::NAN]), VolumeDataQuality::Reliable);
        assert_eq!(
            get_volume_quality(&[1.0, 1.0, f64::NAN, f64::NAN, f64::NAN]),
            VolumeDataQuality::Unavailable
        );
        assert_eq!(
            get_volume_quality(&[1.0, 1.0, 1.0, f64::NAN, f64::NAN]),
            VolumeDataQuality::Partial
        );
    }

    #[test]
    fn absorption_predicate_rejects_nan() {
        assert!(!is_high_effort_low_result(f64::NAN, 0.1));
        assert!(is_high_effort_low_result(1.8, 0.4));
        assert!(!is_high_effort_low_result(1.2, 0.4));
    }
}
