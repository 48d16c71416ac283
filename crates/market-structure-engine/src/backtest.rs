//! Sliding-window backtest harness (C10, spec.md §4.10).
//!
//! Replays the orchestrator over overlapping 100-bar windows and scores its
//! own signals/events against simple forward-looking truth rules. This is a
//! self-consistency check on the pipeline, not a P&L simulator.

use crate::orchestrator::{analyze_market, create_initial_state, AnalysisParams};
use crate::types::{Bar, Direction, SignalType};

const WINDOW_SIZE: usize = 100;
const WINDOW_STEP: usize = 20;
const MIN_BARS: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub ticker: String,
    pub bar_count: usize,
    pub breakout_accuracy: f64,
    pub fakeout_detection_rate: f64,
    pub signal_hit_rate: f64,
    pub timeline_precision: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateResult {
    pub period_days: usize,
    pub breakout_accuracy_mean: f64,
    pub breakout_accuracy_std: f64,
    pub fakeout_detection_rate_mean: f64,
    pub fakeout_detection_rate_std: f64,
    pub signal_hit_rate_mean: f64,
    pub signal_hit_rate_std: f64,
    pub timeline_precision_mean: f64,
    pub timeline_precision_std: f64,
}

fn find_signal_bar(bars: &[Bar], bar_time: chrono::DateTime<chrono::Utc>) -> Option<usize> {
    bars.iter().position(|b| (b.timestamp - bar_time).num_seconds().abs() <= 60)
}

/// A bullish breakout is vindicated if price rallies 0.5% above the signal
/// level within `lookahead` bars; bearish mirrors with a 0.5% drop.
pub fn evaluate_breakout(bars: &[Bar], level: f64, direction: Direction, bar_time: chrono::DateTime<chrono::Utc>, lookahead: usize) -> bool {
    let Some(idx) = find_signal_bar(bars, bar_time) else { return false };
    let window = &bars[idx..(idx + lookahead + 1).min(bars.len())];
    match direction {
        Direction::Up => window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) > level * 1.005,
        Direction::Down => window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min) < level * 0.995,
    }
}

/// A fakeout is vindicated if price reverses the other way within `lookahead`
/// bars — a bullish fakeout should see closes drop 1% below the level.
pub fn evaluate_fakeout(bars: &[Bar], level: f64, direction: Direction, bar_time: chrono::DateTime<chrono::Utc>, lookahead: usize) -> bool {
    let Some(idx) = find_signal_bar(bars, bar_time) else { return false };
    let window = &bars[idx..(idx + lookahead + 1).min(bars.len())];
    match direction {
        Direction::Up => window.iter().map(|b| b.close).fold(f64::INFINITY, f64::min) < level * 0.99,
        Direction::Down => window.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max) > level * 1.01,
    }
}

/// Whether price reaches `target_pct` away from the signal level within
/// `lookahead` bars, in the signal's direction.
pub fn evaluate_signal_target(
    bars: &[Bar],
    level: f64,
    direction: Direction,
    bar_time: chrono::DateTime<chrono::Utc>,
    target_pct: f64,
    lookahead: usize,
) -> bool {
    let Some(idx) = find_signal_bar(bars, bar_time) else { return false };
    let window = &bars[idx..(idx + lookahead + 1).min(bars.len())];
    match direction {
        Direction::Up => window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) >= level * (1.0 + target_pct),
        Direction::Down => window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min) <= level * (1.0 - target_pct),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Slide a 100-bar/20-bar-step window over `bars`, running the full
/// pipeline on each window and checking its own output against the
/// lookahead truth rules above.
pub fn run_backtest(bars: &[Bar], ticker: &str, timeframe: &str) -> BacktestResult {
    if bars.len() < MIN_BARS {
        return BacktestResult {
            ticker: ticker.to_uppercase(),
            bar_count: bars.len(),
            ..Default::default()
        };
    }

    let params = AnalysisParams::default();
    let mut breakout_checks = 0u32;
    let mut breakout_hits = 0u32;
    let mut fakeout_checks = 0u32;
    let mut fakeout_hits = 0u32;
    let mut target_checks = 0u32;
    let mut target_hits = 0u32;
    let mut timeline_total = 0u32;
    let mut timeline_structural = 0u32;

    let mut start = 0;
    while start + WINDOW_SIZE < bars.len() {
        let window = &bars[start..start + WINDOW_SIZE];
        let mut state = create_initial_state(&params);
        if let Ok(report) = analyze_market(window, ticker, timeframe, &params, &mut state, None) {
            for signal in &report.signals {
                match signal.kind {
                    SignalType::BreakoutConfirmed => {
                        breakout_checks += 1;
                        if evaluate_breakout(bars, signal.level, signal.direction, signal.bar_time, 10) {
                            breakout_hits += 1;
                        }
                        target_checks += 1;
                        if evaluate_signal_target(bars, signal.level, signal.direction, signal.bar_time, 0.02, 20) {
                            target_hits += 1;
                        }
                    }
                    SignalType::Fakeout => {
                        fakeout_checks += 1;
                        if evaluate_fakeout(bars, signal.level, signal.direction, signal.bar_time, 5) {
                            fakeout_hits += 1;
                        }
                    }
                    SignalType::BreakoutAttempt => {}
                }
            }
            for event in &report.timeline {
                timeline_total += 1;
                if matches!(event.event_type.as_str(), "breakout_confirmed" | "fakeout_detected" | "regime_change") {
                    timeline_structural += 1;
                }
            }
        }
        start += WINDOW_STEP;
    }

    BacktestResult {
        ticker: ticker.to_uppercase(),
        bar_count: bars.len(),
        breakout_accuracy: if breakout_checks > 0 { breakout_hits as f64 / breakout_checks as f64 } else { 0.0 },
        fakeout_detection_rate: if fakeout_checks > 0 { fakeout_hits as f64 / fakeout_checks as f64 } else { 0.0 },
        signal_hit_rate: if target_checks > 0 { target_hits as f64 / target_checks as f64 } else { 0.0 },
        timeline_precision: if timeline_total > 0 { timeline_structural as f64 / timeline_total as f64 } else { 0.0 },
    }
}

/// Aggregate mean/stddev across multiple backtest runs (e.g. one per ticker),
/// skipping runs with fewer than `MIN_BARS` bars.
pub fn aggregate_results(results: &[BacktestResult]) -> AggregateResult {
    let valid: Vec<&BacktestResult> = results.iter().filter(|r| r.bar_count > MIN_BARS).collect();
    if valid.is_empty() {
        return AggregateResult::default();
    }

    let breakout: Vec<f64> = valid.iter().map(|r| r.breakout_accuracy).collect();
    let fakeout: Vec<f64> = valid.iter().map(|r| r.fakeout_detection_rate).collect();
    let hit_rate: Vec<f64> = valid.iter().map(|r| r.signal_hit_rate).collect();
    let precision: Vec<f64> = valid.iter().map(|r| r.timeline_precision).collect();
    let total_bars: usize = valid.iter().map(|r| r.bar_count).sum();

    AggregateResult {
        period_days: total_bars / 390,
        breakout_accuracy_mean: mean(&breakout),
        breakout_accuracy_std: std_dev(&breakout),
        fakeout_detection_rate_mean: mean(&fakeout),
        fakeout_detection_rate_std: std_dev(&fakeout),
        signal_hit_rate_mean: mean(&hit_rate),
        signal_hit_rate_std: std_dev(&hit_rate),
        timeline_precision_mean: mean(&precision),
        timeline_precision_std: std_dev(&precision),
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
    fn too_few_bars_returns_zeroed_result() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(i * 60, 100.0, 101.0, 99.0, 100.0, 1e6)).collect();
        let result = run_backtest(&bars, "spy", "1m");
        assert_eq!(result.bar_count, 20);
        assert_eq!(result.breakout_accuracy, 0.0);
    }

    #[test]
    fn aggregate_skips_short_runs() {
        let results = vec![
            BacktestResult { bar_count: 10, breakout_accuracy: 0.9, ..Default::default() },
            BacktestResult { bar_count: 200, breakout_accuracy: 0.5, fakeout_detection_rate: 0.6, signal_hit_rate: 0.4, timeline_precision: 0.3 },
        ];
        let agg = aggregate_results(&results);
        assert!((agg.breakout_accuracy_mean - 0.5).abs() < 1e-9);
    }

    #[test]
    fn breakout_truth_rule_checks_forward_high() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| {
                let c = if i < 10 { 100.0 } else { 102.0 };
                bar(i * 60, c, c + 0.5, c - 0.5, c, 1e6)
            })
            .collect();
        let bar_time = bars[10].timestamp;
        assert!(evaluate_breakout(&bars, 100.0, Direction::Up, bar_time, 5));
    }
}
