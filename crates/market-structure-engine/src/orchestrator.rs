//! Top-level `analyze_market` entrypoint (C8, spec.md §4.8/§6).
//!
//! Wires C1-C7 into the single pipeline a caller drives bar-by-bar or in
//! batch: features, zones, regime, breakout signals, behavior, timeline,
//! playbook, and report assembly.

use crate::behavior::infer_behavior;
use crate::breakout::BreakoutFsm;
use crate::error::{EngineError, EngineResult};
use crate::extended_hours::EhContext;
use crate::features::{calculate_features, get_volume_quality};
use crate::playbook::generate_playbook;
use crate::structure::{classify_regime, cluster_zones, find_swing_points, inject_eh_levels};
use crate::timeline::{merge_events, scan_historical_soft_events, TimelineManager};
use crate::types::{AnalysisReport, Bar, Signal};
use chrono::Utc;

const VALID_TIMEFRAMES: [&str; 3] = ["1m", "5m", "1d"];

/// Tunables carried across calls to `analyze_market`, named after spec.md §6.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisParams {
    pub atr_period: usize,
    pub volume_period: usize,
    pub swing_n: usize,
    pub max_zones_per_side: usize,
    pub regime_lookback_swings: usize,
    pub breakout_volume_threshold: f64,
    pub breakout_result_threshold: f64,
    pub breakout_confirm_closes: u32,
    pub breakout_fakeout_bars: i64,
    pub timeline_history_lookback: usize,
    pub behavior_lookback: usize,
    pub probability_threshold: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            atr_period: 14,
            volume_period: 30,
            swing_n: 4,
            max_zones_per_side: 5,
            regime_lookback_swings: 6,
            breakout_volume_threshold: 1.8,
            breakout_result_threshold: 0.6,
            breakout_confirm_closes: 2,
            breakout_fakeout_bars: 3,
            timeline_history_lookback: 10,
            behavior_lookback: 20,
            probability_threshold: 0.12,
        }
    }
}

/// Carried across successive calls so the breakout FSM and timeline ring
/// buffer keep their state between bars/batches instead of restarting cold.
#[derive(Debug, Clone)]
pub struct AnalysisState {
    pub breakout_fsm: BreakoutFsm,
    pub timeline: TimelineManager,
}

pub fn create_initial_state(params: &AnalysisParams) -> AnalysisState {
    AnalysisState {
        breakout_fsm: BreakoutFsm::new(
            params.breakout_volume_threshold,
            params.breakout_result_threshold,
            params.breakout_confirm_closes,
            params.breakout_fakeout_bars,
        ),
        timeline: TimelineManager::new(params.probability_threshold),
    }
}

fn validate_bars(bars: &[Bar], min_required: usize) -> EngineResult<()> {
    if bars.is_empty() {
        return Err(EngineError::InsufficientData("no bars supplied".to_string()));
    }
    if bars.len() < min_required {
        return Err(EngineError::InsufficientData(format!(
            "need at least {min_required} bars, got {}",
            bars.len()
        )));
    }
    Ok(())
}

fn validate_timeframe(timeframe: &str) -> EngineResult<()> {
    if !VALID_TIMEFRAMES.contains(&timeframe) {
        return Err(EngineError::InvalidTimeframe(timeframe.to_string()));
    }
    Ok(())
}

fn validate_params(params: &AnalysisParams) -> EngineResult<()> {
    if params.atr_period == 0 {
        return Err(EngineError::InvalidParam("atr_period must be >= 1".to_string()));
    }
    if params.swing_n == 0 {
        return Err(EngineError::InvalidParam("swing_n must be >= 1".to_string()));
    }
    if params.max_zones_per_side == 0 {
        return Err(EngineError::InvalidParam("max_zones_per_side must be >= 1".to_string()));
    }
    if !(0.0..=1.0).contains(&params.breakout_result_threshold) {
        return Err(EngineError::InvalidParam("breakout_result_threshold must be in [0, 1]".to_string()));
    }
    if params.behavior_lookback == 0 {
        return Err(EngineError::InvalidParam("behavior_lookback must be >= 1".to_string()));
    }
    if !(0.0..=1.0).contains(&params.probability_threshold) {
        return Err(EngineError::InvalidParam("probability_threshold must be in [0, 1]".to_string()));
    }
    Ok(())
}

fn gap_threshold_seconds(timeframe: &str) -> i64 {
    match timeframe {
        "1m" => 2 * 60,
        "5m" => 10 * 60,
        _ => 3 * 24 * 60 * 60,
    }
}

fn detect_data_gaps(bars: &[Bar], timeframe: &str) -> bool {
    let threshold = gap_threshold_seconds(timeframe);
    bars.windows(2)
        .any(|w| (w[1].timestamp - w[0].timestamp).num_seconds() > threshold)
}

/// Run the full pipeline over `bars`, updating `state` in place and
/// returning the assembled report.
pub fn analyze_market(
    bars: &[Bar],
    ticker: &str,
    timeframe: &str,
    params: &AnalysisParams,
    state: &mut AnalysisState,
    eh_context: Option<&EhContext>,
) -> EngineResult<AnalysisReport> {
    tracing::debug!(ticker, timeframe, bar_count = bars.len(), "analyze_market start");
    validate_timeframe(timeframe)?;
    validate_params(params)?;
    let min_required = params.atr_period + 1;
    validate_bars(bars, min_required)?;

    let features = calculate_features(bars, params.atr_period, params.volume_period)?;
    let volume_quality = get_volume_quality(&features.rvol);
    if volume_quality == crate::types::VolumeDataQuality::Unavailable {
        tracing::warn!(ticker, "volume quality unavailable for this bar stream");
    }
    let (swing_highs, swing_lows) = find_swing_points(bars, params.swing_n);

    let last_index = (bars.len() - 1) as i64;
    let last_atr = features.atr[bars.len() - 1];
    let mut zones = cluster_zones(
        &swing_highs,
        &swing_lows,
        if last_atr.is_finite() { last_atr } else { 0.0 },
        timeframe,
        params.max_zones_per_side,
        last_index,
    );
    if let Some(ctx) = eh_context {
        let current_price = bars[bars.len() - 1].close;
        inject_eh_levels(&mut zones, &ctx.levels.levels(), current_price, if last_atr.is_finite() { last_atr } else { 0.0 });
    }

    let market_state = classify_regime(&swing_highs, &swing_lows, params.regime_lookback_swings);

    let mut signals: Vec<Signal> = Vec::new();
    for (i, bar) in bars.iter().enumerate() {
        let atr_i = features.atr[i];
        let rvol_i = if features.rvol[i].is_nan() { 1.0 } else { features.rvol[i] };
        let result_i = if features.result[i].is_nan() {
            if atr_i.is_finite() && atr_i > 0.0 {
                (bar.high - bar.low) / atr_i
            } else {
                bar.high - bar.low
            }
        } else {
            features.result[i]
        };
        if let Some(sig) = state.breakout_fsm.update(bar, i as i64, &zones, rvol_i, result_i) {
            signals.push(sig);
        }
    }

    let behavior = infer_behavior(bars, &features, &zones, &market_state, &signals, params.behavior_lookback);

    let last_bar = &bars[bars.len() - 1];
    let last_rvol = if features.rvol[bars.len() - 1].is_nan() { 1.0 } else { features.rvol[bars.len() - 1] };
    let last_effort = features.effort[bars.len() - 1];
    let last_result = features.result[bars.len() - 1];
    state.timeline.update(
        last_bar,
        last_index,
        market_state,
        &behavior,
        state.breakout_fsm.state_str(),
        &zones,
        if last_atr.is_finite() { last_atr } else { 0.0 },
        last_rvol,
        last_effort,
        last_result,
        &swing_highs,
        &swing_lows,
    );
    let soft_events = scan_historical_soft_events(
        bars,
        &features.effort,
        &features.result,
        &features.rvol,
        &zones,
        if last_atr.is_finite() { last_atr } else { 0.0 },
        params.timeline_history_lookback,
    );
    let timeline_events = merge_events(state.timeline.get_events(10), soft_events);

    let playbook = generate_playbook(
        last_bar,
        if last_atr.is_finite() { last_atr } else { f64::NAN },
        &zones,
        &market_state,
        eh_context,
    );

    let data_gaps = detect_data_gaps(bars, timeframe);

    Ok(AnalysisReport {
        ticker: ticker.to_uppercase(),
        tf: timeframe.to_string(),
        generated_at: Utc::now(),
        bar_count: bars.len(),
        data_gaps,
        volume_quality,
        market_state,
        zones,
        signals,
        behavior,
        timeline: timeline_events,
        playbook,
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

    fn trending_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                bar(i as i64 * 60, base, base + 1.0, base - 1.0, base + 0.2, 1e6 + (i as f64) * 100.0)
            })
            .collect()
    }

    #[test]
    fn insufficient_bars_errs() {
        let params = AnalysisParams::default();
        let mut state = create_initial_state(&params);
        let bars = trending_bars(5);
        let result = analyze_market(&bars, "spy", "1m", &params, &mut state, None);
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }

    #[test]
    fn ticker_is_uppercased_and_report_assembles() {
        let params = AnalysisParams::default();
        let mut state = create_initial_state(&params);
        let bars = trending_bars(60);
        let report = analyze_market(&bars, "spy", "1m", &params, &mut state, None).unwrap();
        assert_eq!(report.ticker, "SPY");
        assert_eq!(report.bar_count, 60);
    }

    #[test]
    fn unknown_timeframe_errs() {
        let params = AnalysisParams::default();
        let mut state = create_initial_state(&params);
        let bars = trending_bars(60);
        let result = analyze_market(&bars, "spy", "15m", &params, &mut state, None);
        assert!(matches!(result, Err(EngineError::InvalidTimeframe(_))));
    }

    #[test]
    fn zero_atr_period_errs() {
        let mut params = AnalysisParams::default();
        params.atr_period = 0;
        let mut state = create_initial_state(&params);
        let bars = trending_bars(60);
        let result = analyze_market(&bars, "spy", "1m", &params, &mut state, None);
        assert!(matches!(result, Err(EngineError::InvalidParam(_))));
    }

    #[test]
    fn large_time_jump_flags_data_gap() {
        let params = AnalysisParams::default();
        let mut state = create_initial_state(&params);
        let mut bars = trending_bars(60);
        let last = bars.last().unwrap().clone();
        bars.push(bar(
            last.timestamp.timestamp() + 3600,
            last.close,
            last.close + 1.0,
            last.close - 1.0,
            last.close,
            1e6,
        ));
        let report = analyze_market(&bars, "spy", "1m", &params, &mut state, None).unwrap();
        assert!(report.data_gaps);
    }

    #[test]
    fn report_round_trips_through_json() {
        let params = AnalysisParams::default();
        let mut state = create_initial_state(&params);
        let bars = trending_bars(60);
        let mut report = analyze_market(&bars, "spy", "1m", &params, &mut state, None).unwrap();

        let encoded = serde_json::to_string(&report).expect("report must serialize");
        let mut decoded: AnalysisReport = serde_json::from_str(&encoded).expect("report must deserialize");

        // generated_at is wall-clock and excluded from the structural comparison.
        report.generated_at = decoded.generated_at;
        decoded.generated_at = report.generated_at;

        assert_eq!(report.ticker, decoded.ticker);
        assert_eq!(report.tf, decoded.tf);
        assert_eq!(report.bar_count, decoded.bar_count);
        assert_eq!(report.data_gaps, decoded.data_gaps);
        assert_eq!(report.volume_quality, decoded.volume_quality);
        assert_eq!(report.market_state, decoded.market_state);
        assert_eq!(report.zones, decoded.zones);
        assert_eq!(report.signals, decoded.signals);
        assert_eq!(report.behavior, decoded.behavior);
        assert_eq!(report.timeline, decoded.timeline);
        assert_eq!(report.playbook, decoded.playbook);
    }
}
