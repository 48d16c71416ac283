//! Hard/soft event timeline (C5, spec.md §4.5).
//!
//! `TimelineManager` keeps a snapshot of the previous update's state
//! (regime, dominant behavior, behavior probabilities, breakout FSM state,
//! latest swing indices) and diffs it against the incoming one to decide
//! which hard events fire. Soft events are a market-narrative fallback,
//! generated only when no hard event fired on the bar, capped at 2.

use crate::types::{Bar, Behavior, BehaviorPhase, EventSeverity, MarketState, Regime, SwingPoint, TimelineEvent, Zone, Zones};
use std::collections::{HashMap, VecDeque};

const MAX_EVENTS: usize = 50;

fn severity_for(event_type: &str) -> EventSeverity {
    match event_type {
        "zone_accepted" | "breakout_confirmed" | "regime_change" | "spring" | "upthrust" => EventSeverity::Critical,
        "behavior_shift" | "fakeout_detected" | "volume_spike" | "absorption_clue" => EventSeverity::Warning,
        _ => EventSeverity::Info,
    }
}

#[derive(Debug, Clone)]
struct TimelineState {
    regime: Regime,
    dominant_behavior: BehaviorPhase,
    behavior_probabilities: HashMap<BehaviorPhase, f64>,
    breakout_state: String,
    last_swing_high_idx: i64,
    last_swing_low_idx: i64,
}

fn hard_events(old: Option<&TimelineState>, new: &TimelineState, probability_threshold: f64) -> Vec<(String, f64, String)> {
    let Some(old) = old else {
        return vec![(
            "initialized".to_string(),
            0.0,
            format!("event.initialized.{:?}_{}", new.regime, new.dominant_behavior.as_str()),
        )];
    };

    let mut out = Vec::new();

    if old.regime != new.regime {
        out.push((
            "regime_change".to_string(),
            0.0,
            format!("event.regime_change.{:?}_to_{:?}", old.regime, new.regime),
        ));
    }

    if old.dominant_behavior != new.dominant_behavior {
        out.push((
            "behavior_shift".to_string(),
            0.0,
            format!("event.behavior_shift.{}_to_{}", old.dominant_behavior.as_str(), new.dominant_behavior.as_str()),
        ));
    }

    for phase in BehaviorPhase::ALL {
        let new_prob = new.behavior_probabilities.get(&phase).copied().unwrap_or(0.0);
        let old_prob = old.behavior_probabilities.get(&phase).copied().unwrap_or(0.0);
        let delta = new_prob - old_prob;
        if delta.abs() >= probability_threshold {
            let dir = if delta > 0.0 { "up" } else { "down" };
            out.push((
                format!("{}_prob_{}", phase.as_str(), dir),
                delta,
                format!("event.probability.{}_{}", phase.as_str(), dir),
            ));
        }
    }

    if old.breakout_state != new.breakout_state {
        match new.breakout_state.as_str() {
            "attempt" => out.push(("breakout_attempt".to_string(), 0.0, "event.breakout.attempt".to_string())),
            "confirmed" => out.push(("breakout_confirmed".to_string(), 0.0, "event.breakout.confirmed".to_string())),
            "fakeout" => out.push(("fakeout_detected".to_string(), 0.0, "event.breakout.fakeout".to_string())),
            _ => {}
        }
    }

    out
}

fn resistance_zone_event(zone: &Zone, bar: &Bar, approach_threshold: f64, touch_threshold: f64) -> Option<(String, f64, String)> {
    let zone_mid = zone.mid();
    let dist = zone.low - bar.high;
    if bar.close > zone.high {
        Some(("zone_accepted".to_string(), zone_mid, "event.zone.resistance_accepted".to_string()))
    } else if bar.high >= zone.low && bar.close < zone.low {
        Some(("zone_rejected".to_string(), zone_mid, "event.zone.resistance_rejected".to_string()))
    } else if dist <= touch_threshold && dist >= -touch_threshold {
        Some(("zone_tested".to_string(), zone_mid, "event.zone.resistance_tested".to_string()))
    } else if dist > 0.0 && dist <= approach_threshold {
        Some(("zone_approached".to_string(), zone_mid, "event.zone.resistance_approached".to_string()))
    } else {
        None
    }
}

fn support_zone_event(zone: &Zone, bar: &Bar, approach_threshold: f64, touch_threshold: f64) -> Option<(String, f64, String)> {
    let zone_mid = zone.mid();
    let dist = bar.low - zone.high;
    if bar.close < zone.low {
        Some(("zone_accepted".to_string(), zone_mid, "event.zone.support_accepted".to_string()))
    } else if bar.low <= zone.high && bar.close > zone.high {
        Some(("zone_rejected".to_string(), zone_mid, "event.zone.support_rejected".to_string()))
    } else if dist >= -touch_threshold && dist <= touch_threshold {
        Some(("zone_tested".to_string(), zone_mid, "event.zone.support_tested".to_string()))
    } else if dist < 0.0 && dist >= -approach_threshold {
        Some(("zone_approached".to_string(), zone_mid, "event.zone.support_approached".to_string()))
    } else {
        None
    }
}

/// Reconstruct the soft-event candidates for a single bar, in priority order:
/// zone interaction, Wyckoff micro-pattern, VSA absorption, volume, new swing
/// point. `previous` supplies the swing indices to compare against; pass
/// `None` for a stateless historical scan.
#[allow(clippy::too_many_arguments)]
pub fn generate_soft_events(
    bar: &Bar,
    bar_index: i64,
    zones: &Zones,
    atr: f64,
    rvol: f64,
    effort: f64,
    result: f64,
    swing_highs: &[SwingPoint],
    swing_lows: &[SwingPoint],
    previous_last_swing_high_idx: Option<i64>,
    previous_last_swing_low_idx: Option<i64>,
) -> Vec<(String, f64, String)> {
    let mut events = Vec::new();
    let approach_threshold = 0.5 * atr;
    let touch_threshold = 0.15 * atr;

    for zone in zones.resistance.iter().take(2) {
        if let Some(ev) = resistance_zone_event(zone, bar, approach_threshold, touch_threshold) {
            events.push(ev);
            break;
        }
    }
    for zone in zones.support.iter().take(2) {
        if let Some(ev) = support_zone_event(zone, bar, approach_threshold, touch_threshold) {
            events.push(ev);
            break;
        }
    }

    let bar_range = bar.high - bar.low;
    if bar_range > 0.0 {
        let upper_wick = bar.high - bar.open.max(bar.close);
        let lower_wick = bar.open.min(bar.close) - bar.low;

        for zone in zones.support.iter().take(2) {
            if bar.low < zone.low && bar.close >= zone.low {
                let wick_ratio = lower_wick / bar_range;
                if wick_ratio >= 0.4 {
                    events.push(("spring".to_string(), zone.low, "event.wyckoff.spring".to_string()));
                    break;
                }
            }
        }
        for zone in zones.resistance.iter().take(2) {
            if bar.high > zone.high && bar.close <= zone.high {
                let wick_ratio = upper_wick / bar_range;
                if wick_ratio >= 0.4 {
                    events.push(("upthrust".to_string(), zone.high, "event.wyckoff.upthrust".to_string()));
                    break;
                }
            }
        }
    }

    if !effort.is_nan() && !result.is_nan() && effort >= 1.5 && result <= 0.6 {
        events.push(("absorption_clue".to_string(), effort, "event.vsa.absorption".to_string()));
    }

    if !rvol.is_nan() {
        if rvol >= 2.0 {
            events.push(("volume_spike".to_string(), rvol, "event.volume.spike".to_string()));
        } else if rvol <= 0.5 {
            events.push(("volume_dryup".to_string(), rvol, "event.volume.dryup".to_string()));
        }
    }

    if let (Some(last), Some(prev_idx)) = (swing_highs.last(), previous_last_swing_high_idx) {
        if last.index as i64 > prev_idx && last.index as i64 >= bar_index - 5 {
            events.push(("new_swing_high".to_string(), last.price, "event.swing.new_high".to_string()));
        }
    }
    if let (Some(last), Some(prev_idx)) = (swing_lows.last(), previous_last_swing_low_idx) {
        if last.index as i64 > prev_idx && last.index as i64 >= bar_index - 5 {
            events.push(("new_swing_low".to_string(), last.price, "event.swing.new_low".to_string()));
        }
    }

    events
}

#[derive(Debug, Clone)]
pub struct TimelineManager {
    events: VecDeque<TimelineEvent>,
    previous: Option<TimelineState>,
    probability_threshold: f64,
}

impl Default for TimelineManager {
    fn default() -> Self {
        Self::new(0.12)
    }
}

impl TimelineManager {
    /// `probability_threshold` is spec.md §6's `probability_threshold`
    /// (default 0.12) — the minimum swing in a behavior phase's probability
    /// between updates before a `*_prob_up`/`*_prob_down` hard event fires.
    pub fn new(probability_threshold: f64) -> Self {
        Self {
            events: VecDeque::new(),
            previous: None,
            probability_threshold,
        }
    }

    fn push(&mut self, event: TimelineEvent) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Feed one bar's worth of state. Returns the events emitted this bar
    /// (hard events if any fired, else up to 2 soft events).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        bar: &Bar,
        bar_index: i64,
        market_state: MarketState,
        behavior: &Behavior,
        breakout_state: &str,
        zones: &Zones,
        atr: f64,
        rvol: f64,
        effort: f64,
        result: f64,
        swing_highs: &[SwingPoint],
        swing_lows: &[SwingPoint],
    ) -> Vec<TimelineEvent> {
        let new_state = TimelineState {
            regime: market_state.regime,
            dominant_behavior: behavior.dominant,
            behavior_probabilities: behavior.probabilities.clone(),
            breakout_state: breakout_state.to_string(),
            last_swing_high_idx: swing_highs.last().map(|s| s.index as i64).unwrap_or(-1),
            last_swing_low_idx: swing_lows.last().map(|s| s.index as i64).unwrap_or(-1),
        };

        let hard = hard_events(self.previous.as_ref(), &new_state, self.probability_threshold);

        let soft = if hard.is_empty() && atr > 0.0 {
            generate_soft_events(
                bar,
                bar_index,
                zones,
                atr,
                rvol,
                effort,
                result,
                swing_highs,
                swing_lows,
                self.previous.as_ref().map(|p| p.last_swing_high_idx),
                self.previous.as_ref().map(|p| p.last_swing_low_idx),
            )
        } else {
            Vec::new()
        };

        let mut emitted = Vec::new();
        for (event_type, delta, reason) in hard {
            let severity = severity_for(&event_type);
            let event = TimelineEvent {
                ts: bar.timestamp,
                event_type,
                delta,
                reason,
                bar_index,
                severity,
            };
            self.push(event.clone());
            emitted.push(event);
        }
        for (event_type, delta, reason) in soft.into_iter().take(2) {
            let severity = severity_for(&event_type);
            let event = TimelineEvent {
                ts: bar.timestamp,
                event_type,
                delta,
                reason,
                bar_index,
                severity,
            };
            self.push(event.clone());
            emitted.push(event);
        }

        self.previous = Some(new_state);
        emitted
    }

    /// Most recent `limit` events, newest first.
    pub fn get_events(&self, limit: usize) -> Vec<TimelineEvent> {
        let mut events: Vec<TimelineEvent> = self.events.iter().cloned().collect();
        events.sort_by(|a, b| b.ts.cmp(&a.ts));
        events.truncate(limit);
        events
    }
}

/// Scan the last `min(lookback, bars.len()-1)` bars for historical soft
/// events (no previous-state comparison, so `new_swing_*` never fires here),
/// at most one per bar, oldest first.
#[allow(clippy::too_many_arguments)]
pub fn scan_historical_soft_events(
    bars: &[Bar],
    effort: &[f64],
    result: &[f64],
    rvol: &[f64],
    zones: &Zones,
    atr: f64,
    lookback: usize,
) -> Vec<TimelineEvent> {
    let n = bars.len();
    if n < 2 || atr <= 0.0 {
        return Vec::new();
    }
    let span = lookback.min(n - 1);
    let start = n - span;
    (start..n)
        .filter_map(|i| {
            generate_soft_events(&bars[i], i as i64, zones, atr, rvol[i], effort[i], result[i], &[], &[], None, None)
                .into_iter()
                .next()
                .map(|(event_type, delta, reason)| TimelineEvent {
                    ts: bars[i].timestamp,
                    severity: severity_for(&event_type),
                    event_type,
                    delta,
                    reason,
                    bar_index: i as i64,
                })
        })
        .collect()
}

/// Merge hard/soft events from `update()` with historical soft-event topup
/// when fewer than 5 events accumulated. Dedupes by `event_type`, caps at 8,
/// sorts newest first.
pub fn merge_events(recent: Vec<TimelineEvent>, historical: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    let mut merged = recent;
    if merged.len() < 5 {
        let mut seen: std::collections::HashSet<String> = merged.iter().map(|e| e.event_type.clone()).collect();
        for event in historical.into_iter().rev().take(5) {
            if merged.len() >= 8 {
                break;
            }
            if seen.insert(event.event_type.clone()) {
                merged.push(event);
            }
        }
    }
    merged.sort_by(|a, b| b.ts.cmp(&a.ts));
    merged.truncate(8);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BehaviorPhase;
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

    fn behavior(dominant: BehaviorPhase) -> Behavior {
        let mut probabilities = HashMap::new();
        for phase in BehaviorPhase::ALL {
            probabilities.insert(phase, if phase == dominant { 0.6 } else { 0.1 });
        }
        Behavior { probabilities, dominant, evidence: vec![] }
    }

    #[test]
    fn first_update_emits_initialized() {
        let mut mgr = TimelineManager::new(0.12);
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let emitted = mgr.update(
            &b, 0,
            MarketState { regime: Regime::Range, confidence: 0.5 },
            &behavior(BehaviorPhase::Accumulation),
            "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[],
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type, "initialized");
    }

    #[test]
    fn regime_change_emits_one_hard_event() {
        let mut mgr = TimelineManager::new(0.12);
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let beh = behavior(BehaviorPhase::Accumulation);
        mgr.update(&b, 0, MarketState { regime: Regime::Range, confidence: 0.5 }, &beh, "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);

        let emitted = mgr.update(
            &b, 1,
            MarketState { regime: Regime::Uptrend, confidence: 0.7 },
            &beh, "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[],
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type, "regime_change");
        assert_eq!(emitted[0].severity, EventSeverity::Critical);
    }

    #[test]
    fn breakout_state_transition_emits_confirmed() {
        let mut mgr = TimelineManager::new(0.12);
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let beh = behavior(BehaviorPhase::Markup);
        mgr.update(&b, 0, MarketState { regime: Regime::Uptrend, confidence: 0.7 }, &beh, "attempt", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);
        let emitted = mgr.update(&b, 1, MarketState { regime: Regime::Uptrend, confidence: 0.7 }, &beh, "confirmed", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type, "breakout_confirmed");
        assert_eq!(emitted[0].severity, EventSeverity::Critical);
    }

    #[test]
    fn behavior_probability_spike_emits_prob_event() {
        let mut mgr = TimelineManager::new(0.12);
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let ms = MarketState { regime: Regime::Range, confidence: 0.5 };
        mgr.update(&b, 0, ms, &behavior(BehaviorPhase::Accumulation), "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);

        let mut probabilities = HashMap::new();
        for phase in BehaviorPhase::ALL {
            probabilities.insert(phase, 0.2);
        }
        probabilities.insert(BehaviorPhase::Accumulation, 0.2);
        let shaken = Behavior { probabilities, dominant: BehaviorPhase::Accumulation, evidence: vec![] };
        let emitted = mgr.update(&b, 1, ms, &shaken, "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);
        assert!(emitted.iter().any(|e| e.event_type == "accumulation_prob_down"));
    }

    #[test]
    fn ring_buffer_caps_at_max_events() {
        let mut mgr = TimelineManager::new(0.12);
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let beh = behavior(BehaviorPhase::Accumulation);
        let mut regime = Regime::Range;
        for i in 0..(MAX_EVENTS as i64 + 10) {
            regime = if regime == Regime::Range { Regime::Uptrend } else { Regime::Range };
            mgr.update(&b, i, MarketState { regime, confidence: 0.6 }, &beh, "idle", &Zones::default(), 1.0, 1.0, f64::NAN, f64::NAN, &[], &[]);
        }
        assert!(mgr.get_events(1000).len() <= MAX_EVENTS);
    }

    #[test]
    fn zone_accepted_is_critical_per_spec_severity_table() {
        let zones = Zones {
            support: vec![],
            resistance: vec![Zone { low: 99.0, high: 100.0, score: 0.8, touches: 3, rejections: 2, last_reaction: 1.0, last_test_time: None }],
        };
        let b = bar(0, 100.2, 100.8, 100.1, 100.5, 1e6);
        let events = generate_soft_events(&b, 0, &zones, 1.0, f64::NAN, f64::NAN, f64::NAN, &[], &[], None, None);
        assert_eq!(events[0].0, "zone_accepted");
        assert_eq!(severity_for(&events[0].0), EventSeverity::Critical);
    }

    #[test]
    fn spring_detected_after_support_pierce_and_reclaim() {
        let zones = Zones {
            support: vec![Zone { low: 99.0, high: 100.0, score: 0.8, touches: 3, rejections: 2, last_reaction: 1.0, last_test_time: None }],
            resistance: vec![],
        };
        let b = bar(0, 99.2, 99.3, 98.0, 99.3, 1e6);
        let events = generate_soft_events(&b, 0, &zones, 1.0, f64::NAN, f64::NAN, f64::NAN, &[], &[], None, None);
        assert!(events.iter().any(|(t, ..)| t == "spring"));
    }

    #[test]
    fn merge_prefers_recent_events_and_dedupes() {
        let b = bar(0, 100.0, 101.0, 99.0, 100.5, 1e6);
        let hard = vec![TimelineEvent {
            ts: b.timestamp,
            event_type: "breakout_confirmed".to_string(),
            delta: 1.0,
            reason: "event.breakout.confirmed".to_string(),
            bar_index: 0,
            severity: EventSeverity::Critical,
        }];
        let historical = vec![TimelineEvent {
            ts: b.timestamp,
            event_type: "breakout_confirmed".to_string(),
            delta: 0.0,
            reason: "dup".to_string(),
            bar_index: 1,
            severity: EventSeverity::Info,
        }];
        let merged = merge_events(hard, historical);
        assert_eq!(merged.len(), 1);
    }
}
