//! 3-factor breakout/fakeout finite-state machine (C3, spec.md §4.3).
//!
//! Fed one bar at a time, in order. No exceptions in the hot path: NaN
//! RVOL/result simply fail to contribute a factor for that bar.

use crate::types::{Bar, Direction, Signal, SignalType, VolumeQuality, Zones};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakoutState {
    Idle,
    Attempt,
    Confirmed,
    Fakeout,
}

impl BreakoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakoutState::Idle => "idle",
            BreakoutState::Attempt => "attempt",
            BreakoutState::Confirmed => "confirmed",
            BreakoutState::Fakeout => "fakeout",
        }
    }
}

#[derive(Debug, Clone)]
struct Attempt {
    zone_low: f64,
    zone_high: f64,
    direction: Direction,
    attempt_bar_index: i64,
    consecutive_closes: u32,
    max_rvol_seen: f64,
    max_result_seen: f64,
}

fn running_max(current: f64, incoming: f64) -> f64 {
    if incoming.is_nan() {
        current
    } else if current.is_nan() {
        incoming
    } else {
        current.max(incoming)
    }
}

#[derive(Debug, Clone)]
pub struct BreakoutFsm {
    volume_threshold: f64,
    result_threshold: f64,
    confirm_closes: u32,
    fakeout_bars: i64,
    state: BreakoutState,
    attempt: Option<Attempt>,
}

impl Default for BreakoutFsm {
    fn default() -> Self {
        Self::new(1.8, 0.6, 2, 3)
    }
}

impl BreakoutFsm {
    pub fn new(volume_threshold: f64, result_threshold: f64, confirm_closes: u32, fakeout_bars: i64) -> Self {
        Self {
            volume_threshold,
            result_threshold,
            confirm_closes,
            fakeout_bars,
            state: BreakoutState::Idle,
            attempt: None,
        }
    }

    pub fn state(&self) -> BreakoutState {
        self.state
    }

    pub fn state_str(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn reset(&mut self) {
        self.state = BreakoutState::Idle;
        self.attempt = None;
    }

    fn count_factors(&self, consecutive_closes: u32, max_rvol: f64, max_result: f64) -> (u32, bool) {
        let structure = consecutive_closes >= self.confirm_closes;
        let volume = !max_rvol.is_nan() && max_rvol >= self.volume_threshold;
        let result_ok = !max_result.is_nan() && max_result >= self.result_threshold;
        (structure as u32 + volume as u32 + result_ok as u32, structure)
    }

    fn confidence_for(factors: u32) -> f64 {
        match factors {
            0 | 1 => 0.45,
            2 => 0.65,
            _ => 0.85,
        }
    }

    fn volume_quality_for(&self, max_rvol: f64) -> VolumeQuality {
        if max_rvol.is_nan() {
            VolumeQuality::Unavailable
        } else if max_rvol >= self.volume_threshold {
            VolumeQuality::Confirmed
        } else {
            VolumeQuality::Pending
        }
    }

    /// Feed the next bar. `rvol`/`result` should already carry any fallback
    /// the caller applies for missing ATR (spec.md's orchestrator substitutes
    /// the raw bar range when ATR is NaN); this FSM treats NaN as "no factor".
    pub fn update(&mut self, bar: &Bar, bar_index: i64, zones: &Zones, rvol: f64, result: f64) -> Option<Signal> {
        match self.state {
            BreakoutState::Idle => self.check_attempt(bar, bar_index, zones, rvol, result),
            BreakoutState::Attempt => self.check_confirmation(bar, bar_index, rvol, result),
            BreakoutState::Confirmed | BreakoutState::Fakeout => {
                self.reset();
                None
            }
        }
    }

    fn check_attempt(&mut self, bar: &Bar, bar_index: i64, zones: &Zones, rvol: f64, result: f64) -> Option<Signal> {
        for zone in &zones.resistance {
            if bar.high > zone.high {
                let consecutive_closes = if bar.close > zone.high { 1 } else { 0 };
                let max_rvol = if rvol.is_nan() { f64::NAN } else { rvol };
                let max_result = result;
                let (factors, _) = self.count_factors(consecutive_closes, max_rvol, max_result);

                self.state = BreakoutState::Attempt;
                self.attempt = Some(Attempt {
                    zone_low: zone.low,
                    zone_high: zone.high,
                    direction: Direction::Up,
                    attempt_bar_index: bar_index,
                    consecutive_closes,
                    max_rvol_seen: max_rvol,
                    max_result_seen: max_result,
                });

                return Some(Signal {
                    kind: SignalType::BreakoutAttempt,
                    direction: Direction::Up,
                    level: zone.high,
                    confidence: Self::confidence_for(factors),
                    bar_time: bar.timestamp,
                    bar_index,
                    volume_quality: self.volume_quality_for(max_rvol),
                });
            }
        }

        for zone in &zones.support {
            if bar.low < zone.low {
                let consecutive_closes = if bar.close < zone.low { 1 } else { 0 };
                let max_rvol = if rvol.is_nan() { f64::NAN } else { rvol };
                let max_result = result;
                let (factors, _) = self.count_factors(consecutive_closes, max_rvol, max_result);

                self.state = BreakoutState::Attempt;
                self.attempt = Some(Attempt {
                    zone_low: zone.low,
                    zone_high: zone.high,
                    direction: Direction::Down,
                    attempt_bar_index: bar_index,
                    consecutive_closes,
                    max_rvol_seen: max_rvol,
                    max_result_seen: max_result,
                });

                return Some(Signal {
                    kind: SignalType::BreakoutAttempt,
                    direction: Direction::Down,
                    level: zone.low,
                    confidence: Self::confidence_for(factors),
                    bar_time: bar.timestamp,
                    bar_index,
                    volume_quality: self.volume_quality_for(max_rvol),
                });
            }
        }

        None
    }

    fn check_confirmation(&mut self, bar: &Bar, bar_index: i64, rvol: f64, result: f64) -> Option<Signal> {
        let (direction, zone_low, zone_high, attempt_bar_index, still_outside, factors, structure_ok, max_rvol, bars_since_attempt) = {
            let attempt = self.attempt.as_mut().expect("ATTEMPT state implies an attempt record");
            attempt.max_rvol_seen = running_max(attempt.max_rvol_seen, rvol);
            attempt.max_result_seen = running_max(attempt.max_result_seen, result);

            let still_outside = match attempt.direction {
                Direction::Up => bar.close > attempt.zone_high,
                Direction::Down => bar.close < attempt.zone_low,
            };
            if still_outside {
                attempt.consecutive_closes += 1;
            } else {
                attempt.consecutive_closes = 0;
            }

            let (factors, structure_ok) = self.count_factors(attempt.consecutive_closes, attempt.max_rvol_seen, attempt.max_result_seen);
            let bars_since_attempt = bar_index - attempt.attempt_bar_index;

            (
                attempt.direction,
                attempt.zone_low,
                attempt.zone_high,
                attempt.attempt_bar_index,
                still_outside,
                factors,
                structure_ok,
                attempt.max_rvol_seen,
                bars_since_attempt,
            )
        };
        let _ = (zone_low, zone_high, attempt_bar_index);

        if factors >= 3 || (factors == 2 && structure_ok) {
            self.state = BreakoutState::Confirmed;
            let level = match direction {
                Direction::Up => zone_high,
                Direction::Down => zone_low,
            };
            return Some(Signal {
                kind: SignalType::BreakoutConfirmed,
                direction,
                level,
                confidence: 0.85,
                bar_time: bar.timestamp,
                bar_index,
                volume_quality: self.volume_quality_for(max_rvol),
            });
        }

        if !still_outside && bars_since_attempt <= self.fakeout_bars {
            self.state = BreakoutState::Fakeout;
            let level = match direction {
                Direction::Up => zone_high,
                Direction::Down => zone_low,
            };
            return Some(Signal {
                kind: SignalType::Fakeout,
                direction,
                level,
                confidence: 0.75,
                bar_time: bar.timestamp,
                bar_index,
                volume_quality: self.volume_quality_for(max_rvol),
            });
        }

        if bars_since_attempt > self.fakeout_bars * 2 {
            self.reset();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Zone;
    use chrono::{TimeZone, Utc};

    fn bar(t: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1e6,
            vwap: None,
        }
    }

    fn resistance_zone() -> Zones {
        Zones {
            support: vec![],
            resistance: vec![Zone {
                low: 99.0,
                high: 100.0,
                score: 0.8,
                touches: 3,
                rejections: 2,
                last_reaction: 1.0,
                last_test_time: None,
            }],
        }
    }

    #[test]
    fn terminal_states_last_one_tick() {
        let mut fsm = BreakoutFsm::new(1.8, 0.6, 2, 3);
        let zones = resistance_zone();

        fsm.update(&bar(0, 100.1, 100.6, 100.0, 100.5), 0, &zones, 2.0, 1.0);
        assert_eq!(fsm.state(), BreakoutState::Attempt);
        let sig = fsm.update(&bar(60, 100.5, 101.0, 100.4, 100.9), 1, &zones, 2.0, 1.0);
        assert_eq!(fsm.state(), BreakoutState::Confirmed);
        assert!(sig.is_some());

        let after = fsm.update(&bar(120, 100.9, 101.1, 100.7, 101.0), 2, &zones, 1.0, 0.5);
        assert!(after.is_none());
        assert_eq!(fsm.state(), BreakoutState::Idle);
    }

    #[test]
    fn fakeout_detected_within_window() {
        let mut fsm = BreakoutFsm::new(1.8, 0.6, 2, 3);
        let zones = resistance_zone();

        fsm.update(&bar(0, 100.1, 100.6, 100.0, 100.5), 0, &zones, 1.0, 0.5);
        assert_eq!(fsm.state(), BreakoutState::Attempt);

        let sig = fsm.update(&bar(60, 100.4, 100.5, 99.8, 99.9), 1, &zones, 1.0, 0.3);
        assert_eq!(fsm.state(), BreakoutState::Fakeout);
        let sig = sig.unwrap();
        assert_eq!(sig.kind, SignalType::Fakeout);
        assert!((sig.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn nan_rvol_never_satisfies_volume_factor() {
        let mut fsm = BreakoutFsm::new(1.8, 0.6, 2, 3);
        let zones = resistance_zone();
        let sig = fsm.update(&bar(0, 100.1, 100.6, 100.0, 100.5), 0, &zones, f64::NAN, 1.0).unwrap();
        assert_eq!(sig.volume_quality, VolumeQuality::Unavailable);
    }
}
