//! 0DTE setup detectors (spec.md §4.9): R1 breakout, S1 breakdown, YC
//! reclaim, R1 rejection. Each scans one `AnalysisSnapshot` and reports how
//! close the setup is to a live entry.

use super::config::{get_armed_distance, get_buffer, get_watch_distance, SimTraderConfig};
use super::types::{
    AnalysisSnapshot, BehaviorLabel, BreakoutQuality, RiskLevel, RvolState, SetupType, TradeDirection, TradeStatus, Trend,
};
use chrono::{DateTime, Timelike, Utc};

#[derive(Debug, Clone)]
pub struct SetupResult {
    pub detected: bool,
    pub setup_type: Option<SetupType>,
    pub direction: TradeDirection,
    pub status: TradeStatus,
    pub key_level: Option<f64>,
    pub key_level_name: Option<String>,
    pub target_level: Option<f64>,
    pub target_name: Option<String>,
    pub invalidation_level: Option<f64>,
    pub risk: RiskLevel,
    pub reasons: Vec<String>,
    pub confirm_count: u32,
}

fn undetected(setup_type: Option<SetupType>, reasons: Vec<String>) -> SetupResult {
    SetupResult {
        detected: false,
        setup_type,
        direction: TradeDirection::None,
        status: TradeStatus::Wait,
        key_level: None,
        key_level_name: None,
        target_level: None,
        target_name: None,
        invalidation_level: None,
        risk: RiskLevel::Med,
        reasons,
        confirm_count: 0,
    }
}

/// Tracks the per-setup confirmation counters the state machine carries
/// across bars (the only mutable memory these detectors need).
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupState {
    pub r1_confirm: u32,
    pub s1_confirm: u32,
    pub yc_confirm: u32,
    pub r1_reject_confirm: u32,
    pub was_below_yc: bool,
    pub touched_r1: bool,
}

fn minutes_since_midnight(ts: DateTime<Utc>) -> i64 {
    ts.hour() as i64 * 60 + ts.minute() as i64
}

fn is_opening_protection(ts: DateTime<Utc>, config: &SimTraderConfig) -> bool {
    let open = 9 * 60 + 30;
    let m = minutes_since_midnight(ts);
    m >= open && m < open + config.opening_protection_minutes
}

pub fn check_r1_breakout(snapshot: &AnalysisSnapshot, confirm_count: u32, config: &SimTraderConfig) -> SetupResult {
    let r1 = match snapshot.levels.r1 {
        Some(v) => v,
        None => return undetected(Some(SetupType::R1Breakout), vec!["No R1 level available".to_string()]),
    };
    let price = snapshot.price.close;
    let buffer = get_buffer(price, config);
    let distance = r1 - price;
    let trend_ok = snapshot.signals.trend_1m == Trend::Up;
    let breakout_ok = matches!(snapshot.signals.breakout_quality, Some(BreakoutQuality::Pass) | None);
    let mut rvol_ok = snapshot.signals.rvol_state != RvolState::Low;
    if config.opening_require_high_rvol && is_opening_protection(snapshot.ts, config) {
        rvol_ok = snapshot.signals.rvol_state == RvolState::High;
    }

    if price > r1 + buffer {
        let new_confirm = if price > r1 { confirm_count + 1 } else { 0 };
        let status = if new_confirm >= config.confirm_bars && trend_ok && breakout_ok && rvol_ok {
            TradeStatus::Enter
        } else {
            TradeStatus::Armed
        };
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::R1Breakout),
            direction: TradeDirection::Call,
            status,
            key_level: Some(r1),
            key_level_name: Some("R1".to_string()),
            target_level: snapshot.levels.r2,
            target_name: snapshot.levels.r2.map(|_| "R2".to_string()),
            invalidation_level: Some(r1 - buffer),
            risk: if trend_ok && rvol_ok { RiskLevel::Low } else { RiskLevel::Med },
            reasons: vec![format!("price {:.2} broke above R1 {:.2}", price, r1)],
            confirm_count: new_confirm,
        };
    }

    if distance <= get_armed_distance(price, config) {
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::R1Breakout),
            direction: TradeDirection::Call,
            status: TradeStatus::Armed,
            key_level: Some(r1),
            key_level_name: Some("R1".to_string()),
            target_level: snapshot.levels.r2,
            target_name: snapshot.levels.r2.map(|_| "R2".to_string()),
            invalidation_level: Some(r1 - buffer),
            risk: RiskLevel::Med,
            reasons: vec![format!("price {:.2} approaching R1 {:.2}", price, r1)],
            confirm_count: 0,
        };
    }

    if distance <= get_watch_distance(price, config) {
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::R1Breakout),
            direction: TradeDirection::Call,
            status: TradeStatus::Watch,
            key_level: Some(r1),
            key_level_name: Some("R1".to_string()),
            target_level: snapshot.levels.r2,
            target_name: snapshot.levels.r2.map(|_| "R2".to_string()),
            invalidation_level: Some(r1 - buffer),
            risk: RiskLevel::Med,
            reasons: vec![format!("price {:.2} within watch distance of R1 {:.2}", price, r1)],
            confirm_count: 0,
        };
    }

    undetected(Some(SetupType::R1Breakout), vec!["Too far from R1".to_string()])
}

pub fn check_s1_breakdown(snapshot: &AnalysisSnapshot, confirm_count: u32, config: &SimTraderConfig) -> SetupResult {
    let s1 = match snapshot.levels.s1 {
        Some(v) => v,
        None => return undetected(Some(SetupType::S1Breakdown), vec!["No S1 level available".to_string()]),
    };
    let price = snapshot.price.close;
    let buffer = get_buffer(price, config);
    let distance = price - s1;
    let trend_ok = snapshot.signals.trend_1m == Trend::Down;
    let breakout_ok = matches!(snapshot.signals.breakout_quality, Some(BreakoutQuality::Pass) | None);
    let mut rvol_ok = snapshot.signals.rvol_state != RvolState::Low;
    if config.opening_require_high_rvol && is_opening_protection(snapshot.ts, config) {
        rvol_ok = snapshot.signals.rvol_state == RvolState::High;
    }

    if price < s1 - buffer {
        let new_confirm = if price < s1 { confirm_count + 1 } else { 0 };
        let status = if new_confirm >= config.confirm_bars && trend_ok && breakout_ok && rvol_ok {
            TradeStatus::Enter
        } else {
            TradeStatus::Armed
        };
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::S1Breakdown),
            direction: TradeDirection::Put,
            status,
            key_level: Some(s1),
            key_level_name: Some("S1".to_string()),
            target_level: snapshot.levels.s2,
            target_name: snapshot.levels.s2.map(|_| "S2".to_string()),
            invalidation_level: Some(s1 + buffer),
            risk: if trend_ok && rvol_ok { RiskLevel::Low } else { RiskLevel::Med },
            reasons: vec![format!("price {:.2} broke below S1 {:.2}", price, s1)],
            confirm_count: new_confirm,
        };
    }

    if distance <= get_armed_distance(price, config) {
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::S1Breakdown),
            direction: TradeDirection::Put,
            status: TradeStatus::Armed,
            key_level: Some(s1),
            key_level_name: Some("S1".to_string()),
            target_level: snapshot.levels.s2,
            target_name: snapshot.levels.s2.map(|_| "S2".to_string()),
            invalidation_level: Some(s1 + buffer),
            risk: RiskLevel::Med,
            reasons: vec![format!("price {:.2} approaching S1 {:.2}", price, s1)],
            confirm_count: 0,
        };
    }

    if distance <= get_watch_distance(price, config) {
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::S1Breakdown),
            direction: TradeDirection::Put,
            status: TradeStatus::Watch,
            key_level: Some(s1),
            key_level_name: Some("S1".to_string()),
            target_level: snapshot.levels.s2,
            target_name: snapshot.levels.s2.map(|_| "S2".to_string()),
            invalidation_level: Some(s1 + buffer),
            risk: RiskLevel::Med,
            reasons: vec![format!("price {:.2} within watch distance of S1 {:.2}", price, s1)],
            confirm_count: 0,
        };
    }

    undetected(Some(SetupType::S1Breakdown), vec!["Too far from S1".to_string()])
}

pub fn check_yc_reclaim(snapshot: &AnalysisSnapshot, confirm_count: u32, was_below_yc: bool, config: &SimTraderConfig) -> SetupResult {
    let yc = match snapshot.levels.yc {
        Some(v) => v,
        None => return undetected(Some(SetupType::YcReclaim), vec!["No yesterday close level".to_string()]),
    };
    let price = snapshot.price.close;
    let buffer = get_buffer(price, config);

    if price < yc {
        return undetected(Some(SetupType::YcReclaim), vec!["Below yesterday close, tracking".to_string()]);
    }
    if !was_below_yc {
        return undetected(None, vec!["Never traded below yesterday close".to_string()]);
    }

    if price > yc + buffer {
        let new_confirm = confirm_count + 1;
        let trend_ok = snapshot.signals.trend_1m != Trend::Down;
        let status = if new_confirm >= config.confirm_bars && trend_ok {
            TradeStatus::Enter
        } else {
            TradeStatus::Armed
        };
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::YcReclaim),
            direction: TradeDirection::Call,
            status,
            key_level: Some(yc),
            key_level_name: Some("YC".to_string()),
            target_level: snapshot.levels.r1,
            target_name: snapshot.levels.r1.map(|_| "R1".to_string()),
            invalidation_level: Some(yc - buffer),
            risk: RiskLevel::Med,
            reasons: vec![format!("price {:.2} reclaimed yesterday close {:.2}", price, yc)],
            confirm_count: new_confirm,
        };
    }

    SetupResult {
        detected: true,
        setup_type: Some(SetupType::YcReclaim),
        direction: TradeDirection::Call,
        status: TradeStatus::Watch,
        key_level: Some(yc),
        key_level_name: Some("YC".to_string()),
        target_level: snapshot.levels.r1,
        target_name: snapshot.levels.r1.map(|_| "R1".to_string()),
        invalidation_level: Some(yc - buffer),
        risk: RiskLevel::Med,
        reasons: vec!["testing yesterday close reclaim".to_string()],
        confirm_count: 0,
    }
}

pub fn check_r1_reject(snapshot: &AnalysisSnapshot, confirm_count: u32, touched_r1: bool, config: &SimTraderConfig) -> SetupResult {
    let r1 = match snapshot.levels.r1 {
        Some(v) => v,
        None => return undetected(Some(SetupType::R1Reject), vec!["No R1 level available".to_string()]),
    };
    let price = snapshot.price.close;
    let buffer = get_buffer(price, config);
    let touched_now = snapshot.price.high >= r1 - buffer;
    if !touched_now && !touched_r1 {
        return undetected(Some(SetupType::R1Reject), vec!["R1 not yet tested".to_string()]);
    }

    let rejected = price < r1 - buffer;
    let trend_ok = snapshot.signals.trend_1m == Trend::Down;
    let behavior_ok = matches!(snapshot.signals.behavior, Some(BehaviorLabel::Distribution) | Some(BehaviorLabel::Wash));

    if rejected {
        let new_confirm = confirm_count + 1;
        let status = if new_confirm >= config.confirm_bars && (trend_ok || behavior_ok) {
            TradeStatus::Enter
        } else {
            TradeStatus::Armed
        };
        return SetupResult {
            detected: true,
            setup_type: Some(SetupType::R1Reject),
            direction: TradeDirection::Put,
            status,
            key_level: Some(r1),
            key_level_name: Some("R1".to_string()),
            target_level: snapshot.levels.s1,
            target_name: snapshot.levels.s1.map(|_| "S1".to_string()),
            invalidation_level: Some(r1 + buffer),
            risk: if trend_ok || behavior_ok { RiskLevel::Low } else { RiskLevel::Med },
            reasons: vec![format!("price {:.2} rejected from R1 {:.2}", price, r1)],
            confirm_count: new_confirm,
        };
    }

    SetupResult {
        detected: true,
        setup_type: Some(SetupType::R1Reject),
        direction: TradeDirection::Put,
        status: TradeStatus::Watch,
        key_level: Some(r1),
        key_level_name: Some("R1".to_string()),
        target_level: snapshot.levels.s1,
        target_name: snapshot.levels.s1.map(|_| "S1".to_string()),
        invalidation_level: Some(r1 + buffer),
        risk: RiskLevel::Med,
        reasons: vec!["watching for R1 rejection".to_string()],
        confirm_count: 0,
    }
}

fn status_priority(status: TradeStatus) -> u8 {
    match status {
        TradeStatus::Enter => 0,
        TradeStatus::Armed => 1,
        TradeStatus::Watch => 2,
        _ => 3,
    }
}

fn risk_priority(risk: RiskLevel) -> u8 {
    match risk {
        RiskLevel::Low => 0,
        RiskLevel::Med => 1,
        RiskLevel::High => 2,
    }
}

/// Run all four detectors and return the best candidate: lowest status
/// priority (ENTER beats ARMED beats WATCH), then lowest risk.
pub fn detect_best_setup(snapshot: &AnalysisSnapshot, state: &SetupState, config: &SimTraderConfig) -> SetupResult {
    let candidates = [
        check_r1_breakout(snapshot, state.r1_confirm, config),
        check_s1_breakdown(snapshot, state.s1_confirm, config),
        check_yc_reclaim(snapshot, state.yc_confirm, state.was_below_yc, config),
        check_r1_reject(snapshot, state.r1_reject_confirm, state.touched_r1, config),
    ];

    candidates
        .into_iter()
        .filter(|r| r.detected)
        .min_by_key(|r| (status_priority(r.status), risk_priority(r.risk)))
        .unwrap_or_else(|| undetected(None, vec!["No setup detected".to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(close: f64, high: f64, r1: Option<f64>, trend: Trend, rvol: RvolState) -> AnalysisSnapshot {
        AnalysisSnapshot {
            ts: Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap(),
            price: super::super::types::PriceData { open: close, high, low: close, close },
            levels: super::super::types::LevelsData { r1, r2: None, s1: None, s2: None, yc: None, yh: None, yl: None },
            signals: super::super::types::SignalsData {
                trend_1m: trend,
                rvol_state: rvol,
                breakout_quality: None,
                behavior: None,
            },
        }
    }

    #[test]
    fn r1_breakout_enters_after_confirm_bars() {
        let config = SimTraderConfig::default();
        let snap = snapshot(625.0, 625.2, Some(624.0), Trend::Up, RvolState::Ok);
        let r1 = check_r1_breakout(&snap, 1, &config);
        assert!(r1.detected);
        assert_eq!(r1.status, TradeStatus::Enter);
        assert_eq!(r1.confirm_count, 2);
    }

    #[test]
    fn r1_breakout_missing_level_is_undetected() {
        let config = SimTraderConfig::default();
        let snap = snapshot(625.0, 625.2, None, Trend::Up, RvolState::Ok);
        let r1 = check_r1_breakout(&snap, 0, &config);
        assert!(!r1.detected);
    }

    #[test]
    fn detect_best_setup_prefers_enter_over_armed() {
        let config = SimTraderConfig::default();
        let state = SetupState { r1_confirm: 1, ..Default::default() };
        let snap = snapshot(625.0, 625.2, Some(624.0), Trend::Up, RvolState::Ok);
        let best = detect_best_setup(&snap, &state, &config);
        assert_eq!(best.status, TradeStatus::Enter);
    }
}
