//! Position management: HOLD/TRIM/EXIT advice for an open plan (spec.md §4.9).

use super::config::{get_buffer, SimTraderConfig};
use super::types::{AnalysisSnapshot, BehaviorLabel, BreakoutQuality, RvolState, TradeDirection, TradePlanRow, TradeStatus, Trend};

#[derive(Debug, Clone)]
pub struct ManageAdvice {
    pub action: TradeStatus,
    pub reasons: Vec<String>,
    pub urgency: &'static str,
}

pub fn check_exit_conditions(snapshot: &AnalysisSnapshot, plan: &TradePlanRow, config: &SimTraderConfig) -> Option<ManageAdvice> {
    let mut reasons = Vec::new();
    let price = snapshot.price.close;

    if let Some(key_level) = plan.key_level {
        let buffer = get_buffer(price, config);
        match plan.direction {
            TradeDirection::Call if price < key_level - buffer => {
                reasons.push(format!("price {price:.2} broke below invalidation {key_level:.2}"));
            }
            TradeDirection::Put if price > key_level + buffer => {
                reasons.push(format!("price {price:.2} broke above invalidation {key_level:.2}"));
            }
            _ => {}
        }
    }

    match plan.direction {
        TradeDirection::Call if snapshot.signals.trend_1m == Trend::Down => {
            reasons.push("trend reversed against call".to_string());
        }
        TradeDirection::Put if snapshot.signals.trend_1m == Trend::Up => {
            reasons.push("trend reversed against put".to_string());
        }
        _ => {}
    }

    match plan.direction {
        TradeDirection::Call
            if matches!(snapshot.signals.behavior, Some(BehaviorLabel::Distribution) | Some(BehaviorLabel::Wash)) =>
        {
            reasons.push("distribution/wash behavior against call".to_string());
        }
        TradeDirection::Put
            if matches!(snapshot.signals.behavior, Some(BehaviorLabel::Accumulation) | Some(BehaviorLabel::Markup)) =>
        {
            reasons.push("accumulation/markup behavior against put".to_string());
        }
        _ => {}
    }

    if reasons.is_empty() {
        None
    } else {
        Some(ManageAdvice { action: TradeStatus::Exit, reasons, urgency: "urgent" })
    }
}

pub fn check_trim_conditions(snapshot: &AnalysisSnapshot, plan: &TradePlanRow, config: &SimTraderConfig) -> Option<ManageAdvice> {
    let mut reasons = Vec::new();

    if let (Some(bars_since_entry), Some(entry_price)) = (plan.bars_since_entry, plan.entry_price) {
        if bars_since_entry >= config.time_stop_minutes {
            let progress = match plan.direction {
                TradeDirection::Call => (snapshot.price.close - entry_price) / entry_price,
                TradeDirection::Put => (entry_price - snapshot.price.close) / entry_price,
                TradeDirection::None => 0.0,
            };
            if progress < 0.001 {
                reasons.push(format!("time stop: {bars_since_entry} bars with no progress"));
            }
        }
    }

    if plan.target_attempts >= config.max_target_attempts {
        reasons.push("target tested too many times".to_string());
    }

    if snapshot.signals.rvol_state == RvolState::Low && matches!(snapshot.signals.behavior, Some(BehaviorLabel::Chop)) {
        reasons.push("momentum fading: low rvol and choppy behavior".to_string());
    }

    if reasons.is_empty() {
        None
    } else {
        Some(ManageAdvice { action: TradeStatus::Trim, reasons, urgency: "normal" })
    }
}

pub fn check_hold_conditions(snapshot: &AnalysisSnapshot, plan: &TradePlanRow) -> ManageAdvice {
    let mut reasons = Vec::new();

    if plan.key_level.is_some() {
        reasons.push("structure intact".to_string());
    }
    if let Some(entry_price) = plan.entry_price {
        let favorable = match plan.direction {
            TradeDirection::Call => snapshot.price.close > entry_price,
            TradeDirection::Put => snapshot.price.close < entry_price,
            TradeDirection::None => false,
        };
        if favorable {
            reasons.push("position progressing".to_string());
        }
    }
    if matches!(snapshot.signals.breakout_quality, Some(BreakoutQuality::Pass)) {
        reasons.push("breakout quality pass".to_string());
    }
    if reasons.is_empty() {
        reasons.push("No adverse conditions detected".to_string());
    }

    ManageAdvice { action: TradeStatus::Hold, reasons, urgency: "normal" }
}

/// Priority EXIT > TRIM > HOLD.
pub fn manage_position(snapshot: &AnalysisSnapshot, plan: &TradePlanRow, config: &SimTraderConfig) -> ManageAdvice {
    if let Some(advice) = check_exit_conditions(snapshot, plan, config) {
        return advice;
    }
    if let Some(advice) = check_trim_conditions(snapshot, plan, config) {
        return advice;
    }
    check_hold_conditions(snapshot, plan)
}

/// Bump `target_attempts` when price touches but fails to break the target.
pub fn update_target_attempts(snapshot: &AnalysisSnapshot, plan: &mut TradePlanRow) {
    let Some(target) = plan.target_level else { return };
    match plan.direction {
        TradeDirection::Call if snapshot.price.high >= target * 0.999 && snapshot.price.close < target => {
            plan.target_attempts += 1;
        }
        TradeDirection::Put if snapshot.price.low <= target * 1.001 && snapshot.price.close > target => {
            plan.target_attempts += 1;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{LevelsData, PriceData, RiskLevel, RvolState as Rv, SetupType, SignalsData};
    use chrono::{TimeZone, Utc};

    fn snapshot(close: f64, trend: Trend, behavior: Option<BehaviorLabel>) -> AnalysisSnapshot {
        AnalysisSnapshot {
            ts: Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap(),
            price: PriceData { open: close, high: close, low: close, close },
            levels: LevelsData::default(),
            signals: SignalsData { trend_1m: trend, rvol_state: Rv::Ok, breakout_quality: None, behavior },
        }
    }

    fn plan(direction: TradeDirection, key_level: Option<f64>) -> TradePlanRow {
        TradePlanRow {
            ts: Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap(),
            status: TradeStatus::Hold,
            direction,
            risk: RiskLevel::Med,
            reasons: vec![],
            confirm_count: 0,
            setup_type: Some(SetupType::R1Breakout),
            key_level,
            key_level_name: None,
            target_level: Some(630.0),
            target_name: None,
            invalidation_level: key_level,
            entry_price: Some(625.0),
            entry_ts: Some(Utc.with_ymd_and_hms(2026, 1, 15, 13, 50, 0).unwrap()),
            bars_since_entry: Some(1),
            target_attempts: 0,
        }
    }

    #[test]
    fn exit_triggers_on_invalidation_break() {
        let config = SimTraderConfig::default();
        let snap = snapshot(620.0, Trend::Up, None);
        let p = plan(TradeDirection::Call, Some(624.0));
        let advice = check_exit_conditions(&snap, &p, &config).unwrap();
        assert_eq!(advice.action, TradeStatus::Exit);
        assert_eq!(advice.urgency, "urgent");
    }

    #[test]
    fn hold_when_nothing_adverse() {
        let config = SimTraderConfig::default();
        let snap = snapshot(626.0, Trend::Up, None);
        let p = plan(TradeDirection::Call, Some(624.0));
        let advice = manage_position(&snap, &p, &config);
        assert_eq!(advice.action, TradeStatus::Hold);
    }

    #[test]
    fn target_attempt_increments_on_touch_and_fail() {
        let snap = AnalysisSnapshot {
            ts: Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap(),
            price: PriceData { open: 629.0, high: 630.1, low: 628.0, close: 629.5 },
            levels: LevelsData::default(),
            signals: SignalsData { trend_1m: Trend::Up, rvol_state: Rv::Ok, breakout_quality: None, behavior: None },
        };
        let mut p = plan(TradeDirection::Call, Some(624.0));
        update_target_attempts(&snap, &mut p);
        assert_eq!(p.target_attempts, 1);
    }
}
