//! Extended-hours session context (C7, spec.md §4.7).
//!
//! Session classification is grounded in spec.md's boundary text directly —
//! the retained Python `extended_hours.py` is a docstring-only stub with no
//! logic to port. `build_eh_context` groups a bar stream by calendar date,
//! picks the latest two dates as yesterday/today, grades quality by backing
//! bar count, extracts YC/YH/YL/PMH/PML/AHH/AHL, and derives a premarket
//! regime, a key-zone role list, and an after-hours risk record.

use crate::error::{EngineError, EngineResult};
use crate::types::Bar;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    PreMarket,
    Regular,
    AfterHours,
    Closed,
}

/// Session boundaries in ET minutes-since-midnight: pre-market 04:00-09:30,
/// regular 09:30-16:00, after-hours 16:00-20:00, closed otherwise.
pub fn classify_session(ts: DateTime<Utc>, et_offset_hours: i64) -> Session {
    let et = ts - chrono::Duration::hours(et_offset_hours);
    let minutes = et.hour() as i64 * 60 + et.minute() as i64;
    if (4 * 60..9 * 60 + 30).contains(&minutes) {
        Session::PreMarket
    } else if (9 * 60 + 30..16 * 60).contains(&minutes) {
        Session::Regular
    } else if (16 * 60..20 * 60).contains(&minutes) {
        Session::AfterHours
    } else {
        Session::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EhDataQuality {
    Complete,
    Partial,
    Minimal,
}

/// Extended-hours key levels. `yc`/`yh`/`yl` require yesterday-regular bars
/// to exist at all (enforced by `build_eh_context`'s error path); the rest
/// are gated by `EhDataQuality` per spec.md §3's glossary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EhLevels {
    pub yc: f64,
    pub yh: f64,
    pub yl: f64,
    pub pmh: Option<f64>,
    pub pml: Option<f64>,
    pub ahh: Option<f64>,
    pub ahl: Option<f64>,
    pub gap: Option<f64>,
}

impl EhLevels {
    /// All populated levels, for injection as pseudo-zones (C2).
    pub fn levels(&self) -> Vec<f64> {
        let mut out = vec![self.yc, self.yh, self.yl];
        out.extend([self.pmh, self.pml, self.ahh, self.ahl].into_iter().flatten());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremarketRegime {
    TrendContinuation,
    GapAndGo,
    GapFillBias,
    RangeDaySetup,
    Unavailable,
}

/// Role of a named EH level relative to the current price (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyZoneRole {
    Magnet,
    MajorResistance,
    MajorSupport,
    Conquered,
    BreakoutTrigger,
    SupportFlip,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AhRiskLevel {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelyBehavior {
    Continuation,
    MeanRevert,
    Drift,
}

/// Closing-behavior heuristic computed solely from the last regular session
/// (spec.md §4.7): where the close sits in the day's range, late-session
/// relative volume, and directional consistency of bar-over-bar closes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AhRisk {
    pub risk: AhRiskLevel,
    pub likely_behavior: LikelyBehavior,
    pub close_position: f64,
    pub late_rvol: f64,
    pub is_trend_day: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EhContext {
    pub levels: EhLevels,
    pub data_quality: EhDataQuality,
    pub premarket_regime: PremarketRegime,
    pub premarket_confidence: f64,
    pub bias: String,
    pub zone_roles: Vec<(String, KeyZoneRole)>,
    pub ah_risk: Option<AhRisk>,
    pub generated_at: DateTime<Utc>,
}

fn session_buckets<'a>(bars: &[&'a Bar], et_offset_hours: i64) -> (Vec<&'a Bar>, Vec<&'a Bar>, Vec<&'a Bar>) {
    let mut pre = Vec::new();
    let mut reg = Vec::new();
    let mut ah = Vec::new();
    for &bar in bars {
        match classify_session(bar.timestamp, et_offset_hours) {
            Session::PreMarket => pre.push(bar),
            Session::Regular => reg.push(bar),
            Session::AfterHours => ah.push(bar),
            Session::Closed => {}
        }
    }
    (pre, reg, ah)
}

fn high_low(bars: &[&Bar]) -> (f64, f64) {
    (
        bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max),
        bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
    )
}

fn classify_premarket_regime(gap: Option<f64>, pm_move: f64, atr: f64) -> (PremarketRegime, f64, String) {
    let Some(gap) = gap else {
        return (PremarketRegime::Unavailable, 0.0, "neutral".to_string());
    };

    if gap.abs() <= 0.3 * atr {
        if pm_move.abs() >= 0.5 * atr {
            let bias = if pm_move > 0.0 { "bullish" } else { "bearish" };
            (PremarketRegime::TrendContinuation, (pm_move.abs() / atr).min(1.0), bias.to_string())
        } else {
            (PremarketRegime::RangeDaySetup, 0.6, "neutral".to_string())
        }
    } else if pm_move.signum() == gap.signum() && pm_move.abs() >= 0.5 * atr {
        let bias = if gap > 0.0 { "bullish" } else { "bearish" };
        (PremarketRegime::GapAndGo, (pm_move.abs() / atr).min(1.0), bias.to_string())
    } else {
        let bias = if gap > 0.0 { "bearish" } else { "bullish" };
        (PremarketRegime::GapFillBias, (gap.abs() / atr).min(1.0), bias.to_string())
    }
}

fn build_zone_roles(levels: &EhLevels, current_price: f64) -> Vec<(String, KeyZoneRole)> {
    let mut roles = vec![
        ("YC".to_string(), KeyZoneRole::Magnet),
        (
            "YH".to_string(),
            if current_price < levels.yh { KeyZoneRole::MajorResistance } else { KeyZoneRole::Conquered },
        ),
        (
            "YL".to_string(),
            if current_price > levels.yl { KeyZoneRole::MajorSupport } else { KeyZoneRole::Conquered },
        ),
    ];
    if let Some(pmh) = levels.pmh {
        roles.push(("PMH".to_string(), if current_price < pmh { KeyZoneRole::BreakoutTrigger } else { KeyZoneRole::SupportFlip }));
    }
    if let Some(pml) = levels.pml {
        roles.push(("PML".to_string(), if current_price > pml { KeyZoneRole::BreakoutTrigger } else { KeyZoneRole::SupportFlip }));
    }
    if levels.ahh.is_some() {
        roles.push(("AHH".to_string(), KeyZoneRole::Static));
    }
    if levels.ahl.is_some() {
        roles.push(("AHL".to_string(), KeyZoneRole::Static));
    }
    roles
}

fn compute_ah_risk(yesterday_regular_sorted: &[&Bar], yh: f64, yl: f64, yc: f64) -> Option<AhRisk> {
    if yesterday_regular_sorted.len() < 2 {
        return None;
    }

    let close_position = if yh > yl { (yc - yl) / (yh - yl) } else { 0.5 };

    let late_n = yesterday_regular_sorted.len().min(30);
    let late_window = &yesterday_regular_sorted[yesterday_regular_sorted.len() - late_n..];
    let late_avg_vol = late_window.iter().map(|b| b.volume).sum::<f64>() / late_n as f64;
    let session_avg_vol = yesterday_regular_sorted.iter().map(|b| b.volume).sum::<f64>() / yesterday_regular_sorted.len() as f64;
    let late_rvol = if session_avg_vol > 0.0 { late_avg_vol / session_avg_vol } else { 1.0 };

    let (mut up, mut down) = (0usize, 0usize);
    for w in yesterday_regular_sorted.windows(2) {
        if w[1].close > w[0].close {
            up += 1;
        } else if w[1].close < w[0].close {
            down += 1;
        }
    }
    let total = up + down;
    let consistency = if total > 0 { up.max(down) as f64 / total as f64 } else { 0.5 };

    let is_trend_day = consistency >= 0.65 && (close_position >= 0.8 || close_position <= 0.2);

    let risk = if is_trend_day && late_rvol >= 1.3 {
        AhRiskLevel::High
    } else if is_trend_day || late_rvol >= 1.3 {
        AhRiskLevel::Med
    } else {
        AhRiskLevel::Low
    };

    let likely_behavior = if is_trend_day {
        LikelyBehavior::Continuation
    } else if close_position >= 0.8 || close_position <= 0.2 {
        LikelyBehavior::MeanRevert
    } else {
        LikelyBehavior::Drift
    };

    Some(AhRisk { risk, likely_behavior, close_position, late_rvol, is_trend_day })
}

/// Build the full EH context from a raw bar stream (spec.md §3/§4.7).
/// `bars` should cover at least yesterday and today; `current_price` is used
/// for key-zone role assignment. Raises `InsufficientData` when fewer than
/// two calendar dates are present or yesterday has no regular-session bars.
pub fn build_eh_context(bars: &[Bar], et_offset_hours: i64, current_price: f64, atr: f64) -> EngineResult<EhContext> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&Bar>> = BTreeMap::new();
    for bar in bars {
        let date = (bar.timestamp - chrono::Duration::hours(et_offset_hours)).date_naive();
        by_date.entry(date).or_default().push(bar);
    }

    let mut dates: Vec<NaiveDate> = by_date.keys().copied().collect();
    dates.sort();
    if dates.len() < 2 {
        return Err(EngineError::InsufficientData("need at least two calendar dates of bars for EH context".to_string()));
    }
    let today_date = dates[dates.len() - 1];
    let yesterday_date = dates[dates.len() - 2];

    let (_, mut yesterday_regular, yesterday_afterhours) = session_buckets(&by_date[&yesterday_date], et_offset_hours);
    let (mut today_premarket, _, _) = session_buckets(&by_date[&today_date], et_offset_hours);

    if yesterday_regular.is_empty() {
        return Err(EngineError::InsufficientData("no regular-session bars for yesterday".to_string()));
    }
    yesterday_regular.sort_by_key(|b| b.timestamp);
    today_premarket.sort_by_key(|b| b.timestamp);

    let data_quality = if today_premarket.len() >= 10 {
        EhDataQuality::Complete
    } else if yesterday_afterhours.len() >= 5 {
        EhDataQuality::Partial
    } else {
        EhDataQuality::Minimal
    };

    let yc = yesterday_regular.last().unwrap().close;
    let (yh, yl) = high_low(&yesterday_regular);

    let (ahh_raw, ahl_raw) = if yesterday_afterhours.is_empty() { (None, None) } else { let (h, l) = high_low(&yesterday_afterhours); (Some(h), Some(l)) };

    let (pmh_raw, pml_raw, gap_raw, pm_move) = if today_premarket.is_empty() {
        (None, None, None, 0.0)
    } else {
        let (h, l) = high_low(&today_premarket);
        let pm_open = today_premarket.first().unwrap().open;
        let pm_close = today_premarket.last().unwrap().close;
        (Some(h), Some(l), Some(pm_close - yc), pm_close - pm_open)
    };

    let (pmh, pml, gap) = match data_quality {
        EhDataQuality::Complete => (pmh_raw, pml_raw, gap_raw),
        _ => (None, None, None),
    };
    let (ahh, ahl) = match data_quality {
        EhDataQuality::Minimal => (None, None),
        _ => (ahh_raw, ahl_raw),
    };

    let levels = EhLevels { yc, yh, yl, pmh, pml, ahh, ahl, gap };

    let (premarket_regime, premarket_confidence, bias) = if data_quality != EhDataQuality::Complete || !(atr > 0.0) {
        (PremarketRegime::Unavailable, 0.0, "neutral".to_string())
    } else {
        classify_premarket_regime(gap, pm_move, atr)
    };

    let zone_roles = build_zone_roles(&levels, current_price);
    let ah_risk = compute_ah_risk(&yesterday_regular, yh, yl, yc);

    Ok(EhContext {
        levels,
        data_quality,
        premarket_regime,
        premarket_confidence,
        bias,
        zone_roles,
        ah_risk,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// `n` bars spaced 30 minutes apart starting at 14:30 UTC (09:30 ET with
    /// a 5-hour offset), all landing inside the regular session.
    fn regular_session_bars(y: i32, m: u32, d: u32, base: f64, n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(y, m, d, 14, 30, 0).unwrap();
        (0..n)
            .map(|i| Bar {
                timestamp: start + chrono::Duration::minutes(30 * i as i64),
                open: base,
                high: base + 0.5,
                low: base - 0.5,
                close: base,
                volume: 1e5,
                vwap: None,
            })
            .collect()
    }

    #[test]
    fn classifies_regular_session() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 14, 30, 0).unwrap();
        assert_eq!(classify_session(ts, 5), Session::Regular);
    }

    #[test]
    fn classifies_premarket_session() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 11, 0, 0).unwrap();
        assert_eq!(classify_session(ts, 5), Session::PreMarket);
    }

    #[test]
    fn single_date_is_insufficient_data() {
        let bars: Vec<Bar> = regular_session_bars(2026, 1, 15, 150.0, 5);
        let err = build_eh_context(&bars, 5, 150.0, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn gap_fill_bias_matches_spec_s5_scenario() {
        let mut bars = regular_session_bars(2026, 1, 14, 150.0, 3);
        bars.last_mut().unwrap().close = 150.0;
        // Ten premarket bars today, flat at 154 (no confirming trend), well
        // above yesterday's close — reaches `complete` quality with a gap
        // the premarket session never extends.
        let pm_start = Utc.with_ymd_and_hms(2026, 1, 15, 13, 0, 0).unwrap();
        for i in 0..10 {
            bars.push(Bar {
                timestamp: pm_start + chrono::Duration::minutes(3 * i),
                open: 154.0,
                high: 154.2,
                low: 153.8,
                close: 154.0,
                volume: 5e4,
                vwap: None,
            });
        }
        let ctx = build_eh_context(&bars, 5, 154.0, 1.0).unwrap();
        assert_eq!(ctx.data_quality, EhDataQuality::Complete);
        assert_eq!(ctx.levels.yc, 150.0);
        assert_eq!(ctx.premarket_regime, PremarketRegime::GapFillBias);
    }

    #[test]
    fn zone_roles_assign_magnet_and_conquered() {
        let levels = EhLevels { yc: 100.0, yh: 102.0, yl: 98.0, pmh: None, pml: None, ahh: None, ahl: None, gap: None };
        let roles = build_zone_roles(&levels, 103.0);
        assert!(roles.contains(&("YC".to_string(), KeyZoneRole::Magnet)));
        assert!(roles.contains(&("YH".to_string(), KeyZoneRole::Conquered)));
        assert!(roles.contains(&("YL".to_string(), KeyZoneRole::MajorSupport)));
    }

    #[test]
    fn ah_risk_none_when_too_few_bars() {
        let single = regular_session_bars(2026, 1, 14, 100.0, 1);
        let refs: Vec<&Bar> = single.iter().collect();
        assert!(compute_ah_risk(&refs, 101.0, 99.0, 100.0).is_none());
    }
}
