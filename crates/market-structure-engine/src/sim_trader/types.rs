//! Sim-trader input/output types (spec.md §4.9).
//!
//! Numeric levels are carried as plain `f64` fields throughout — not as
//! formatted display strings to be re-parsed later. A presentation layer
//! can format `TradePlanRow` for UI display; this crate never parses its
//! own output back into numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Wait,
    Watch,
    Armed,
    Enter,
    Hold,
    Trim,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    None,
    Call,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupType {
    R1Breakout,
    S1Breakdown,
    YcReclaim,
    R1Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Key structural levels the analysis pipeline hands the planner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LevelsData {
    pub r1: Option<f64>,
    pub r2: Option<f64>,
    pub s1: Option<f64>,
    pub s2: Option<f64>,
    pub yc: Option<f64>,
    pub yh: Option<f64>,
    pub yl: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RvolState {
    Low,
    Ok,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutQuality {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorLabel {
    Accumulation,
    Distribution,
    Markup,
    Markdown,
    Wash,
    Chop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalsData {
    pub trend_1m: Trend,
    pub rvol_state: RvolState,
    pub breakout_quality: Option<BreakoutQuality>,
    pub behavior: Option<BehaviorLabel>,
}

/// A single bar-level snapshot handed to the state machine's `update`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub ts: DateTime<Utc>,
    pub price: PriceData,
    pub levels: LevelsData,
    pub signals: SignalsData,
}

/// Row of the sim-trader's plan, emitted on every `update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlanRow {
    pub ts: DateTime<Utc>,
    pub status: TradeStatus,
    pub direction: TradeDirection,
    pub risk: RiskLevel,
    pub reasons: Vec<String>,
    pub confirm_count: u32,
    pub setup_type: Option<SetupType>,

    pub key_level: Option<f64>,
    pub key_level_name: Option<String>,
    pub target_level: Option<f64>,
    pub target_name: Option<String>,
    pub invalidation_level: Option<f64>,

    pub entry_price: Option<f64>,
    pub entry_ts: Option<DateTime<Utc>>,
    pub bars_since_entry: Option<i64>,
    pub target_attempts: u32,
}

impl TradePlanRow {
    pub fn waiting(ts: DateTime<Utc>, reason: &str) -> Self {
        Self {
            ts,
            status: TradeStatus::Wait,
            direction: TradeDirection::None,
            risk: RiskLevel::Med,
            reasons: vec![reason.to_string()],
            confirm_count: 0,
            setup_type: None,
            key_level: None,
            key_level_name: None,
            target_level: None,
            target_name: None,
            invalidation_level: None,
            entry_price: None,
            entry_ts: None,
            bars_since_entry: None,
            target_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeReview {
    pub ts: DateTime<Utc>,
    pub setup_type: Option<SetupType>,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl_pct: f64,
    pub outcome: TradeOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTradeState {
    pub ticker: String,
    pub current_plan: TradePlanRow,
    pub trades_today: u32,
    pub max_trades_per_day: u32,
    pub plan_history: Vec<TradePlanRow>,
    pub reviews: Vec<TradeReview>,
}
