use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use analysis_core::Bar;

/// A local extremum over `2n+1` bars centered on it (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub bar_time: DateTime<Utc>,
    pub is_high: bool,
}

/// Clustered-price band carrying a multi-factor strength score (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub low: f64,
    pub high: f64,
    pub score: f64,
    pub touches: u32,
    pub rejections: u32,
    pub last_reaction: f64,
    pub last_test_time: Option<DateTime<Utc>>,
}

impl Zone {
    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Support/resistance zones for one report, each capped at `max_zones`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zones {
    pub support: Vec<Zone>,
    pub resistance: Vec<Zone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    BreakoutAttempt,
    BreakoutConfirmed,
    Fakeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeQuality {
    Confirmed,
    Pending,
    Unavailable,
}

/// Breakout/fakeout signal emitted by the BreakoutFSM (C3), consumed by
/// Behavior (C4), Timeline (C5), Playbook (C6), and the backtest harness
/// (C10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub direction: Direction,
    pub level: f64,
    pub confidence: f64,
    pub bar_time: DateTime<Utc>,
    pub bar_index: i64,
    pub volume_quality: VolumeQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    VolumeSpike,
    Rejection,
    Sweep,
    Absorption,
    Breakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorPhase {
    Accumulation,
    Shakeout,
    Markup,
    Distribution,
    Markdown,
}

impl BehaviorPhase {
    pub const ALL: [BehaviorPhase; 5] = [
        BehaviorPhase::Accumulation,
        BehaviorPhase::Shakeout,
        BehaviorPhase::Markup,
        BehaviorPhase::Distribution,
        BehaviorPhase::Markdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorPhase::Accumulation => "accumulation",
            BehaviorPhase::Shakeout => "shakeout",
            BehaviorPhase::Markup => "markup",
            BehaviorPhase::Distribution => "distribution",
            BehaviorPhase::Markdown => "markdown",
        }
    }
}

/// Evidence supporting a dominant-behavior inference (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub behavior: BehaviorPhase,
    pub severity: Severity,
    pub bar_time: DateTime<Utc>,
    pub bar_index: i64,
    pub metrics: HashMap<String, f64>,
    pub note: String,
}

/// Probability-weighted Wyckoff-phase inference (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub probabilities: HashMap<BehaviorPhase, f64>,
    pub dominant: BehaviorPhase,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Hard or soft event emitted across successive updates (§3, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub delta: f64,
    pub reason: String,
    pub bar_index: i64,
    pub severity: EventSeverity,
}

/// Conditional "if X then consider Y" trade template (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookPlan {
    pub name: String,
    pub condition: String,
    pub level: f64,
    pub target: f64,
    pub invalidation: f64,
    pub risk: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Uptrend,
    Downtrend,
    Range,
}

/// Overall market structure state (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub regime: Regime,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeDataQuality {
    Reliable,
    Partial,
    Unavailable,
}

/// Aggregate output of `analyze_market` (C8). Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub ticker: String,
    pub tf: String,
    pub generated_at: DateTime<Utc>,
    pub bar_count: usize,
    pub data_gaps: bool,
    pub volume_quality: VolumeDataQuality,
    pub market_state: MarketState,
    pub zones: Zones,
    pub signals: Vec<Signal>,
    pub behavior: Behavior,
    pub timeline: Vec<TimelineEvent>,
    pub playbook: Vec<PlaybookPlan>,
}
