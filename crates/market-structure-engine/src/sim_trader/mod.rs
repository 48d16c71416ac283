//! 0DTE trade-plan module (C9, spec.md §4.9): turns structured signals from
//! the rest of the engine into an executable, auditable plan.

pub mod config;
pub mod manager;
pub mod setups;
pub mod state_machine;
pub mod types;

pub use config::{get_armed_distance, get_buffer, get_watch_distance, SimTraderConfig};
pub use manager::{check_exit_conditions, check_hold_conditions, check_trim_conditions, manage_position, ManageAdvice};
pub use setups::{check_r1_breakout, check_r1_reject, check_s1_breakdown, check_yc_reclaim, detect_best_setup, SetupResult, SetupState};
pub use state_machine::{create_sim_trader, SimTradeStateMachine};
pub use types::{
    AnalysisSnapshot, BehaviorLabel, BreakoutQuality, LevelsData, PriceData, RiskLevel, RvolState, SetupType, SignalsData,
    SimTradeState, TradeDirection, TradeOutcome, TradePlanRow, TradeReview, TradeStatus, Trend,
};
