//! Per-ticker 0DTE state machine (spec.md §4.9): WAIT -> WATCH/ARMED -> ENTER
//! -> HOLD/TRIM -> EXIT -> WAIT, driven one `AnalysisSnapshot` at a time.

use super::config::SimTraderConfig;
use super::manager::{manage_position, update_target_attempts};
use super::setups::{check_r1_breakout, check_r1_reject, check_s1_breakdown, check_yc_reclaim, detect_best_setup, SetupResult, SetupState};
use super::types::{AnalysisSnapshot, SetupType, SimTradeState, TradeDirection, TradeOutcome, TradePlanRow, TradeReview, TradeStatus};
use chrono::{DateTime, Timelike, Utc};

const MAX_HISTORY: usize = 100;

fn minutes_since_midnight(ts: DateTime<Utc>) -> i64 {
    ts.hour() as i64 * 60 + ts.minute() as i64
}

fn is_trading_time(ts: DateTime<Utc>, config: &SimTraderConfig) -> bool {
    let start = config.trade_start_hour as i64 * 60 + config.trade_start_minute as i64;
    let end = config.trade_end_hour as i64 * 60 + config.trade_end_minute as i64;
    let m = minutes_since_midnight(ts);
    m >= start && m <= end
}

fn run_single_checker(setup_type: SetupType, snapshot: &AnalysisSnapshot, state: &SetupState, config: &SimTraderConfig) -> SetupResult {
    match setup_type {
        SetupType::R1Breakout => check_r1_breakout(snapshot, state.r1_confirm, config),
        SetupType::S1Breakdown => check_s1_breakdown(snapshot, state.s1_confirm, config),
        SetupType::YcReclaim => check_yc_reclaim(snapshot, state.yc_confirm, state.was_below_yc, config),
        SetupType::R1Reject => check_r1_reject(snapshot, state.r1_reject_confirm, state.touched_r1, config),
    }
}

fn create_plan_from_setup(ts: DateTime<Utc>, result: &SetupResult) -> TradePlanRow {
    TradePlanRow {
        ts,
        status: result.status,
        direction: result.direction,
        risk: result.risk,
        reasons: result.reasons.clone(),
        confirm_count: result.confirm_count,
        setup_type: result.setup_type,
        key_level: result.key_level,
        key_level_name: result.key_level_name.clone(),
        target_level: result.target_level,
        target_name: result.target_name.clone(),
        invalidation_level: result.invalidation_level,
        entry_price: None,
        entry_ts: None,
        bars_since_entry: None,
        target_attempts: 0,
    }
}

pub struct SimTradeStateMachine {
    ticker: String,
    config: SimTraderConfig,
    current_plan: TradePlanRow,
    trades_today: u32,
    plan_history: Vec<TradePlanRow>,
    reviews: Vec<TradeReview>,
    setup_state: SetupState,
}

impl SimTradeStateMachine {
    pub fn new(ticker: &str, config: SimTraderConfig) -> Self {
        let ts = Utc::now();
        Self {
            ticker: ticker.to_string(),
            config,
            current_plan: TradePlanRow::waiting(ts, "No setup detected"),
            trades_today: 0,
            plan_history: Vec::new(),
            reviews: Vec::new(),
            setup_state: SetupState::default(),
        }
    }

    fn add_to_history(&mut self) {
        self.plan_history.push(self.current_plan.clone());
        if self.plan_history.len() > MAX_HISTORY {
            self.plan_history.remove(0);
        }
    }

    fn update_setup_state(&mut self, snapshot: &AnalysisSnapshot, result: &SetupResult) {
        if let Some(setup_type) = result.setup_type {
            match setup_type {
                SetupType::R1Breakout => self.setup_state.r1_confirm = result.confirm_count,
                SetupType::S1Breakdown => self.setup_state.s1_confirm = result.confirm_count,
                SetupType::YcReclaim => self.setup_state.yc_confirm = result.confirm_count,
                SetupType::R1Reject => self.setup_state.r1_reject_confirm = result.confirm_count,
            }
        }
        if let Some(yc) = snapshot.levels.yc {
            if snapshot.price.close < yc {
                self.setup_state.was_below_yc = true;
            }
        }
        if let Some(r1) = snapshot.levels.r1 {
            if snapshot.price.high >= r1 {
                self.setup_state.touched_r1 = true;
            }
        }
    }

    fn create_review(&self, snapshot: &AnalysisSnapshot, reason: &str) -> TradeReview {
        let entry = self.current_plan.entry_price.unwrap_or(snapshot.price.close);
        let exit = snapshot.price.close;
        let pnl_pct = match self.current_plan.direction {
            TradeDirection::Call => (exit - entry) / entry * 100.0,
            TradeDirection::Put => (entry - exit) / entry * 100.0,
            TradeDirection::None => 0.0,
        };
        let outcome = if pnl_pct > 0.1 {
            TradeOutcome::Win
        } else if pnl_pct < -0.1 {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        };
        TradeReview {
            ts: snapshot.ts,
            setup_type: self.current_plan.setup_type,
            direction: self.current_plan.direction,
            entry_price: entry,
            exit_price: exit,
            pnl_pct,
            outcome,
            reason: reason.to_string(),
        }
    }

    fn handle_wait(&mut self, snapshot: &AnalysisSnapshot) {
        let result = detect_best_setup(snapshot, &self.setup_state, &self.config);
        self.update_setup_state(snapshot, &result);
        if result.detected {
            self.current_plan = create_plan_from_setup(snapshot.ts, &result);
            if self.current_plan.status != TradeStatus::Wait {
                self.add_to_history();
            }
        } else {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "No setup detected");
        }
    }

    fn handle_watch(&mut self, snapshot: &AnalysisSnapshot) {
        let Some(setup_type) = self.current_plan.setup_type else {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Setup invalidated");
            return;
        };
        let result = run_single_checker(setup_type, snapshot, &self.setup_state, &self.config);
        self.update_setup_state(snapshot, &result);
        if !result.detected {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Setup invalidated");
            return;
        }
        if matches!(result.status, TradeStatus::Armed | TradeStatus::Enter) {
            self.current_plan = create_plan_from_setup(snapshot.ts, &result);
            self.add_to_history();
        } else {
            self.current_plan.ts = snapshot.ts;
            self.current_plan.reasons = result.reasons;
        }
    }

    fn handle_armed(&mut self, snapshot: &AnalysisSnapshot) {
        let Some(setup_type) = self.current_plan.setup_type else {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Setup invalidated");
            return;
        };
        let result = run_single_checker(setup_type, snapshot, &self.setup_state, &self.config);
        self.update_setup_state(snapshot, &result);
        if !result.detected {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Setup invalidated");
            return;
        }
        match result.status {
            TradeStatus::Enter => {
                self.current_plan = create_plan_from_setup(snapshot.ts, &result);
                self.current_plan.entry_price = Some(snapshot.price.close);
                self.current_plan.entry_ts = Some(snapshot.ts);
                self.add_to_history();
            }
            TradeStatus::Watch => {
                self.current_plan = create_plan_from_setup(snapshot.ts, &result);
                self.add_to_history();
            }
            _ => {
                self.current_plan.ts = snapshot.ts;
                self.current_plan.reasons = result.reasons;
            }
        }
    }

    fn handle_enter(&mut self, snapshot: &AnalysisSnapshot) {
        self.current_plan.status = TradeStatus::Hold;
        self.current_plan.ts = snapshot.ts;
        self.current_plan.bars_since_entry = Some(1);
        self.trades_today += 1;
        tracing::debug!(
            ticker = %self.ticker,
            setup = ?self.current_plan.setup_type,
            trades_today = self.trades_today,
            "sim-trader entered position"
        );
        self.add_to_history();
    }

    fn handle_position(&mut self, snapshot: &AnalysisSnapshot) {
        self.current_plan.bars_since_entry = self.current_plan.bars_since_entry.map(|b| b + 1).or(Some(1));
        update_target_attempts(snapshot, &mut self.current_plan);
        let advice = manage_position(snapshot, &self.current_plan, &self.config);
        match advice.action {
            TradeStatus::Exit => {
                let review = self.create_review(snapshot, &advice.reasons.join("; "));
                tracing::debug!(ticker = %self.ticker, pnl_pct = review.pnl_pct, outcome = ?review.outcome, "sim-trader exited position");
                self.reviews.push(review);
                self.current_plan.status = TradeStatus::Exit;
                self.current_plan.ts = snapshot.ts;
                self.current_plan.reasons = advice.reasons;
                self.add_to_history();
            }
            TradeStatus::Trim => {
                self.current_plan.status = TradeStatus::Trim;
                self.current_plan.ts = snapshot.ts;
                self.current_plan.reasons = advice.reasons;
            }
            _ => {
                self.current_plan.status = TradeStatus::Hold;
                self.current_plan.ts = snapshot.ts;
                self.current_plan.reasons = advice.reasons;
            }
        }
    }

    fn handle_exit(&mut self, snapshot: &AnalysisSnapshot) {
        self.current_plan = TradePlanRow::waiting(snapshot.ts, "Trade completed, watching for next setup");
    }

    /// Feed one snapshot through the machine, returning the resulting plan row.
    pub fn update(&mut self, snapshot: &AnalysisSnapshot) -> TradePlanRow {
        if !is_trading_time(snapshot.ts, &self.config) {
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Outside trading hours");
            return self.current_plan.clone();
        }
        if self.trades_today >= self.config.max_trades_per_day
            && !matches!(self.current_plan.status, TradeStatus::Hold | TradeStatus::Trim)
        {
            tracing::debug!(ticker = %self.ticker, trades_today = self.trades_today, "sim-trader daily trade limit reached");
            self.current_plan = TradePlanRow::waiting(snapshot.ts, "Daily trade limit reached");
            return self.current_plan.clone();
        }

        match self.current_plan.status {
            TradeStatus::Wait => self.handle_wait(snapshot),
            TradeStatus::Watch => self.handle_watch(snapshot),
            TradeStatus::Armed => self.handle_armed(snapshot),
            TradeStatus::Enter => self.handle_enter(snapshot),
            TradeStatus::Hold | TradeStatus::Trim => self.handle_position(snapshot),
            TradeStatus::Exit => self.handle_exit(snapshot),
        }

        self.current_plan.clone()
    }

    pub fn get_state(&self) -> SimTradeState {
        SimTradeState {
            ticker: self.ticker.clone(),
            current_plan: self.current_plan.clone(),
            trades_today: self.trades_today,
            max_trades_per_day: self.config.max_trades_per_day,
            plan_history: self.plan_history.clone(),
            reviews: self.reviews.clone(),
        }
    }

    pub fn reset_daily(&mut self, ts: DateTime<Utc>) {
        self.current_plan = TradePlanRow::waiting(ts, "No setup detected");
        self.trades_today = 0;
        self.plan_history.clear();
        self.reviews.clear();
        self.setup_state = SetupState::default();
    }
}

pub fn create_sim_trader(ticker: &str, config: Option<SimTraderConfig>) -> SimTradeStateMachine {
    SimTradeStateMachine::new(ticker, config.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{LevelsData, PriceData, RvolState, SignalsData, Trend};
    use chrono::TimeZone;

    fn snapshot(hm: (u32, u32), close: f64, high: f64, r1: Option<f64>, trend: Trend, rvol: RvolState) -> AnalysisSnapshot {
        AnalysisSnapshot {
            ts: Utc.with_ymd_and_hms(2026, 1, 15, hm.0, hm.1, 0).unwrap(),
            price: PriceData { open: close, high, low: close, close },
            levels: LevelsData { r1, r2: None, s1: None, s2: None, yc: None, yh: None, yl: None },
            signals: SignalsData { trend_1m: trend, rvol_state: rvol, breakout_quality: None, behavior: None },
        }
    }

    #[test]
    fn outside_trading_hours_waits() {
        let mut sm = create_sim_trader("QQQ", None);
        let snap = snapshot((8, 0), 624.0, 624.0, Some(624.5), Trend::Up, RvolState::Ok);
        let plan = sm.update(&snap);
        assert_eq!(plan.status, TradeStatus::Wait);
        assert_eq!(plan.reasons[0], "Outside trading hours");
    }

    #[test]
    fn armed_to_enter_transitions_to_hold_next_bar() {
        let mut sm = create_sim_trader("QQQ", None);
        let approach = snapshot((10, 0), 623.9, 623.95, Some(624.0), Trend::Up, RvolState::Ok);
        let plan = sm.update(&approach);
        assert_eq!(plan.status, TradeStatus::Armed);

        let breakout1 = snapshot((10, 1), 624.3, 624.4, Some(624.0), Trend::Up, RvolState::Ok);
        let plan = sm.update(&breakout1);
        assert_eq!(plan.status, TradeStatus::Armed);

        let breakout2 = snapshot((10, 2), 624.5, 624.6, Some(624.0), Trend::Up, RvolState::Ok);
        let plan = sm.update(&breakout2);
        assert_eq!(plan.status, TradeStatus::Armed);

        let breakout3 = snapshot((10, 3), 624.6, 624.7, Some(624.0), Trend::Up, RvolState::Ok);
        let plan = sm.update(&breakout3);
        assert_eq!(plan.status, TradeStatus::Enter);

        let next = snapshot((10, 4), 624.6, 624.7, Some(624.0), Trend::Up, RvolState::Ok);
        let plan = sm.update(&next);
        assert_eq!(plan.status, TradeStatus::Hold);
        assert_eq!(plan.bars_since_entry, Some(1));
    }
}
