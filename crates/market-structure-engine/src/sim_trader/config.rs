//! Sim-trader tunables (spec.md §4.9). All carry the defaults the original
//! 0DTE planner shipped with. Construct via [`SimTraderConfig::default`] and
//! override fields directly, or via [`SimTraderConfig::from_env`] for the
//! subset of fields the original planner exposed as environment overrides —
//! loading `.env` itself stays the caller's responsibility.

#[derive(Debug, Clone, Copy)]
pub struct SimTraderConfig {
    pub buffer_pct: f64,
    pub confirm_bars: u32,
    pub invalidate_bars: u32,

    pub armed_distance_pct: f64,
    pub watch_distance_pct: f64,

    pub time_stop_minutes: i64,
    pub max_target_attempts: u32,
    pub max_trades_per_day: u32,

    pub opening_protection_minutes: i64,
    pub opening_require_high_rvol: bool,

    pub trade_start_hour: u32,
    pub trade_start_minute: u32,
    pub trade_end_hour: u32,
    pub trade_end_minute: u32,

    pub low_rvol_threshold: f64,
    pub high_rvol_threshold: f64,
    pub low_confidence_threshold: f64,

    pub default_target_atr_multiple: f64,
    pub default_stop_atr_multiple: f64,
}

impl Default for SimTraderConfig {
    fn default() -> Self {
        Self {
            buffer_pct: 0.0005,
            confirm_bars: 2,
            invalidate_bars: 2,
            armed_distance_pct: 0.003,
            watch_distance_pct: 0.01,
            time_stop_minutes: 10,
            max_target_attempts: 3,
            max_trades_per_day: 1,
            opening_protection_minutes: 10,
            opening_require_high_rvol: true,
            trade_start_hour: 9,
            trade_start_minute: 40,
            trade_end_hour: 15,
            trade_end_minute: 0,
            low_rvol_threshold: 0.8,
            high_rvol_threshold: 1.5,
            low_confidence_threshold: 60.0,
            default_target_atr_multiple: 1.5,
            default_stop_atr_multiple: 0.5,
        }
    }
}

fn env_f64(key: &str, current: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
}

fn env_u32(key: &str, current: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
}

fn env_i64(key: &str, current: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
}

impl SimTraderConfig {
    /// Override the subset of fields the original planner's
    /// `SimTraderConfig.from_env()` exposes via environment variables,
    /// layered on top of [`Default`]. Callers load `.env` themselves (e.g.
    /// via `dotenvy::dotenv()`) before calling this — config loading stays
    /// the caller's responsibility, this only reads what's already in the
    /// process environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            buffer_pct: env_f64("SIM_BUFFER_PCT", d.buffer_pct),
            confirm_bars: env_u32("SIM_CONFIRM_BARS", d.confirm_bars),
            invalidate_bars: env_u32("SIM_INVALIDATE_BARS", d.invalidate_bars),
            armed_distance_pct: env_f64("SIM_ARMED_DISTANCE_PCT", d.armed_distance_pct),
            watch_distance_pct: env_f64("SIM_WATCH_DISTANCE_PCT", d.watch_distance_pct),
            time_stop_minutes: env_i64("SIM_TIME_STOP_MINUTES", d.time_stop_minutes),
            max_target_attempts: env_u32("SIM_MAX_TARGET_ATTEMPTS", d.max_target_attempts),
            max_trades_per_day: env_u32("SIM_MAX_TRADES_PER_DAY", d.max_trades_per_day),
            ..d
        }
    }
}

/// Absolute-price buffer around a key level, e.g. QQQ @ 624 -> 0.312.
pub fn get_buffer(price: f64, config: &SimTraderConfig) -> f64 {
    price * config.buffer_pct
}

pub fn get_armed_distance(price: f64, config: &SimTraderConfig) -> f64 {
    price * config.armed_distance_pct
}

pub fn get_watch_distance(price: f64, config: &SimTraderConfig) -> f64 {
    price * config.watch_distance_pct
}
