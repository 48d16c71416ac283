//! Conditional trade-plan generation (C6, spec.md §4.6).
//!
//! Produces "if X then consider Y" templates from the current regime, the
//! nearest zones, and (when present) the extended-hours key levels — never
//! a standing recommendation, always phrased as a condition.

use crate::extended_hours::{EhContext, PremarketRegime};
use crate::types::{Bar, MarketState, PlaybookPlan, Regime, Zones};

fn nearest_above<'a>(zones: &'a [crate::types::Zone], price: f64) -> Option<&'a crate::types::Zone> {
    zones
        .iter()
        .filter(|z| z.low > price)
        .min_by(|a, b| a.low.partial_cmp(&b.low).unwrap())
}

fn nearest_below<'a>(zones: &'a [crate::types::Zone], price: f64) -> Option<&'a crate::types::Zone> {
    zones
        .iter()
        .filter(|z| z.high < price)
        .max_by(|a, b| a.high.partial_cmp(&b.high).unwrap())
}

/// Build up to 3 conditional plans for the current bar, ordered by
/// relevance to the prevailing regime, then modulated by `eh_context` when
/// one is present.
pub fn generate_playbook(
    bar: &Bar,
    atr: f64,
    zones: &Zones,
    market_state: &MarketState,
    eh_context: Option<&EhContext>,
) -> Vec<PlaybookPlan> {
    let price = bar.close;
    let mut plans = Vec::new();

    if atr.is_nan() || atr <= 0.0 {
        return plans;
    }

    match market_state.regime {
        Regime::Uptrend => {
            if let Some(zone) = nearest_below(&zones.support, price) {
                let mut target = zone.high + 2.0 * atr;
                if let Some(resistance) = nearest_above(&zones.resistance, price) {
                    target = resistance.low;
                }
                plans.push(PlaybookPlan {
                    name: "Plan A".to_string(),
                    condition: "condition.pullback_to_support".to_string(),
                    level: zone.high,
                    target,
                    invalidation: zone.high - 0.5 * atr,
                    risk: "risk.trend_continuation".to_string(),
                });
            }
            if let Some(zone) = nearest_above(&zones.resistance, price) {
                plans.push(PlaybookPlan {
                    name: "Plan B".to_string(),
                    condition: "condition.breakout_continuation".to_string(),
                    level: zone.high,
                    target: zone.high + 2.0 * atr,
                    invalidation: zone.low,
                    risk: "risk.false_breakout".to_string(),
                });
            }
        }
        Regime::Downtrend => {
            if let Some(zone) = nearest_above(&zones.resistance, price) {
                let mut target = zone.low - 2.0 * atr;
                if let Some(support) = nearest_below(&zones.support, price) {
                    target = support.high;
                }
                plans.push(PlaybookPlan {
                    name: "Plan A".to_string(),
                    condition: "condition.resistance_rejection".to_string(),
                    level: zone.low,
                    target,
                    invalidation: zone.low + 0.5 * atr,
                    risk: "risk.reversal".to_string(),
                });
            }
            if let Some(zone) = nearest_below(&zones.support, price) {
                plans.push(PlaybookPlan {
                    name: "Plan B".to_string(),
                    condition: "condition.breakdown_continuation".to_string(),
                    level: zone.low,
                    target: zone.low - 2.0 * atr,
                    invalidation: zone.high,
                    risk: "risk.false_breakdown".to_string(),
                });
            }
        }
        Regime::Range => {
            let support = nearest_below(&zones.support, price);
            let resistance = nearest_above(&zones.resistance, price);

            if let Some(zone) = support {
                let target = resistance.map(|r| r.low).unwrap_or(zone.high + 2.0 * atr);
                plans.push(PlaybookPlan {
                    name: "Plan A".to_string(),
                    condition: "condition.support_bounce".to_string(),
                    level: zone.high,
                    target,
                    invalidation: zone.low - 0.5 * atr,
                    risk: "risk.range_break".to_string(),
                });
            }
            if let Some(zone) = resistance {
                let target = support.map(|s| s.high).unwrap_or(zone.low - 2.0 * atr);
                plans.push(PlaybookPlan {
                    name: "Plan B".to_string(),
                    condition: "condition.resistance_fade".to_string(),
                    level: zone.low,
                    target,
                    invalidation: zone.high + 0.5 * atr,
                    risk: "risk.range_break".to_string(),
                });
            }
        }
    }

    if let Some(ctx) = eh_context {
        let gap = ctx.levels.gap;
        let yc = ctx.levels.yc;

        match ctx.premarket_regime {
            PremarketRegime::GapFillBias => {
                if let Some(gap) = gap {
                    if gap.abs() > atr * 0.5 {
                        let (condition, invalidation) = if gap > 0.0 {
                            ("condition.gap_fill_short".to_string(), price + atr * 0.5)
                        } else {
                            ("condition.gap_fill_long".to_string(), price - atr * 0.5)
                        };
                        plans.push(PlaybookPlan {
                            name: "Plan EH".to_string(),
                            condition,
                            level: price,
                            target: yc,
                            invalidation,
                            risk: "risk.gap_continuation".to_string(),
                        });
                    }
                }
            }
            PremarketRegime::GapAndGo => {
                for plan in plans.iter_mut() {
                    if plan.condition.contains("breakout") || plan.condition.contains("breakdown") {
                        plan.name = "Plan A (EH)".to_string();
                    }
                }
            }
            PremarketRegime::RangeDaySetup | PremarketRegime::TrendContinuation | PremarketRegime::Unavailable => {}
        }
    }

    plans.truncate(4);
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extended_hours::{AhRisk, AhRiskLevel, EhDataQuality, EhLevels, LikelyBehavior};
    use crate::types::Zone;
    use chrono::{TimeZone, Utc};

    fn bar(t: i64, c: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
            open: c,
            high: c + 0.5,
            low: c - 0.5,
            close: c,
            volume: 1e6,
            vwap: None,
        }
    }

    fn zone(low: f64, high: f64) -> Zone {
        Zone {
            low,
            high,
            score: 0.8,
            touches: 3,
            rejections: 2,
            last_reaction: 1.0,
            last_test_time: None,
        }
    }

    fn eh_context(premarket_regime: PremarketRegime, gap: Option<f64>, yc: f64) -> EhContext {
        EhContext {
            levels: EhLevels {
                yc,
                yh: yc + 1.0,
                yl: yc - 1.0,
                pmh: None,
                pml: None,
                ahh: None,
                ahl: None,
                gap,
            },
            data_quality: EhDataQuality::Complete,
            premarket_regime,
            premarket_confidence: 0.8,
            bias: "bias.neutral".to_string(),
            zone_roles: Vec::new(),
            ah_risk: Some(AhRisk {
                risk: AhRiskLevel::Low,
                likely_behavior: LikelyBehavior::Drift,
                close_position: 0.5,
                late_rvol: 1.0,
                is_trend_day: false,
            }),
            generated_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn uptrend_plans_target_above_current_resistance() {
        let zones = Zones {
            support: vec![zone(98.0, 99.0)],
            resistance: vec![zone(101.0, 102.0)],
        };
        let ms = MarketState { regime: Regime::Uptrend, confidence: 0.7 };
        let plans = generate_playbook(&bar(0, 100.0), 1.0, &zones, &ms, None);
        assert!(!plans.is_empty());
        assert_eq!(plans[0].condition, "condition.pullback_to_support");
        assert!(plans[0].target > plans[0].level);
    }

    #[test]
    fn no_atr_yields_no_plans() {
        let zones = Zones::default();
        let ms = MarketState { regime: Regime::Range, confidence: 0.5 };
        let plans = generate_playbook(&bar(0, 100.0), f64::NAN, &zones, &ms, None);
        assert!(plans.is_empty());
    }

    #[test]
    fn gap_fill_bias_adds_plan_eh_targeting_yc() {
        let zones = Zones::default();
        let ms = MarketState { regime: Regime::Range, confidence: 0.5 };
        let ctx = eh_context(PremarketRegime::GapFillBias, Some(4.0), 150.0);
        let plans = generate_playbook(&bar(0, 154.0), 1.0, &zones, &ms, Some(&ctx));
        let eh_plan = plans.iter().find(|p| p.name == "Plan EH").expect("expected a Plan EH entry");
        assert_eq!(eh_plan.target, 150.0);
        assert_eq!(eh_plan.condition, "condition.gap_fill_short");
        assert!(eh_plan.invalidation > 154.0);
    }

    #[test]
    fn gap_fill_bias_below_half_atr_adds_no_plan() {
        let zones = Zones::default();
        let ms = MarketState { regime: Regime::Range, confidence: 0.5 };
        let ctx = eh_context(PremarketRegime::GapFillBias, Some(0.2), 150.0);
        let plans = generate_playbook(&bar(0, 150.2), 1.0, &zones, &ms, Some(&ctx));
        assert!(plans.iter().all(|p| p.name != "Plan EH"));
    }

    #[test]
    fn gap_and_go_renames_breakout_plan_to_priority_a() {
        let zones = Zones {
            support: vec![zone(98.0, 99.0)],
            resistance: vec![zone(101.0, 102.0)],
        };
        let ms = MarketState { regime: Regime::Uptrend, confidence: 0.7 };
        let ctx = eh_context(PremarketRegime::GapAndGo, Some(1.5), 99.0);
        let plans = generate_playbook(&bar(0, 100.0), 1.0, &zones, &ms, Some(&ctx));
        assert!(plans.iter().any(|p| p.name == "Plan A (EH)"));
    }

    #[test]
    fn range_day_setup_leaves_plans_unmodified() {
        let zones = Zones {
            support: vec![zone(98.0, 99.0)],
            resistance: vec![zone(101.0, 102.0)],
        };
        let ms = MarketState { regime: Regime::Range, confidence: 0.4 };
        let ctx = eh_context(PremarketRegime::RangeDaySetup, Some(0.1), 100.0);
        let plans = generate_playbook(&bar(0, 100.0), 1.0, &zones, &ms, Some(&ctx));
        assert!(plans.iter().all(|p| p.name == "Plan A" || p.name == "Plan B"));
    }
}
