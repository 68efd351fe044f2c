/// Pure strategy rules: the per-day phase classification, the strike
/// candidate generator, and the five ordered exit thresholds. Nothing here
/// touches a broker or the clock beyond the `now` it is handed — these are
/// unit-testable the same way `analyzer::oi_vwap` is.
use crate::config::loader::ExitConfig;
use crate::types::{DailyState, Instant, Position, Strike};
use chrono::Timelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyPhase {
    Idle,
    Analyzed,
    Holding,
    PostTrade,
}

/// Derived from `DailyState` rather than stored directly — see §4.5.
pub fn phase_of(state: &DailyState) -> StrategyPhase {
    if state.active_position.is_some() {
        StrategyPhase::Holding
    } else if state.trade_taken {
        StrategyPhase::PostTrade
    } else if state.is_analyzed() {
        StrategyPhase::Analyzed
    } else {
        StrategyPhase::Idle
    }
}

/// True when `now`'s wall-clock time falls in `[start, end]` (inclusive),
/// both given as `"HH:MM"`. An unparsable bound never matches.
pub fn within_window(now: Instant, start: &str, end: &str) -> bool {
    fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
        let (h, m) = s.split_once(':')?;
        Some((h.parse().ok()?, m.parse().ok()?))
    }
    let (Some((sh, sm)), Some((eh, em))) = (parse_hhmm(start), parse_hhmm(end)) else {
        return false;
    };
    let now_minutes = now.hour() * 60 + now.minute();
    now_minutes >= sh * 60 + sm && now_minutes <= eh * 60 + em
}

/// Strikes in `[spot - below*step, spot + above*step]`, rounded to the
/// nearest step. `above`/`below` are the configured strike-window widths.
pub fn candidate_strikes(spot: f64, step: i64, above: u32, below: u32) -> Vec<Strike> {
    if step <= 0 {
        return Vec::new();
    }
    let center = (spot / step as f64).round() as i64 * step;
    let above = above as i64;
    let below = below as i64;
    (-below..=above).map(|i| center + i * step).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: crate::types::ExitReason,
    /// The exit price a "Strict" configuration would use. Market-mode
    /// callers ignore this and use the live LTP instead.
    pub strict_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitTick {
    pub peak_price: f64,
    pub trailing_stop: Option<f64>,
    pub decision: Option<ExitDecision>,
}

/// Evaluates the five exit rules in priority order against one LTP
/// observation. `current_vwap`/`current_oi` must already reflect the
/// latest 5-minute bar for the held option; this function does not fetch
/// or update either. Peak price and the trailing-stop latch are always
/// returned so the caller can persist them even when no rule fires.
pub fn evaluate_exit_rules(
    position: &Position,
    ltp: f64,
    current_vwap: f64,
    current_oi: u64,
    now: Instant,
    config: &ExitConfig,
) -> ExitTick {
    use crate::types::ExitReason;

    let peak_price = position.peak_price.max(ltp);
    let pnl = position.pnl(ltp);

    // Rule 4's activation latch: once armed it never releases, even on a
    // tick where the 10% profit threshold is no longer met.
    let mut trailing_stop = position.trailing_stop;
    if ltp >= position.entry_price * config.profit_threshold || trailing_stop.is_some() {
        let candidate = peak_price * (1.0 - config.trailing_stop_pct);
        trailing_stop = Some(trailing_stop.map_or(candidate, |t| t.max(candidate)));
    }

    let decision = 'rules: {
        // Rule 1: Initial Stop — always active.
        if ltp <= position.initial_stop {
            break 'rules Some(ExitDecision {
                reason: ExitReason::InitialStop,
                strict_price: position.initial_stop,
            });
        }

        // Rule 2: VWAP Stop — only while underwater.
        if pnl < 0.0 {
            let vwap_threshold = current_vwap * (1.0 - config.vwap_stop_pct);
            if ltp <= vwap_threshold {
                break 'rules Some(ExitDecision {
                    reason: ExitReason::VwapStop,
                    strict_price: vwap_threshold,
                });
            }
        }

        // Rule 3: OI-Increase Stop — only while underwater.
        if pnl < 0.0 && position.oi_at_entry > 0 {
            let oi_change_pct = (current_oi as i64 - position.oi_at_entry as i64) as f64
                / position.oi_at_entry as f64;
            if oi_change_pct >= config.oi_increase_stop_pct {
                // oi_change_pct >= oi_increase_stop_pct > 0 here, so the
                // ratio is in (0, 1]: the interpolated price sits between
                // the LTP and entry, softer than a flat LTP exit the
                // closer the actual breach is to the 10% threshold.
                let ratio = config.oi_increase_stop_pct / oi_change_pct;
                let strict_price = position.entry_price - (position.entry_price - ltp) * ratio;
                break 'rules Some(ExitDecision {
                    reason: ExitReason::OiIncreaseStop,
                    strict_price,
                });
            }
        }

        // Rule 4: Trailing Stop.
        if let Some(ts) = trailing_stop {
            if ltp <= ts {
                break 'rules Some(ExitDecision {
                    reason: ExitReason::TrailingStop,
                    strict_price: ts,
                });
            }
        }

        // Rule 5: End of Day — unconditional within the window.
        if within_window(now, &config.exit_start_time, &config.exit_end_time) {
            break 'rules Some(ExitDecision {
                reason: ExitReason::EndOfDay,
                strict_price: ltp,
            });
        }

        None
    };

    ExitTick {
        peak_price,
        trailing_stop,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_ist, OptionKey, OptionType, Position, PositionStatus};
    use chrono::{Local, TimeZone};
    use chrono_tz::Asia::Kolkata;

    fn ist(h: u32, m: u32) -> Instant {
        Kolkata.with_ymd_and_hms(2026, 7, 27, h, m, 0).unwrap()
    }

    fn config() -> ExitConfig {
        ExitConfig {
            exit_start_time: "14:50".into(),
            exit_end_time: "15:00".into(),
            initial_stop_loss_pct: 0.25,
            profit_threshold: 1.10,
            trailing_stop_pct: 0.10,
            vwap_stop_pct: 0.05,
            oi_increase_stop_pct: 0.10,
        }
    }

    fn position() -> Position {
        Position {
            order_id: "PAPER-1".into(),
            option_key: OptionKey::new(21750, OptionType::Ce, Local::now().date_naive()),
            entry_instant: now_ist(),
            entry_price: 100.0,
            quantity: 75,
            initial_stop: 75.0,
            trailing_stop: None,
            peak_price: 100.0,
            vwap_at_entry: 98.0,
            oi_at_entry: 1_000_000,
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn idle_when_not_analyzed() {
        let state = DailyState::fresh(Local::now().date_naive());
        assert_eq!(phase_of(&state), StrategyPhase::Idle);
    }

    #[test]
    fn within_window_is_inclusive_of_both_bounds() {
        assert!(within_window(ist(14, 50), "14:50", "15:00"));
        assert!(within_window(ist(15, 0), "14:50", "15:00"));
        assert!(!within_window(ist(14, 49), "14:50", "15:00"));
        assert!(!within_window(ist(15, 1), "14:50", "15:00"));
    }

    #[test]
    fn candidate_strikes_spans_above_and_below_spot() {
        let strikes = candidate_strikes(21725.0, 50, 2, 2);
        assert_eq!(strikes, vec![21600, 21650, 21700, 21750, 21800]);
    }

    #[test]
    fn initial_stop_wins_even_if_other_rules_would_also_fire() {
        let position = position();
        let tick = evaluate_exit_rules(&position, 70.0, 98.0, 1_000_000, ist(10, 0), &config());
        assert_eq!(tick.decision.unwrap().reason, crate::types::ExitReason::InitialStop);
    }

    #[test]
    fn vwap_stop_only_fires_while_underwater() {
        let position = position();
        // Profitable tick below a hypothetical vwap*0.95 threshold must not fire rule 2.
        let tick = evaluate_exit_rules(&position, 120.0, 130.0, 1_000_000, ist(10, 0), &config());
        assert!(tick.decision.is_none());
    }

    #[test]
    fn vwap_stop_fires_when_underwater_and_below_threshold() {
        let position = position();
        let tick = evaluate_exit_rules(&position, 93.0, 98.0, 1_000_000, ist(10, 0), &config());
        // vwap*0.95 = 93.1, ltp 93.0 <= threshold, still above initial stop of 75.
        assert_eq!(tick.decision.unwrap().reason, crate::types::ExitReason::VwapStop);
    }

    #[test]
    fn oi_increase_stop_interpolates_between_ltp_and_entry() {
        let mut position = position();
        position.oi_at_entry = 1_000_000;
        // 20% OI increase, double the 10% threshold -> ratio 0.5.
        let tick = evaluate_exit_rules(&position, 90.0, 80.0, 1_200_000, ist(10, 0), &config());
        let decision = tick.decision.unwrap();
        assert_eq!(decision.reason, crate::types::ExitReason::OiIncreaseStop);
        assert!((decision.strict_price - 95.0).abs() < 1e-9); // 100 - (100-90)*0.5
    }

    #[test]
    fn trailing_stop_latches_and_survives_a_pullback() {
        let mut position = position();
        // Arm the latch at 10% profit with peak 110.
        let armed = evaluate_exit_rules(&position, 110.0, 98.0, 1_000_000, ist(10, 0), &config());
        assert!(armed.decision.is_none());
        position.peak_price = armed.peak_price;
        position.trailing_stop = armed.trailing_stop;
        assert_eq!(position.trailing_stop, Some(99.0)); // 110 * 0.9

        // Price pulls back under the original 10% activation threshold but
        // stays above the trailing stop: must not fire yet.
        let holding = evaluate_exit_rules(&position, 105.0, 98.0, 1_000_000, ist(10, 5), &config());
        assert!(holding.decision.is_none());
        position.trailing_stop = holding.trailing_stop;

        // Now breaches the latched trailing stop: fires even though profit
        // has fallen well under the activation threshold.
        let fired = evaluate_exit_rules(&position, 98.0, 98.0, 1_000_000, ist(10, 10), &config());
        assert_eq!(fired.decision.unwrap().reason, crate::types::ExitReason::TrailingStop);
    }

    #[test]
    fn end_of_day_fires_unconditionally_in_window() {
        let position = position();
        let tick = evaluate_exit_rules(&position, 101.0, 98.0, 1_000_000, ist(14, 55), &config());
        assert_eq!(tick.decision.unwrap().reason, crate::types::ExitReason::EndOfDay);
    }
}
