/// OI / VWAP Analyzer: pure functions over a per-day options slice.
///
/// Nothing here is stateful except what the caller threads through
/// explicitly (`VwapAccumulator`, the last-OI side map owned by
/// `DailyState`). Bounding the live state to "a few accumulators, a few
/// OI readings" rather than a cached multi-day frame is deliberate — see
/// the Incremental VWAP design note.
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::types::{Direction, Instant, OptionBar, OptionKey, Strike, VwapAccumulator};

/// One open-interest reading for a single strike/side at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct OiReading {
    pub strike: Strike,
    pub is_call: bool,
    pub timestamp: Instant,
    pub open_interest: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OiBuildup {
    pub max_call_strike: Option<Strike>,
    pub max_put_strike: Option<Strike>,
    pub call_distance: Option<i64>,
    pub put_distance: Option<i64>,
}

const STRIKE_WINDOW_N: i64 = 5;

/// `maxOiBuildup(now, spot) -> (maxCallStrike, maxPutStrike, callDistance, putDistance)`
///
/// Considers strikes in `[spot - N*step, spot + N*step]` (N=5). For each
/// side, picks the strike with the greatest OI at the nearest-available
/// reading at or before `now`. A side with no OI readings at all yields
/// `None` for both its strike and its distance.
pub fn max_oi_buildup(
    now: Instant,
    spot: f64,
    step: i64,
    readings: &[OiReading],
) -> OiBuildup {
    let spot_strike = spot.round() as i64;
    let lo = spot_strike - STRIKE_WINDOW_N * step;
    let hi = spot_strike + STRIKE_WINDOW_N * step;

    let best_for_side = |is_call: bool| -> Option<(Strike, i64)> {
        let mut latest_per_strike: HashMap<Strike, (Instant, Option<u64>)> = HashMap::new();
        for r in readings.iter().filter(|r| r.is_call == is_call && r.timestamp <= now) {
            if r.strike < lo || r.strike > hi {
                continue;
            }
            latest_per_strike
                .entry(r.strike)
                .and_modify(|(ts, oi)| {
                    if r.timestamp > *ts {
                        *ts = r.timestamp;
                        *oi = r.open_interest;
                    }
                })
                .or_insert((r.timestamp, r.open_interest));
        }
        latest_per_strike
            .into_iter()
            .filter_map(|(strike, (_, oi))| oi.map(|v| (strike, v)))
            .max_by_key(|(_, oi)| *oi)
            .map(|(strike, _)| (strike, (strike - spot_strike).abs()))
    };

    let call = best_for_side(true);
    let put = best_for_side(false);

    OiBuildup {
        max_call_strike: call.map(|(s, _)| s),
        max_put_strike: put.map(|(s, _)| s),
        call_distance: call.map(|(_, d)| d),
        put_distance: put.map(|(_, d)| d),
    }
}

/// `determineDirection(callDistance, putDistance) -> Direction`
///
/// Choose CALL when the call buildup is nearer to spot; else PUT. On
/// equality (including both sides absent), choose CALL.
pub fn determine_direction(call_distance: Option<i64>, put_distance: Option<i64>) -> Direction {
    match (call_distance, put_distance) {
        (Some(c), Some(p)) => {
            if c <= p {
                Direction::Call
            } else {
                Direction::Put
            }
        }
        (Some(_), None) => Direction::Call,
        (None, Some(_)) => Direction::Put,
        (None, None) => Direction::Call,
    }
}

/// `nearestStrike(spot, direction, candidateStrikes) -> Strike`
///
/// CALL: smallest strike >= spot. PUT: greatest strike < spot.
pub fn nearest_strike(spot: f64, direction: Direction, candidate_strikes: &[Strike]) -> Option<Strike> {
    match direction {
        Direction::Call => candidate_strikes
            .iter()
            .copied()
            .filter(|&s| s as f64 >= spot)
            .min(),
        Direction::Put => candidate_strikes
            .iter()
            .copied()
            .filter(|&s| (s as f64) < spot)
            .max(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OiChange {
    pub current_oi: u64,
    pub change: i64,
    pub change_pct: f64,
}

/// `oiChange(optionKey, now) -> (currentOi, change, changePct)`
///
/// `last_oi_per_key` is the small side map owned by `DailyState`; the
/// caller is responsible for writing `current_oi` back into it after the
/// call (this function is pure and never mutates the map itself). The
/// first query for a key returns `change = 0, changePct = 0`.
pub fn oi_change(
    key: &OptionKey,
    current_oi: u64,
    last_oi_per_key: &HashMap<OptionKey, u64>,
) -> OiChange {
    match last_oi_per_key.get(key) {
        Some(&previous) => {
            let change = current_oi as i64 - previous as i64;
            let change_pct = if previous > 0 {
                change as f64 / previous as f64
            } else {
                0.0
            };
            OiChange {
                current_oi,
                change,
                change_pct,
            }
        }
        None => OiChange {
            current_oi,
            change: 0,
            change_pct: 0.0,
        },
    }
}

/// `isUnwinding(changePct, entryBaseline) -> bool`
///
/// True exactly when the current OI is strictly less than the previous
/// bar's OI for that key (a negative `change`, per `oi_change` above).
pub fn is_unwinding(change: &OiChange) -> bool {
    change.change < 0
}

/// `updateVwapIncremental(optionKey, bar) -> newVwap`
///
/// Rejects strictly-out-of-order bars (`bar.timestamp < accumulator.last`)
/// with `OutOfOrderBar`; re-application of the same timestamp is
/// idempotent-in-intent but, since the accumulator only stores sums, a
/// bar equal to `last_bar_timestamp` is treated as already applied and
/// skipped rather than double-counted.
pub fn update_vwap_incremental(acc: &mut VwapAccumulator, bar: &OptionBar) -> Result<f64> {
    if let Some(last) = acc.last_bar_timestamp {
        if bar.timestamp < last {
            return Err(EngineError::OutOfOrderBar(format!(
                "bar timestamp {} precedes accumulator's last {}",
                bar.timestamp, last
            )));
        }
        if bar.timestamp == last {
            return acc
                .vwap()
                .ok_or_else(|| EngineError::Internal("vwap undefined after an included bar".into()));
        }
    }

    let volume = match bar.volume {
        Some(0) | None => 1.0,
        Some(v) => v as f64,
    };
    let tpv = bar.typical_price() * volume;

    acc.sum_tpv += tpv;
    acc.sum_volume += volume;
    acc.bars_included += 1;
    acc.last_bar_timestamp = Some(bar.timestamp);

    acc.vwap()
        .ok_or_else(|| EngineError::Internal("vwap undefined immediately after update".into()))
}

/// Pure batch VWAP over an entire slice, used only to ground the
/// VWAP-correctness test property against the incremental accumulator.
pub fn batch_vwap(bars: &[OptionBar]) -> Option<f64> {
    let mut sum_tpv = 0.0;
    let mut sum_volume = 0.0;
    for bar in bars {
        let volume = match bar.volume {
            Some(0) | None => 1.0,
            Some(v) => v as f64,
        };
        sum_tpv += bar.typical_price() * volume;
        sum_volume += volume;
    }
    if sum_volume > 0.0 {
        Some(sum_tpv / sum_volume)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ist;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use chrono_tz::Asia::Kolkata;

    fn ist(h: u32, m: u32) -> Instant {
        Kolkata.with_ymd_and_hms(2026, 7, 27, h, m, 0).unwrap()
    }

    fn bar(minute: u32, high: f64, low: f64, close: f64, volume: Option<u64>) -> OptionBar {
        OptionBar {
            timestamp: ist(9, minute),
            open: close,
            high,
            low,
            close,
            volume,
            open_interest: None,
        }
    }

    #[test]
    fn equidistant_oi_ties_break_to_call() {
        let readings = vec![
            OiReading {
                strike: 21750,
                is_call: true,
                timestamp: ist(9, 30),
                open_interest: Some(10),
            },
            OiReading {
                strike: 21700,
                is_call: false,
                timestamp: ist(9, 30),
                open_interest: Some(10),
            },
        ];
        let buildup = max_oi_buildup(ist(9, 30), 21725.0, 50, &readings);
        assert_eq!(buildup.call_distance, Some(25));
        assert_eq!(buildup.put_distance, Some(25));
        assert_eq!(
            determine_direction(buildup.call_distance, buildup.put_distance),
            Direction::Call
        );
    }

    #[test]
    fn nearest_strike_call_picks_smallest_at_or_above_spot() {
        let strikes = [21700, 21750, 21800];
        assert_eq!(
            nearest_strike(21725.0, Direction::Call, &strikes),
            Some(21750)
        );
    }

    #[test]
    fn nearest_strike_put_picks_greatest_below_spot() {
        let strikes = [21700, 21750, 21800];
        assert_eq!(
            nearest_strike(21725.0, Direction::Put, &strikes),
            Some(21700)
        );
    }

    #[test]
    fn first_oi_query_for_a_key_has_zero_change() {
        let key = OptionKey::new(21750, crate::types::OptionType::Ce, chrono::Local::now().date_naive());
        let change = oi_change(&key, 3_500_000, &HashMap::new());
        assert_eq!(change.change, 0);
        assert_eq!(change.change_pct, 0.0);
        assert!(!is_unwinding(&change));
    }

    #[test]
    fn falling_oi_is_unwinding() {
        let key = OptionKey::new(21750, crate::types::OptionType::Ce, chrono::Local::now().date_naive());
        let mut last = HashMap::new();
        last.insert(key, 3_500_000u64);
        let change = oi_change(&key, 3_200_000, &last);
        assert!(change.change < 0);
        assert!(is_unwinding(&change));
    }

    #[test]
    fn incremental_vwap_matches_batch_vwap() {
        let bars = vec![
            bar(15, 151.0, 149.0, 150.0, Some(100)),
            bar(20, 153.0, 150.0, 152.0, Some(200)),
            bar(25, 149.0, 145.0, 147.0, Some(50)),
        ];
        let mut acc = VwapAccumulator::default();
        let mut last = None;
        for b in &bars {
            last = Some(update_vwap_incremental(&mut acc, b).unwrap());
        }
        assert_eq!(last, batch_vwap(&bars));
    }

    #[test]
    fn out_of_order_bar_is_rejected() {
        let mut acc = VwapAccumulator::default();
        update_vwap_incremental(&mut acc, &bar(20, 153.0, 150.0, 152.0, Some(200))).unwrap();
        let err = update_vwap_incremental(&mut acc, &bar(15, 151.0, 149.0, 150.0, Some(100)));
        assert!(err.is_err());
    }

    #[test]
    fn zero_volume_bar_counts_as_one_unit() {
        let mut acc = VwapAccumulator::default();
        let vwap = update_vwap_incremental(&mut acc, &bar(15, 102.0, 98.0, 100.0, Some(0))).unwrap();
        assert!((vwap - 100.0).abs() < 1e-9);
    }

    #[test]
    fn idempotent_reapplication_of_same_timestamp() {
        let mut acc = VwapAccumulator::default();
        let b = bar(15, 151.0, 149.0, 150.0, Some(100));
        let first = update_vwap_incremental(&mut acc, &b).unwrap();
        let second = update_vwap_incremental(&mut acc, &b).unwrap();
        assert_eq!(first, second);
        assert_eq!(acc.bars_included, 1);
    }

    #[test]
    fn sanity_now_ist_is_timezone_aware() {
        let now = now_ist();
        let later = now + ChronoDuration::minutes(5);
        assert!(later > now);
    }
}
