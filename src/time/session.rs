/// Market session clock: IST wall-clock boundaries for the trading day.
///
/// No timezone conversion is applied to persisted timestamps or to
/// boundary comparisons — everything here works on `Kolkata`-zoned wall
/// clock components, never on a UTC offset.
use chrono::{Datelike, NaiveTime, Timelike};

use crate::types::{Instant, SessionDay};

pub const SESSION_START: (u32, u32) = (9, 15);
pub const ENTRY_WINDOW_START: (u32, u32) = (9, 30);
pub const ENTRY_WINDOW_END: (u32, u32) = (14, 30);
pub const EOD_WINDOW_START: (u32, u32) = (14, 50);
pub const EOD_WINDOW_END: (u32, u32) = (15, 0);
pub const SESSION_END: (u32, u32) = (15, 30);

fn naive_time(hm: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hm.0, hm.1, 0).expect("static session boundary is a valid time")
}

/// `now() -> Instant` from §4.1: the current IST wall-clock instant.
pub fn now() -> Instant {
    crate::types::now_ist()
}

pub fn session_day(now: Instant) -> SessionDay {
    now.date_naive()
}

/// Weekday-only gate. Holiday exclusion lives in [`crate::time::holidays`];
/// the runner composes both via [`is_trading_day`].
fn is_weekday(now: Instant) -> bool {
    now.weekday().num_days_from_monday() < 5
}

pub fn is_market_open(now: Instant) -> bool {
    if !is_weekday(now) {
        return false;
    }
    let t = now.time();
    t >= naive_time(SESSION_START) && t < naive_time(SESSION_END)
}

pub fn is_in_entry_window(now: Instant) -> bool {
    let t = now.time();
    t >= naive_time(ENTRY_WINDOW_START) && t <= naive_time(ENTRY_WINDOW_END)
}

pub fn is_in_eod_window(now: Instant) -> bool {
    let t = now.time();
    t >= naive_time(EOD_WINDOW_START) && t <= naive_time(EOD_WINDOW_END)
}

pub fn is_session_over(now: Instant) -> bool {
    now.time() >= naive_time(SESSION_END)
}

pub fn is_at_or_after_session_start(now: Instant) -> bool {
    now.time() >= naive_time(SESSION_START)
}

/// Combines the weekday check with the NSE holiday calendar — a weekday
/// that happens to be an exchange holiday is not a trading day.
pub fn is_trading_day(now: Instant) -> bool {
    is_weekday(now) && !super::holidays::is_holiday(now.date_naive())
}

/// True on the 5-minute market grid (`mm % 5 == 0`), the cadence the entry
/// task aligns its wake-ups to.
pub fn is_five_minute_boundary(now: Instant) -> bool {
    now.minute() % 5 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;

    fn ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Instant {
        Kolkata.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn market_open_window_is_0915_to_1530() {
        assert!(is_market_open(ist(2026, 7, 27, 9, 15)));
        assert!(is_market_open(ist(2026, 7, 27, 15, 29)));
        assert!(!is_market_open(ist(2026, 7, 27, 15, 30)));
        assert!(!is_market_open(ist(2026, 7, 27, 9, 14)));
    }

    #[test]
    fn entry_window_is_0930_to_1430_inclusive() {
        assert!(!is_in_entry_window(ist(2026, 7, 27, 9, 29)));
        assert!(is_in_entry_window(ist(2026, 7, 27, 9, 30)));
        assert!(is_in_entry_window(ist(2026, 7, 27, 14, 30)));
        assert!(!is_in_entry_window(ist(2026, 7, 27, 14, 31)));
    }

    #[test]
    fn eod_window_is_1450_to_1500_inclusive() {
        assert!(is_in_eod_window(ist(2026, 7, 27, 14, 50)));
        assert!(is_in_eod_window(ist(2026, 7, 27, 15, 0)));
        assert!(!is_in_eod_window(ist(2026, 7, 27, 14, 49)));
        assert!(!is_in_eod_window(ist(2026, 7, 27, 15, 1)));
    }

    #[test]
    fn weekend_is_never_a_trading_day() {
        // 2026-08-01 is a Saturday.
        assert!(!is_trading_day(ist(2026, 8, 1, 10, 0)));
    }
}
