/// NSE holiday calendar management.
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

/// NSE holidays for 2025/2026 (update annually).
pub fn nse_holidays() -> HashSet<NaiveDate> {
    let mut holidays = HashSet::new();

    holidays.insert(NaiveDate::from_ymd_opt(2025, 1, 26).unwrap()); // Republic Day
    holidays.insert(NaiveDate::from_ymd_opt(2025, 2, 26).unwrap()); // Mahashivratri
    holidays.insert(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()); // Holi
    holidays.insert(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()); // Id-Ul-Fitr
    holidays.insert(NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()); // Mahavir Jayanti
    holidays.insert(NaiveDate::from_ymd_opt(2025, 4, 14).unwrap()); // Dr. Ambedkar Jayanti
    holidays.insert(NaiveDate::from_ymd_opt(2025, 4, 18).unwrap()); // Good Friday
    holidays.insert(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()); // Maharashtra Day
    holidays.insert(NaiveDate::from_ymd_opt(2025, 5, 12).unwrap()); // Buddha Purnima
    holidays.insert(NaiveDate::from_ymd_opt(2025, 6, 7).unwrap()); // Bakri Id
    holidays.insert(NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()); // Muharram
    holidays.insert(NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()); // Independence Day
    holidays.insert(NaiveDate::from_ymd_opt(2025, 8, 27).unwrap()); // Ganesh Chaturthi
    holidays.insert(NaiveDate::from_ymd_opt(2025, 9, 5).unwrap()); // Eid-E-Milad
    holidays.insert(NaiveDate::from_ymd_opt(2025, 10, 2).unwrap()); // Gandhi Jayanti
    holidays.insert(NaiveDate::from_ymd_opt(2025, 10, 12).unwrap()); // Dussehra
    holidays.insert(NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()); // Diwali Balipratipada
    holidays.insert(NaiveDate::from_ymd_opt(2025, 10, 21).unwrap()); // Diwali
    holidays.insert(NaiveDate::from_ymd_opt(2025, 11, 5).unwrap()); // Gurunanak Jayanti
    holidays.insert(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()); // Christmas

    holidays.insert(NaiveDate::from_ymd_opt(2026, 1, 26).unwrap()); // Republic Day
    holidays.insert(NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()); // Holi
    holidays.insert(NaiveDate::from_ymd_opt(2026, 8, 15).unwrap()); // Independence Day
    holidays.insert(NaiveDate::from_ymd_opt(2026, 10, 2).unwrap()); // Gandhi Jayanti
    holidays.insert(NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()); // Christmas

    holidays
}

/// True when `date` is a declared exchange holiday (weekend status is
/// decided separately by `time::session::is_trading_day`).
pub fn is_holiday(date: NaiveDate) -> bool {
    nse_holidays().contains(&date)
}

/// True when `date` is a trading day: not a weekend, not a holiday.
pub fn is_trading_day(date: NaiveDate) -> bool {
    let weekday = date.weekday();
    if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
        return false;
    }
    !is_holiday(date)
}

pub fn next_trading_day(from_date: NaiveDate) -> NaiveDate {
    let mut date = from_date + chrono::Duration::days(1);
    while !is_trading_day(date) {
        date += chrono::Duration::days(1);
    }
    date
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn republic_day_is_a_holiday() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 26).unwrap();
        assert!(!is_trading_day(date));
    }

    #[test]
    fn weekends_are_not_trading_days() {
        let sat = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let sun = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert!(!is_trading_day(sat));
        assert!(!is_trading_day(sun));
    }

    #[test]
    fn regular_weekday_is_a_trading_day() {
        let mon = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert!(is_trading_day(mon));
    }
}
