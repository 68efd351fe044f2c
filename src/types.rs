/// Core data model: instants, session identity, contracts, bars, positions.
use chrono::{DateTime, NaiveDate};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A market-local (IST) wall-clock timestamp. No UTC translation is applied
/// at session boundaries — hour/minute comparisons are always done on the
/// `Kolkata`-zoned components, never on an offset-adjusted `Utc` instant.
pub type Instant = DateTime<Tz>;

pub fn now_ist() -> Instant {
    chrono::Utc::now().with_timezone(&Kolkata)
}

/// The calendar date (IST) a trading session belongs to.
pub type SessionDay = NaiveDate;

/// Direction chosen once per SessionDay; immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn option_type(&self) -> OptionType {
        match self {
            Direction::Call => OptionType::Ce,
            Direction::Put => OptionType::Pe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Call => "CALL",
            Direction::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Ce => "CE",
            OptionType::Pe => "PE",
        }
    }
}

/// Integer price-level index; the lot step is implicit in the contract cache.
pub type Strike = i64;

/// The calendar date an options contract family expires on.
pub type Expiry = NaiveDate;

/// Uniquely identifies an option contract in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionKey {
    pub strike: Strike,
    pub option_type: OptionType,
    pub expiry: Expiry,
}

impl OptionKey {
    pub fn new(strike: Strike, option_type: OptionType, expiry: Expiry) -> Self {
        Self {
            strike,
            option_type,
            expiry,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.expiry.format("%d%b%y").to_string().to_uppercase(),
            self.strike,
            self.option_type.as_str()
        )
    }
}

/// A 5-minute bar for an option contract. `volume`/`open_interest` may be
/// absent rather than zero; a quote source that has no reading for a field
/// should leave it `None`, not coerce to zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptionBar {
    pub timestamp: Instant,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
}

impl OptionBar {
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Last-traded-price quote: the unit of exit evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ltp {
    pub timestamp: Instant,
    pub price: f64,
}

impl Ltp {
    pub fn age_seconds(&self, now: Instant) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// Per-OptionKey, per-SessionDay VWAP accumulator. Reset at 09:15 of each
/// session. `sum_tpv` is the running sum of typical-price * volume;
/// `last_bar_timestamp` enforces the strictly-monotonic ordering invariant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VwapAccumulator {
    pub sum_tpv: f64,
    pub sum_volume: f64,
    pub bars_included: u32,
    pub last_bar_timestamp: Option<Instant>,
}

impl Default for VwapAccumulator {
    fn default() -> Self {
        Self {
            sum_tpv: 0.0,
            sum_volume: 0.0,
            bars_included: 0,
            last_bar_timestamp: None,
        }
    }
}

impl VwapAccumulator {
    pub fn vwap(&self) -> Option<f64> {
        if self.sum_volume > 0.0 {
            Some(self.sum_tpv / self.sum_volume)
        } else {
            None
        }
    }
}

/// Lifecycle of a Position from signal to settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    PendingEntry,
    Open,
    PendingExit,
    Closed,
}

/// Reason an exit rule fired. Ordered identically to the exit-rule
/// evaluation sequence in the strategy engine — lower index wins ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    InitialStop,
    VwapStop,
    OiIncreaseStop,
    TrailingStop,
    EndOfDay,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::InitialStop => "InitialStop",
            ExitReason::VwapStop => "VWAPStop",
            ExitReason::OiIncreaseStop => "OIIncreaseStop",
            ExitReason::TrailingStop => "TrailingStop",
            ExitReason::EndOfDay => "EndOfDay",
        }
    }
}

/// At most one active per SessionDay in the core (the paper broker's
/// capacity cap is a separate, higher, configurable number — see §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub order_id: String,
    pub option_key: OptionKey,
    pub entry_instant: Instant,
    pub entry_price: f64,
    pub quantity: u32,
    pub initial_stop: f64,
    pub trailing_stop: Option<f64>,
    pub peak_price: f64,
    pub vwap_at_entry: f64,
    pub oi_at_entry: u64,
    pub status: PositionStatus,
}

impl Position {
    pub fn pnl(&self, ltp: f64) -> f64 {
        (ltp - self.entry_price) * self.quantity as f64
    }

    pub fn pnl_pct(&self, ltp: f64) -> f64 {
        if self.entry_price == 0.0 {
            0.0
        } else {
            (ltp - self.entry_price) / self.entry_price * 100.0
        }
    }
}

/// A Position after being closed, with the realized P&L and the exit
/// record needed for the trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_instant: Instant,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub oi_at_exit: u64,
    pub vwap_at_exit: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

/// Owned exclusively by the runner; read-only copies may be handed to
/// adapters. This is the object the state manager snapshots on every flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyState {
    pub session_date: SessionDay,
    pub direction: Option<Direction>,
    pub current_strike: Option<Strike>,
    pub expiry: Option<Expiry>,
    pub trade_taken: bool,
    pub active_position: Option<Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub vwap_accumulators: HashMap<OptionKey, VwapAccumulator>,
    pub last_oi_per_key: HashMap<OptionKey, u64>,
    pub heartbeat_instant: Option<Instant>,
}

impl DailyState {
    pub fn fresh(session_date: SessionDay) -> Self {
        Self {
            session_date,
            direction: None,
            current_strike: None,
            expiry: None,
            trade_taken: false,
            active_position: None,
            closed_positions: Vec::new(),
            vwap_accumulators: HashMap::new(),
            last_oi_per_key: HashMap::new(),
            heartbeat_instant: None,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.direction.is_some() && self.current_strike.is_some() && self.expiry.is_some()
    }
}

/// A single row of a broker's instrument master — vendor-shaped, unlike
/// everything above it. Confined to the broker adapters; the strategy
/// engine and analyzer never see this type, only `OptionKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub token: String,
    pub symbol: String,
    pub name: String,
    pub expiry: String,
    pub strike: f64,
    pub lotsize: i32,
    pub instrument_type: String,
    pub exch_seg: String,
    pub tick_size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_key_label_formats_strike_and_type() {
        let key = OptionKey::new(
            21750,
            OptionType::Ce,
            NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
        );
        assert_eq!(key.label(), "31JUL2621750CE");
    }

    #[test]
    fn vwap_accumulator_undefined_with_no_volume() {
        let acc = VwapAccumulator::default();
        assert_eq!(acc.vwap(), None);
    }

    #[test]
    fn position_pnl_pct_matches_fraction_of_entry() {
        let position = Position {
            order_id: "o1".into(),
            option_key: OptionKey::new(
                21750,
                OptionType::Ce,
                NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            ),
            entry_instant: now_ist(),
            entry_price: 150.0,
            quantity: 75,
            initial_stop: 112.5,
            trailing_stop: None,
            peak_price: 150.0,
            vwap_at_entry: 148.0,
            oi_at_entry: 3_500_000,
            status: PositionStatus::Open,
        };
        assert!((position.pnl_pct(165.0) - 10.0).abs() < 1e-9);
    }
}
