pub mod holidays;
pub mod session;

pub use session::{
    is_five_minute_boundary, is_in_entry_window, is_in_eod_window, is_market_open,
    is_trading_day, now, session_day,
};
