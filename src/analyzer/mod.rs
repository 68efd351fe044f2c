pub mod oi_vwap;

pub use oi_vwap::{
    batch_vwap, determine_direction, is_unwinding, max_oi_buildup, nearest_strike, oi_change,
    update_vwap_incremental, OiBuildup, OiChange, OiReading,
};
