pub mod engine;
pub mod rules;

pub use engine::StrategyEngine;
pub use rules::{candidate_strikes, phase_of, within_window, ExitDecision, ExitTick, StrategyPhase};
