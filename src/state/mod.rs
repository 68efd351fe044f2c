pub mod manager;

pub use manager::{
    DailyStats, PortfolioSnapshot, PortfolioView, StateDocument, StateManager, StrategyStateView,
    SystemHealth,
};
