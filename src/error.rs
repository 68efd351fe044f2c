/// Centralized error types for the trading engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors (fatal at startup, exit code 2)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Broker errors
    #[error("Broker connect failed: {0}")]
    BrokerConnect(String),

    #[error("Broker API error: {code} - {message}")]
    BrokerApi { code: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    // Data errors (transient, skip-tick)
    #[error("Missing bar: {0}")]
    MissingBar(String),

    #[error("Missing LTP: {0}")]
    MissingLtp(String),

    #[error("Stale quote: {0}")]
    StaleQuote(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Out-of-order bar rejected: {0}")]
    OutOfOrderBar(String),

    // Strategy / position errors
    #[error("Invalid strategy state: {0}")]
    InvalidStrategyState(String),

    #[error("Duplicate entry signal: {0}")]
    DuplicateEntry(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    // Cache errors
    #[error("Contract cache missing: {0}")]
    CacheMissing(String),

    #[error("Contract cache invalid: {0}")]
    CacheInvalid(String),

    // State manager errors
    #[error("State file corrupt: {0}")]
    StateCorrupt(String),

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    // File I/O
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Market session
    #[error("Market closed: {0}")]
    MarketClosed(String),

    #[error("Non-trading day: {0}")]
    NonTradingDay(String),

    // System
    #[error("System shutdown: {0}")]
    Shutdown(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Event dispatch failed: {0}")]
    EventDispatch(String),

    #[error("Duplicate event detected: {0}")]
    DuplicateEvent(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Transient errors per the error-handling design: skip this tick, no state change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::MissingBar(_)
                | EngineError::MissingLtp(_)
                | EngineError::StaleQuote(_)
                | EngineError::NetworkTimeout(_)
                | EngineError::RateLimitExceeded(_)
                | EngineError::BrokerApi { .. }
        )
    }

    /// Fatal errors abort startup without partially starting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::InvalidParameter(_)
                | EngineError::BrokerConnect(_)
                | EngineError::StateCorrupt(_)
                | EngineError::Fatal(_)
        )
    }

    /// CLI exit code per the process contract. `None` for non-fatal errors,
    /// which never reach the process boundary directly.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EngineError::Config(_) | EngineError::InvalidParameter(_) => Some(2),
            EngineError::BrokerConnect(_) | EngineError::AuthenticationFailed(_) => Some(3),
            EngineError::StateCorrupt(_) => Some(4),
            EngineError::Shutdown(_) => Some(130),
            _ => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "CFG_001",
            EngineError::InvalidParameter(_) => "CFG_002",
            EngineError::BrokerConnect(_) => "BROKER_001",
            EngineError::BrokerApi { .. } => "BROKER_002",
            EngineError::Http(_) => "NET_001",
            EngineError::AuthenticationFailed(_) => "AUTH_001",
            EngineError::TokenExpired(_) => "AUTH_002",
            EngineError::NetworkTimeout(_) => "NET_002",
            EngineError::RateLimitExceeded(_) => "NET_003",
            EngineError::InstrumentNotFound(_) => "BROKER_003",
            EngineError::MissingBar(_) => "DATA_001",
            EngineError::MissingLtp(_) => "DATA_002",
            EngineError::StaleQuote(_) => "DATA_003",
            EngineError::Deserialization(_) => "DATA_004",
            EngineError::OutOfOrderBar(_) => "DATA_005",
            EngineError::InvalidStrategyState(_) => "STRAT_001",
            EngineError::DuplicateEntry(_) => "STRAT_002",
            EngineError::PositionNotFound(_) => "POS_001",
            EngineError::InsufficientCapacity(_) => "POS_002",
            EngineError::UnknownPosition(_) => "POS_003",
            EngineError::CacheMissing(_) => "CACHE_001",
            EngineError::CacheInvalid(_) => "CACHE_002",
            EngineError::StateCorrupt(_) => "STATE_001",
            EngineError::RecoveryFailed(_) => "STATE_002",
            EngineError::Io(_) => "FILE_001",
            EngineError::Toml(_) => "FILE_002",
            EngineError::MarketClosed(_) => "MKT_001",
            EngineError::NonTradingDay(_) => "MKT_002",
            EngineError::Shutdown(_) => "SYS_001",
            EngineError::Fatal(_) => "SYS_002",
            EngineError::EventDispatch(_) => "EVENT_001",
            EngineError::DuplicateEvent(_) => "EVENT_002",
            EngineError::Internal(_) => "INT_001",
            EngineError::Other(_) => "GEN_001",
        }
    }
}
