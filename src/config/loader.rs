/// Configuration loading: a TOML file deserialized into a typed `Config`,
/// matching the enumerated keys one-for-one, followed by field-level
/// validation so a malformed config aborts startup before anything
/// partially starts (exit code 2).
use serde::Deserialize;
use std::path::Path;

use crate::config::credentials::Credentials;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct PositionSizingConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
}

impl Default for PositionSizingConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_lot_size")]
    pub option_lot_size: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            option_lot_size: default_lot_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    #[serde(default = "default_entry_start")]
    pub start_time: String,
    #[serde(default = "default_entry_end")]
    pub end_time: String,
    #[serde(default = "default_strike_window")]
    pub strikes_above_spot: u32,
    #[serde(default = "default_strike_window")]
    pub strikes_below_spot: u32,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            start_time: default_entry_start(),
            end_time: default_entry_end(),
            strikes_above_spot: default_strike_window(),
            strikes_below_spot: default_strike_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    #[serde(default = "default_exit_start")]
    pub exit_start_time: String,
    #[serde(default = "default_exit_end")]
    pub exit_end_time: String,
    #[serde(default = "default_initial_stop_loss_pct")]
    pub initial_stop_loss_pct: f64,
    #[serde(default = "default_profit_threshold")]
    pub profit_threshold: f64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    #[serde(default = "default_vwap_stop_pct")]
    pub vwap_stop_pct: f64,
    #[serde(default = "default_oi_increase_stop_pct")]
    pub oi_increase_stop_pct: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            exit_start_time: default_exit_start(),
            exit_end_time: default_exit_end(),
            initial_stop_loss_pct: default_initial_stop_loss_pct(),
            profit_threshold: default_profit_threshold(),
            trailing_stop_pct: default_trailing_stop_pct(),
            vwap_stop_pct: default_vwap_stop_pct(),
            oi_increase_stop_pct: default_oi_increase_stop_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskManagementConfig {
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
}

impl Default for RiskManagementConfig {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            max_trades_per_day: default_max_trades_per_day(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_strategy_loop_interval_min")]
    pub strategy_loop_interval_min: u32,
    #[serde(default = "default_ltp_check_interval_min")]
    pub ltp_check_interval_min: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            strategy_loop_interval_min: default_strategy_loop_interval_min(),
            ltp_check_interval_min: default_ltp_check_interval_min(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitPriceMode {
    Strict,
    Market,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_mode")]
    pub mode: BrokerMode,
    #[serde(default = "default_exit_price_mode")]
    pub exit_price_mode: ExitPriceMode,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            exit_price_mode: default_exit_price_mode(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub position_sizing: PositionSizingConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub risk_management: RiskManagementConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            position_sizing: PositionSizingConfig::default(),
            market: MarketConfig::default(),
            entry: EntryConfig::default(),
            exit: ExitConfig::default(),
            risk_management: RiskManagementConfig::default(),
            monitoring: MonitoringConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

fn default_initial_capital() -> f64 {
    100_000.0
}
fn default_lot_size() -> u32 {
    75
}
fn default_entry_start() -> String {
    "09:30".to_string()
}
fn default_entry_end() -> String {
    "14:30".to_string()
}
fn default_strike_window() -> u32 {
    5
}
fn default_exit_start() -> String {
    "14:50".to_string()
}
fn default_exit_end() -> String {
    "15:00".to_string()
}
fn default_initial_stop_loss_pct() -> f64 {
    0.25
}
fn default_profit_threshold() -> f64 {
    1.10
}
fn default_trailing_stop_pct() -> f64 {
    0.10
}
fn default_vwap_stop_pct() -> f64 {
    0.05
}
fn default_oi_increase_stop_pct() -> f64 {
    0.10
}
fn default_max_positions() -> u32 {
    1
}
fn default_max_trades_per_day() -> u32 {
    1
}
fn default_strategy_loop_interval_min() -> u32 {
    5
}
fn default_ltp_check_interval_min() -> u32 {
    1
}
fn default_broker_mode() -> BrokerMode {
    BrokerMode::Paper
}
fn default_exit_price_mode() -> ExitPriceMode {
    ExitPriceMode::Strict
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        EngineError::Config(format!("failed to read {}: {}", path.as_ref().display(), e))
    })?;
    let config: Config = toml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_credentials<P: AsRef<Path>>(path: P) -> Result<Credentials> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        EngineError::Config(format!(
            "failed to read credentials {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let credentials: Credentials = toml::from_str(&content)?;
    Ok(credentials)
}

fn validate_config(config: &Config) -> Result<()> {
    fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
        let (h, m) = s.split_once(':')?;
        Some((h.parse().ok()?, m.parse().ok()?))
    }

    let entry_start = parse_hhmm(&config.entry.start_time)
        .ok_or_else(|| EngineError::Config(format!("invalid entry.start_time: {}", config.entry.start_time)))?;
    let entry_end = parse_hhmm(&config.entry.end_time)
        .ok_or_else(|| EngineError::Config(format!("invalid entry.end_time: {}", config.entry.end_time)))?;
    if entry_start >= entry_end {
        return Err(EngineError::Config(
            "entry.start_time must be before entry.end_time".into(),
        ));
    }

    let exit_start = parse_hhmm(&config.exit.exit_start_time).ok_or_else(|| {
        EngineError::Config(format!(
            "invalid exit.exit_start_time: {}",
            config.exit.exit_start_time
        ))
    })?;
    let exit_end = parse_hhmm(&config.exit.exit_end_time).ok_or_else(|| {
        EngineError::Config(format!("invalid exit.exit_end_time: {}", config.exit.exit_end_time))
    })?;
    if exit_start >= exit_end {
        return Err(EngineError::Config(
            "exit.exit_start_time must be before exit.exit_end_time".into(),
        ));
    }

    for (name, pct) in [
        ("exit.initial_stop_loss_pct", config.exit.initial_stop_loss_pct),
        ("exit.trailing_stop_pct", config.exit.trailing_stop_pct),
        ("exit.vwap_stop_pct", config.exit.vwap_stop_pct),
        ("exit.oi_increase_stop_pct", config.exit.oi_increase_stop_pct),
    ] {
        if !(pct > 0.0 && pct <= 1.0) {
            return Err(EngineError::Config(format!("{} must be in (0, 1]: got {}", name, pct)));
        }
    }

    if config.risk_management.max_trades_per_day < 1 {
        return Err(EngineError::Config(
            "risk_management.max_trades_per_day must be >= 1".into(),
        ));
    }

    if config.position_sizing.initial_capital <= 0.0 {
        return Err(EngineError::Config(
            "position_sizing.initial_capital must be positive".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = Config::default();
        assert_eq!(config.position_sizing.initial_capital, 100_000.0);
        assert_eq!(config.market.option_lot_size, 75);
        assert_eq!(config.risk_management.max_trades_per_day, 1);
        assert_eq!(config.exit.profit_threshold, 1.10);
    }

    #[test]
    fn validate_rejects_inverted_entry_window() {
        let mut config = Config::default();
        config.entry.start_time = "15:00".into();
        config.entry.end_time = "09:30".into();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn validate_rejects_out_of_range_stop_pct() {
        let mut config = Config::default();
        config.exit.initial_stop_loss_pct = 1.5;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_config_parses_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [position_sizing]
            initial_capital = 250000.0

            [risk_management]
            max_trades_per_day = 1
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.position_sizing.initial_capital, 250_000.0);
        assert_eq!(config.market.option_lot_size, 75);
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = load_config("/nonexistent/path/config.toml").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
