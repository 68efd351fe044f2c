/// State Manager: snapshots the day's `DailyState` to
/// `state/trading_state_YYYYMMDD.json`, atomically, on every flush trigger.
///
/// JSON object keys must be strings, so the `OptionKey`-keyed maps in
/// `DailyState` are converted to a `strike|type|expiry` string key at this
/// boundary rather than forcing a lossy/ambiguous `Serialize` onto the
/// core type itself.
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::types::{
    now_ist, ClosedPosition, DailyState, Direction, Expiry, OptionKey, OptionType, Position,
    SessionDay, Strike, VwapAccumulator,
};

fn option_key_to_string(key: &OptionKey) -> String {
    format!(
        "{}|{}|{}",
        key.strike,
        key.option_type.as_str(),
        key.expiry.format("%Y-%m-%d")
    )
}

fn option_key_from_string(s: &str) -> Option<OptionKey> {
    let mut parts = s.splitn(3, '|');
    let strike: Strike = parts.next()?.parse().ok()?;
    let option_type = match parts.next()? {
        "CE" => OptionType::Ce,
        "PE" => OptionType::Pe,
        _ => return None,
    };
    let expiry = chrono::NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    Some(OptionKey::new(strike, option_type, expiry))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemHealth {
    pub last_heartbeat: Option<DateTime<FixedOffset>>,
    pub broker_connected: bool,
    pub entry_loop_running: bool,
    pub exit_loop_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStateView {
    pub direction: Option<Direction>,
    pub current_strike: Option<Strike>,
    pub expiry: Option<Expiry>,
    pub trade_taken: bool,
    pub vwap_accumulators: HashMap<String, VwapAccumulator>,
    pub last_oi_per_key: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub trades_opened: u32,
    pub trades_closed: u32,
    pub total_pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioView {
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub roi_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub timestamp: DateTime<FixedOffset>,
    pub session_date: SessionDay,
    pub session_id: String,
    pub mode: String,
    pub active_positions: HashMap<String, Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub strategy_state: StrategyStateView,
    pub daily_stats: DailyStats,
    pub portfolio: PortfolioView,
    pub system_health: SystemHealth,
}

/// Everything the document needs beyond what `DailyState` itself owns.
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub positions_value: f64,
    pub initial_capital: f64,
}

impl StateDocument {
    pub fn build(
        state: &DailyState,
        session_id: &str,
        mode: &str,
        portfolio: PortfolioSnapshot,
        health: SystemHealth,
    ) -> Self {
        let mut active_positions = HashMap::new();
        if let Some(p) = &state.active_position {
            active_positions.insert(p.order_id.clone(), p.clone());
        }
        let has_open = !active_positions.is_empty();

        let trades_closed = state.closed_positions.len() as u32;
        let total_pnl: f64 = state.closed_positions.iter().map(|c| c.pnl).sum();
        let wins = state.closed_positions.iter().filter(|c| c.pnl > 0.0).count() as f64;
        let win_rate = if trades_closed > 0 {
            wins / trades_closed as f64
        } else {
            0.0
        };

        let total_value = portfolio.cash + portfolio.positions_value;
        let roi_pct = if portfolio.initial_capital > 0.0 {
            (total_value - portfolio.initial_capital) / portfolio.initial_capital * 100.0
        } else {
            0.0
        };

        StateDocument {
            timestamp: now_ist().fixed_offset(),
            session_date: state.session_date,
            session_id: session_id.to_string(),
            mode: mode.to_string(),
            active_positions,
            closed_positions: state.closed_positions.clone(),
            strategy_state: StrategyStateView {
                direction: state.direction,
                current_strike: state.current_strike,
                expiry: state.expiry,
                trade_taken: state.trade_taken,
                vwap_accumulators: state
                    .vwap_accumulators
                    .iter()
                    .map(|(k, v)| (option_key_to_string(k), *v))
                    .collect(),
                last_oi_per_key: state
                    .last_oi_per_key
                    .iter()
                    .map(|(k, v)| (option_key_to_string(k), *v))
                    .collect(),
            },
            daily_stats: DailyStats {
                trades_opened: trades_closed + if has_open { 1 } else { 0 },
                trades_closed,
                total_pnl,
                win_rate,
            },
            portfolio: PortfolioView {
                cash: portfolio.cash,
                positions_value: portfolio.positions_value,
                total_value,
                roi_pct,
            },
            system_health: health,
        }
    }

    /// Reconstructs a `DailyState` from a persisted document, for
    /// recovery. Unparsable map keys are dropped rather than failing the
    /// whole restore — they can only arise from a hand-edited or
    /// foreign-version state file.
    pub fn restore_daily_state(&self) -> DailyState {
        let mut state = DailyState::fresh(self.session_date);
        state.direction = self.strategy_state.direction;
        state.current_strike = self.strategy_state.current_strike;
        state.expiry = self.strategy_state.expiry;
        state.trade_taken = self.strategy_state.trade_taken;
        state.closed_positions = self.closed_positions.clone();
        state.active_position = self.active_positions.values().next().cloned();
        state.vwap_accumulators = self
            .strategy_state
            .vwap_accumulators
            .iter()
            .filter_map(|(k, v)| option_key_from_string(k).map(|key| (key, *v)))
            .collect();
        state.last_oi_per_key = self
            .strategy_state
            .last_oi_per_key
            .iter()
            .filter_map(|(k, v)| option_key_from_string(k).map(|key| (key, *v)))
            .collect();
        state
    }
}

/// Writes and reads the per-day state file. A single `Mutex<()>` serializes
/// writers so a flush triggered by a position transition never interleaves
/// with a heartbeat flush from the other loop.
pub struct StateManager {
    state_dir: PathBuf,
    writer: Mutex<()>,
}

impl StateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path_for(&self, session_date: SessionDay) -> PathBuf {
        self.state_dir
            .join(format!("trading_state_{}.json", session_date.format("%Y%m%d")))
    }

    /// Atomic write-temp-then-rename so a reader never observes a
    /// partially-written document.
    pub async fn flush(&self, document: &StateDocument) -> Result<()> {
        let _guard = self.writer.lock().await;
        tokio::fs::create_dir_all(&self.state_dir).await?;
        let final_path = self.path_for(document.session_date);
        let tmp_path = final_path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Reads today's file, if any, and reports it as recoverable iff it
    /// carries an open position or `tradeTaken=true`. A file that
    /// deserializes but is otherwise inert (no position, no trade) is not
    /// recoverable and will be archived on a fresh start.
    pub async fn check_recoverable(&self, session_date: SessionDay) -> Result<Option<StateDocument>> {
        let path = self.path_for(session_date);
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let document: StateDocument = serde_json::from_str(&raw)
            .map_err(|e| EngineError::StateCorrupt(format!("{}: {}", path.display(), e)))?;

        let recoverable = !document.active_positions.is_empty() || document.strategy_state.trade_taken;
        if recoverable {
            info!("recoverable session state found at {}", path.display());
            Ok(Some(document))
        } else {
            Ok(None)
        }
    }

    /// Moves an existing (non-recoverable) file aside with a timestamp
    /// suffix before a fresh session overwrites it.
    pub async fn archive_if_present(&self, session_date: SessionDay) -> Result<()> {
        let path = self.path_for(session_date);
        if !path.exists() {
            return Ok(());
        }
        let archived = self.state_dir.join(format!(
            "trading_state_{}_{}.json.bak",
            session_date.format("%Y%m%d"),
            now_ist().format("%H%M%S"),
        ));
        tokio::fs::rename(&path, &archived).await?;
        warn!("archived stale state file before fresh start: {}", archived.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, PositionStatus};
    use chrono::Local;

    fn sample_state() -> DailyState {
        let mut state = DailyState::fresh(Local::now().date_naive());
        state.direction = Some(Direction::Call);
        state.current_strike = Some(21750);
        state.expiry = Some(Local::now().date_naive());
        let key = OptionKey::new(21750, OptionType::Ce, state.expiry.unwrap());
        state.vwap_accumulators.insert(key, VwapAccumulator::default());
        state.last_oi_per_key.insert(key, 3_500_000);
        state.active_position = Some(Position {
            order_id: "PAPER-1".into(),
            option_key: key,
            entry_instant: now_ist(),
            entry_price: 150.0,
            quantity: 75,
            initial_stop: 112.5,
            trailing_stop: None,
            peak_price: 150.0,
            vwap_at_entry: 148.0,
            oi_at_entry: 3_500_000,
            status: PositionStatus::Open,
        });
        state
    }

    #[test]
    fn option_key_string_round_trips() {
        let key = OptionKey::new(21750, OptionType::Pe, Local::now().date_naive());
        let s = option_key_to_string(&key);
        assert_eq!(option_key_from_string(&s), Some(key));
    }

    #[tokio::test]
    async fn flush_then_check_recoverable_restores_active_position() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        let state = sample_state();

        let document = StateDocument::build(
            &state,
            "session-1",
            "paper",
            PortfolioSnapshot {
                cash: 88_750.0,
                positions_value: 11_250.0,
                initial_capital: 100_000.0,
            },
            SystemHealth {
                last_heartbeat: Some(now_ist().fixed_offset()),
                broker_connected: true,
                entry_loop_running: true,
                exit_loop_running: true,
                recovered_at: None,
            },
        );
        manager.flush(&document).await.unwrap();

        let recovered = manager
            .check_recoverable(state.session_date)
            .await
            .unwrap()
            .expect("file has an open position, must be recoverable");
        let restored = recovered.restore_daily_state();

        assert!(restored.active_position.is_some());
        assert_eq!(restored.current_strike, state.current_strike);
        assert_eq!(restored.last_oi_per_key.len(), 1);
        assert_eq!(restored.vwap_accumulators.len(), 1);
    }

    #[tokio::test]
    async fn non_recoverable_when_idle_and_no_trade_taken() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        let state = DailyState::fresh(Local::now().date_naive());

        let document = StateDocument::build(
            &state,
            "session-1",
            "paper",
            PortfolioSnapshot {
                cash: 100_000.0,
                positions_value: 0.0,
                initial_capital: 100_000.0,
            },
            SystemHealth::default(),
        );
        manager.flush(&document).await.unwrap();

        assert!(manager
            .check_recoverable(state.session_date)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn archive_if_present_renames_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        let session_date = Local::now().date_naive();
        tokio::fs::write(manager.path_for(session_date), "{}").await.unwrap();

        manager.archive_if_present(session_date).await.unwrap();

        assert!(!manager.path_for(session_date).exists());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found_archive = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().ends_with(".json.bak") {
                found_archive = true;
            }
        }
        assert!(found_archive);
    }

    #[test]
    fn closed_position_feeds_daily_stats() {
        let mut state = sample_state();
        state.active_position = None;
        state.trade_taken = true;
        state.closed_positions.push(ClosedPosition {
            position: sample_state().active_position.unwrap(),
            exit_instant: now_ist(),
            exit_price: 160.0,
            exit_reason: ExitReason::TrailingStop,
            oi_at_exit: 3_600_000,
            vwap_at_exit: 152.0,
            pnl: 750.0,
            pnl_pct: 6.67,
        });

        let document = StateDocument::build(
            &state,
            "session-1",
            "paper",
            PortfolioSnapshot {
                cash: 100_750.0,
                positions_value: 0.0,
                initial_capital: 100_000.0,
            },
            SystemHealth::default(),
        );
        assert_eq!(document.daily_stats.trades_closed, 1);
        assert_eq!(document.daily_stats.trades_opened, 1);
        assert!((document.daily_stats.win_rate - 1.0).abs() < 1e-9);
    }
}
