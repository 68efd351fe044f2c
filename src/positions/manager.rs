/// Per-session trade log: one CSV row appended per closed trade, written
/// before the state flush so a crash between close and flush still leaves
/// a durable record on disk.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::analyzer::oi_change;
use crate::error::Result;
use crate::types::{ClosedPosition, OptionKey};
use std::collections::HashMap;

#[derive(Debug, serde::Serialize)]
struct TradeRow {
    entry_time: String,
    exit_time: String,
    strike: i64,
    option_type: String,
    expiry: String,
    entry_price: f64,
    exit_price: f64,
    size: u32,
    pnl: f64,
    pnl_pct: f64,
    vwap_at_entry: f64,
    vwap_at_exit: f64,
    oi_at_entry: u64,
    oi_change_at_entry: f64,
    oi_at_exit: u64,
    exit_reason: String,
}

pub struct TradeLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl TradeLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Arc<Self> {
        Arc::new(TradeLog {
            path: path.into(),
            writer: Mutex::new(()),
        })
    }

    /// Session-scoped filename per the spec's naming convention:
    /// `logs/trades_YYYYMMDD_HHMMSS.csv`.
    pub fn session_path(log_dir: &Path, session_started_at: chrono::NaiveDateTime) -> PathBuf {
        log_dir.join(format!(
            "trades_{}.csv",
            session_started_at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Appends one row. `oi_change_at_entry` is recomputed from the OI
    /// readings on file at signal time, not re-derived from the closed
    /// position (the position only carries the absolute OI at entry/exit).
    pub async fn append(
        &self,
        closed: &ClosedPosition,
        last_oi_per_key_before_entry: &HashMap<OptionKey, u64>,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;

        let oi_change_at_entry = oi_change(
            closed.position.option_key,
            closed.position.oi_at_entry,
            last_oi_per_key_before_entry,
        )
        .change_pct;

        let row = TradeRow {
            entry_time: closed.position.entry_instant.to_rfc3339(),
            exit_time: closed.exit_instant.to_rfc3339(),
            strike: closed.position.option_key.strike,
            option_type: closed.position.option_key.option_type.as_str().to_string(),
            expiry: closed.position.option_key.expiry.format("%Y-%m-%d").to_string(),
            entry_price: closed.position.entry_price,
            exit_price: closed.exit_price,
            size: closed.position.quantity,
            pnl: closed.pnl,
            pnl_pct: closed.pnl_pct,
            vwap_at_entry: closed.position.vwap_at_entry,
            vwap_at_exit: closed.vwap_at_exit,
            oi_at_entry: closed.position.oi_at_entry,
            oi_change_at_entry,
            oi_at_exit: closed.oi_at_exit,
            exit_reason: closed.exit_reason.as_str().to_string(),
        };

        let file_is_new = !self.path.exists();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(file_is_new)
                .from_writer(
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)?,
                );
            writer.serialize(&row)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e.to_string())))??;

        info!("trade logged: {} pnl={:.2}", closed.position.order_id, closed.pnl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_ist, ExitReason, OptionType, Position, PositionStatus};
    use chrono::Local;

    fn closed_position() -> ClosedPosition {
        let now = now_ist();
        let key = OptionKey::new(21750, OptionType::Ce, Local::now().date_naive());
        let position = Position {
            order_id: "PAPER-1".into(),
            option_key: key,
            entry_instant: now,
            entry_price: 150.0,
            quantity: 75,
            initial_stop: 112.5,
            trailing_stop: None,
            peak_price: 165.0,
            vwap_at_entry: 148.0,
            oi_at_entry: 3_500_000,
            status: PositionStatus::Closed,
        };
        ClosedPosition {
            position,
            exit_instant: now,
            exit_price: 165.0,
            exit_reason: ExitReason::TrailingStop,
            oi_at_exit: 3_600_000,
            vwap_at_exit: 152.0,
            pnl: 1125.0,
            pnl_pct: 10.0,
        }
    }

    #[tokio::test]
    async fn append_writes_header_once_and_rows_thereafter() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.csv"));

        log.append(&closed_position(), &HashMap::new()).await.unwrap();
        log.append(&closed_position(), &HashMap::new()).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 rows
        assert!(lines[0].starts_with("entry_time"));
    }

    #[test]
    fn session_path_formats_timestamp() {
        let dir = Path::new("logs");
        let ts = chrono::NaiveDate::from_ymd_opt(2026, 7, 27)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let path = TradeLog::session_path(dir, ts);
        assert_eq!(path, dir.join("trades_20260727_091500.csv"));
    }
}
