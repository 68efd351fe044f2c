/// Paper Broker: an in-memory position ledger with simulated fills at a
/// price the caller supplies. No partial fills, no slippage — that is the
/// paper-trading semantics this spec asks for, unlike a live broker where
/// fill price can differ from the requested price.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::types::{
    ClosedPosition, ExitReason, Instant, OptionKey, Position, PositionStatus,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaperBrokerSnapshot {
    pub cash: f64,
    pub active_positions: Vec<Position>,
}

pub struct PaperBroker {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    cash: Arc<RwLock<f64>>,
    max_positions: usize,
}

impl PaperBroker {
    pub fn new(initial_capital: f64, max_positions: usize) -> Self {
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            cash: Arc::new(RwLock::new(initial_capital)),
            max_positions,
        }
    }

    /// `submitBuy(optionKey, quantity, requestedPrice, now) -> Position`.
    /// Fills synchronously at `requested_price`, transitioning
    /// PendingEntry -> Open in one step (paper fills never stay pending).
    pub async fn submit_buy(
        &self,
        option_key: OptionKey,
        quantity: u32,
        requested_price: f64,
        now: Instant,
        initial_stop: f64,
        vwap_at_entry: f64,
        oi_at_entry: u64,
    ) -> Result<Position> {
        let mut positions = self.positions.write().await;
        if positions.len() >= self.max_positions {
            return Err(EngineError::InsufficientCapacity(format!(
                "at position cap ({})",
                self.max_positions
            )));
        }

        let order_id = format!("PAPER-{}", uuid::Uuid::new_v4());
        let position = Position {
            order_id: order_id.clone(),
            option_key,
            entry_instant: now,
            entry_price: requested_price,
            quantity,
            initial_stop,
            trailing_stop: None,
            peak_price: requested_price,
            vwap_at_entry,
            oi_at_entry,
            status: PositionStatus::Open,
        };

        *self.cash.write().await -= requested_price * quantity as f64;
        positions.insert(order_id.clone(), position.clone());

        info!(
            "📝 [PAPER] Order filled: {} BUY {} {} @ {:.2} (simulated)",
            order_id,
            quantity,
            option_key.label(),
            requested_price
        );
        Ok(position)
    }

    /// `submitSell(position, requestedPrice, reason, now) -> ClosedPosition`.
    /// `oi_at_exit`/`vwap_at_exit` are supplied by the caller (the
    /// strategy engine, which owns the analyzer) since the ledger itself
    /// tracks neither quantity.
    pub async fn submit_sell(
        &self,
        order_id: &str,
        requested_price: f64,
        reason: ExitReason,
        now: Instant,
        oi_at_exit: u64,
        vwap_at_exit: f64,
    ) -> Result<ClosedPosition> {
        let mut positions = self.positions.write().await;
        let mut position = positions
            .remove(order_id)
            .ok_or_else(|| EngineError::UnknownPosition(order_id.to_string()))?;
        position.status = PositionStatus::Closed;

        *self.cash.write().await += requested_price * position.quantity as f64;

        let pnl = position.pnl(requested_price);
        let pnl_pct = position.pnl_pct(requested_price);

        info!(
            "📝 [PAPER] Order filled: {} SELL @ {:.2} ({}) pnl={:.2} (simulated)",
            order_id,
            requested_price,
            reason.as_str(),
            pnl
        );

        Ok(ClosedPosition {
            position,
            exit_instant: now,
            exit_price: requested_price,
            exit_reason: reason,
            oi_at_exit,
            vwap_at_exit,
            pnl,
            pnl_pct,
        })
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn cash(&self) -> f64 {
        *self.cash.read().await
    }

    /// Cash plus the mark-to-market value of any open position at `ltp`.
    /// At most one position is ever open in the core, so a single scalar
    /// quote is enough; this still iterates in case `max_positions` is
    /// raised above 1 for forward compatibility (§9 Open Questions).
    pub async fn portfolio_value(&self, ltp: f64) -> f64 {
        let cash = *self.cash.read().await;
        let positions_value: f64 = self
            .positions
            .read()
            .await
            .values()
            .map(|p| ltp * p.quantity as f64)
            .sum();
        cash + positions_value
    }

    pub async fn snapshot(&self) -> PaperBrokerSnapshot {
        PaperBrokerSnapshot {
            cash: *self.cash.read().await,
            active_positions: self.positions.read().await.values().cloned().collect(),
        }
    }

    /// Used only during recovery: replaces the ledger wholesale with a
    /// previously-persisted snapshot.
    pub async fn restore(&self, snapshot: PaperBrokerSnapshot) {
        *self.cash.write().await = snapshot.cash;
        let mut positions = self.positions.write().await;
        positions.clear();
        for p in snapshot.active_positions {
            positions.insert(p.order_id.clone(), p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_ist, OptionType};
    use chrono::Local;

    fn key() -> OptionKey {
        OptionKey::new(21750, OptionType::Ce, Local::now().date_naive())
    }

    #[tokio::test]
    async fn buy_then_sell_round_trips_cash_and_computes_pnl() {
        let broker = PaperBroker::new(100_000.0, 1);
        let now = now_ist();
        let position = broker
            .submit_buy(key(), 75, 150.0, now, 112.5, 148.0, 3_500_000)
            .await
            .unwrap();
        assert_eq!(broker.open_positions().await.len(), 1);
        assert!(broker.cash().await < 100_000.0);

        let closed = broker
            .submit_sell(
                &position.order_id,
                160.0,
                ExitReason::TrailingStop,
                now,
                3_600_000,
                150.0,
            )
            .await
            .unwrap();
        assert_eq!(broker.open_positions().await.len(), 0);
        assert!((closed.pnl - 750.0).abs() < 1e-6); // (160-150)*75
    }

    #[tokio::test]
    async fn position_cap_refuses_second_entry() {
        let broker = PaperBroker::new(100_000.0, 1);
        let now = now_ist();
        broker
            .submit_buy(key(), 75, 150.0, now, 112.5, 148.0, 3_500_000)
            .await
            .unwrap();
        let err = broker
            .submit_buy(key(), 75, 150.0, now, 112.5, 148.0, 3_500_000)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCapacity(_)));
    }

    #[tokio::test]
    async fn unknown_order_id_on_sell_is_rejected() {
        let broker = PaperBroker::new(100_000.0, 1);
        let err = broker
            .submit_sell("does-not-exist", 100.0, ExitReason::InitialStop, now_ist(), 0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownPosition(_)));
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip() {
        let broker = PaperBroker::new(100_000.0, 1);
        let now = now_ist();
        broker
            .submit_buy(key(), 75, 150.0, now, 112.5, 148.0, 3_500_000)
            .await
            .unwrap();
        let snap = broker.snapshot().await;

        let restored = PaperBroker::new(0.0, 1);
        restored.restore(snap).await;
        assert_eq!(restored.open_positions().await.len(), 1);
        assert!((restored.cash().await - broker.cash().await).abs() < 1e-9);
    }
}
