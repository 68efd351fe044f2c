/// Event definitions: the lifecycle moments the runner and strategy engine
/// emit, recorded to an append-only JSONL log for crash recovery and audit.
use crate::types::{ExitReason, OptionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    DailyAnalysisComplete,
    EntrySignal,
    EntryFilled,
    EntryRefused,
    ExitSignal,
    ExitFilled,
    StateFlushed,
    StateRecovered,
    CacheReloaded,
    BrokerConnected,
    BrokerConnectFailed,
    TickSkipped,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    DailyAnalysisComplete {
        direction: String,
        strike: i64,
        expiry: String,
    },
    EntrySignal {
        option_key_label: String,
    },
    EntryFilled {
        order_id: String,
        option_key_label: String,
        entry_price: f64,
        quantity: u32,
    },
    EntryRefused {
        reason: String,
    },
    ExitSignal {
        order_id: String,
        reason: String,
    },
    ExitFilled {
        order_id: String,
        exit_price: f64,
        reason: String,
        pnl: f64,
    },
    StateFlushed {
        path: String,
    },
    StateRecovered {
        session_date: String,
    },
    CacheReloaded {
        expiry_count: usize,
    },
    BrokerConnected,
    BrokerConnectFailed {
        message: String,
    },
    TickSkipped {
        reason: String,
    },
    Shutdown,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        let timestamp = Utc::now();
        let idempotency_key = crate::utils::generate_idempotency_key(&format!(
            "{:?}-{}",
            event_type,
            timestamp.timestamp_nanos_opt().unwrap_or_default()
        ));
        Event {
            event_type,
            timestamp,
            idempotency_key,
            payload,
        }
    }

    pub fn exit_filled(order_id: &str, exit_price: f64, reason: ExitReason, pnl: f64) -> Self {
        Event::new(
            EventType::ExitFilled,
            EventPayload::ExitFilled {
                order_id: order_id.to_string(),
                exit_price,
                reason: reason.as_str().to_string(),
                pnl,
            },
        )
    }

    pub fn entry_filled(order_id: &str, option_key: OptionKey, entry_price: f64, quantity: u32) -> Self {
        Event::new(
            EventType::EntryFilled,
            EventPayload::EntryFilled {
                order_id: order_id.to_string(),
                option_key_label: option_key.label(),
                entry_price,
                quantity,
            },
        )
    }
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::DailyAnalysisComplete => "DailyAnalysisComplete",
            EventType::EntrySignal => "EntrySignal",
            EventType::EntryFilled => "EntryFilled",
            EventType::EntryRefused => "EntryRefused",
            EventType::ExitSignal => "ExitSignal",
            EventType::ExitFilled => "ExitFilled",
            EventType::StateFlushed => "StateFlushed",
            EventType::StateRecovered => "StateRecovered",
            EventType::CacheReloaded => "CacheReloaded",
            EventType::BrokerConnected => "BrokerConnected",
            EventType::BrokerConnectFailed => "BrokerConnectFailed",
            EventType::TickSkipped => "TickSkipped",
            EventType::Shutdown => "Shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_filled_carries_reason_as_str() {
        let event = Event::exit_filled("PAPER-1", 150.0, ExitReason::TrailingStop, 375.0);
        match event.payload {
            EventPayload::ExitFilled { reason, .. } => assert_eq!(reason, "TrailingStop"),
            _ => panic!("wrong payload"),
        }
    }
}
