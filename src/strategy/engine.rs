/// Strategy Engine: advances one `DailyState` through Idle -> Analyzed ->
/// Holding -> PostTrade, driven by ticks the runner pushes in. Decision
/// logic lives in `rules` (pure); this module is the stateful glue that
/// calls the broker and the paper ledger and persists the result.
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::analyzer;
use crate::broker::{Broker, PaperBroker};
use crate::cache::ContractCache;
use crate::config::loader::{Config, ExitPriceMode};
use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, EventType};
use crate::strategy::rules::{self, StrategyPhase};
use crate::types::{now_ist, DailyState, Expiry, Instant, OptionKey, OptionType, SessionDay, Strike};

pub struct StrategyEngine {
    config: Config,
    cache: Arc<ContractCache>,
    paper_broker: Arc<PaperBroker>,
    event_bus: Option<Arc<EventBus>>,
    state: RwLock<DailyState>,
}

impl StrategyEngine {
    pub fn new(
        config: Config,
        cache: Arc<ContractCache>,
        paper_broker: Arc<PaperBroker>,
        event_bus: Option<Arc<EventBus>>,
        session_date: SessionDay,
    ) -> Self {
        Self {
            config,
            cache,
            paper_broker,
            event_bus,
            state: RwLock::new(DailyState::fresh(session_date)),
        }
    }

    pub async fn restore_state(&self, state: DailyState) {
        *self.state.write().await = state;
    }

    pub async fn snapshot(&self) -> DailyState {
        self.state.read().await.clone()
    }

    pub async fn phase(&self) -> StrategyPhase {
        rules::phase_of(&*self.state.read().await)
    }

    async fn emit(&self, event_type: EventType, payload: EventPayload) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(Event::new(event_type, payload)).await {
                warn!("event publish failed: {}", e);
            }
        }
    }

    /// Called by the runner's 5-minute task, regardless of phase: performs
    /// daily analysis while Idle, evaluates for entry while Analyzed, and
    /// keeps the held option's VWAP/OI current while Holding so the exit
    /// loop's rule 2 and rule 3 see fresh data even though it only fetches
    /// LTP.
    pub async fn run_five_minute_tick(&self, broker: &Broker, now: Instant) -> Result<()> {
        match self.phase().await {
            StrategyPhase::Idle => self.daily_analysis(broker, now).await,
            StrategyPhase::Analyzed => self.evaluate_entry(broker, now).await,
            StrategyPhase::Holding => self.refresh_holding_market_data(broker, now).await,
            StrategyPhase::PostTrade => Ok(()),
        }
    }

    /// Called by the runner's 1-minute task. A no-op outside Holding.
    pub async fn run_one_minute_tick(&self, broker: &Broker, now: Instant) -> Result<()> {
        if self.phase().await == StrategyPhase::Holding {
            self.evaluate_exit(broker, now).await
        } else {
            Ok(())
        }
    }

    async fn resolve_expiry(&self, broker: &Broker) -> Result<Expiry> {
        if let Some(mapping) = self.cache.get_options_expiry_map().await {
            if let Some(current_week) = mapping.current_week {
                if let Ok(date) = chrono::NaiveDate::parse_from_str(&current_week, "%Y-%m-%d") {
                    return Ok(date);
                }
            }
        }
        broker.get_next_expiry().await
    }

    async fn strike_step(&self) -> i64 {
        self.cache
            .get_strike_range()
            .await
            .and_then(|r| r.step)
            .map(|s| s as i64)
            .filter(|&s| s > 0)
            .unwrap_or(50)
    }

    async fn candidate_strikes(&self, spot: f64) -> Vec<Strike> {
        let step = self.strike_step().await;
        rules::candidate_strikes(
            spot,
            step,
            self.config.entry.strikes_above_spot,
            self.config.entry.strikes_below_spot,
        )
    }

    /// Step 1-6 of the daily analysis procedure. Any failure leaves the
    /// state Idle so the next 5-minute tick retries from scratch.
    async fn daily_analysis(&self, broker: &Broker, now: Instant) -> Result<()> {
        let expiry = match self.resolve_expiry(broker).await {
            Ok(e) => e,
            Err(e) => {
                warn!("daily analysis: expiry unresolved, staying idle: {}", e);
                return Ok(());
            }
        };

        let spot = match broker.get_spot_price().await {
            Ok(s) => s,
            Err(e) => {
                warn!("daily analysis: spot price unavailable, staying idle: {}", e);
                return Ok(());
            }
        };

        let candidates = self.candidate_strikes(spot).await;
        let step = self.strike_step().await;
        let readings = self.collect_oi_readings(broker, expiry, &candidates).await;
        if readings.is_empty() {
            warn!("daily analysis: no OI data available, staying idle");
            return Ok(());
        }

        let buildup = analyzer::max_oi_buildup(now, spot, step, &readings);
        let direction = analyzer::determine_direction(buildup.call_distance, buildup.put_distance);
        let strike = match analyzer::nearest_strike(spot, direction, &candidates) {
            Some(s) => s,
            None => {
                warn!("daily analysis: no candidate strike on the chosen side, staying idle");
                return Ok(());
            }
        };

        {
            let mut state = self.state.write().await;
            state.direction = Some(direction);
            state.current_strike = Some(strike);
            state.expiry = Some(expiry);
            state.vwap_accumulators.clear();
            state.last_oi_per_key.clear();
        }

        info!(
            "daily analysis complete: direction={} strike={} expiry={}",
            direction.as_str(),
            strike,
            expiry
        );
        self.emit(
            EventType::DailyAnalysisComplete,
            EventPayload::DailyAnalysisComplete {
                direction: direction.as_str().to_string(),
                strike,
                expiry: expiry.format("%Y-%m-%d").to_string(),
            },
        )
        .await;

        Ok(())
    }

    async fn collect_oi_readings(
        &self,
        broker: &Broker,
        expiry: Expiry,
        strikes: &[Strike],
    ) -> Vec<analyzer::OiReading> {
        let chain = match broker.get_options_chain(expiry, strikes).await {
            Ok(c) => c,
            Err(e) => {
                warn!("daily analysis: options chain unavailable: {}", e);
                return Vec::new();
            }
        };
        chain
            .into_iter()
            .map(|(key, bar)| analyzer::OiReading {
                strike: key.strike,
                is_call: key.option_type == OptionType::Ce,
                timestamp: bar.timestamp,
                open_interest: bar.open_interest,
            })
            .collect()
    }

    /// Steps 1-7 of the entry evaluation procedure.
    async fn evaluate_entry(&self, broker: &Broker, now: Instant) -> Result<()> {
        if !rules::within_window(now, &self.config.entry.start_time, &self.config.entry.end_time) {
            return Ok(());
        }

        let (direction, expiry) = {
            let state = self.state.read().await;
            match (state.direction, state.expiry) {
                (Some(d), Some(e)) => (d, e),
                _ => return Ok(()),
            }
        };

        let spot = match broker.get_spot_price().await {
            Ok(s) => s,
            Err(e) => {
                warn!("entry evaluation: spot unavailable, skipping tick: {}", e);
                return Ok(());
            }
        };

        // Step 2: the dynamic strike follows spot until the day's one trade fires.
        let candidates = self.candidate_strikes(spot).await;
        let Some(strike) = analyzer::nearest_strike(spot, direction, &candidates) else {
            return Ok(());
        };
        self.state.write().await.current_strike = Some(strike);

        let key = OptionKey::new(strike, direction.option_type(), expiry);

        // Refreshes OI across the whole candidate chain in one call, per the
        // "on each 5-min tick" refresh contract, not just the chosen strike.
        let chain = match broker.get_options_chain(expiry, &candidates).await {
            Ok(c) => c,
            Err(e) => {
                warn!("entry evaluation: options chain unavailable, skipping tick: {}", e);
                return Ok(());
            }
        };
        let Some((_, bar)) = chain.iter().find(|(k, _)| *k == key) else {
            warn!("entry evaluation: bar unavailable for {}, skipping tick", key.label());
            return Ok(());
        };
        let bar = bar.clone();
        let Some(current_oi) = bar.open_interest else {
            warn!("entry evaluation: bar has no OI for {}, skipping tick", key.label());
            return Ok(());
        };

        let vwap = {
            let mut state = self.state.write().await;
            let acc = state.vwap_accumulators.entry(key).or_default();
            match analyzer::update_vwap_incremental(acc, &bar) {
                Ok(v) => v,
                Err(e) => {
                    warn!("entry evaluation: vwap update rejected, skipping tick: {}", e);
                    return Ok(());
                }
            }
        };

        let oi_change = {
            let state = self.state.read().await;
            analyzer::oi_change(&key, current_oi, &state.last_oi_per_key)
        };
        {
            let mut state = self.state.write().await;
            for (k, b) in &chain {
                if let Some(oi) = b.open_interest {
                    state.last_oi_per_key.insert(*k, oi);
                }
            }
        }

        if !(analyzer::is_unwinding(&oi_change) && bar.close > vwap) {
            return Ok(());
        }

        self.emit(
            EventType::EntrySignal,
            EventPayload::EntrySignal {
                option_key_label: key.label(),
            },
        )
        .await;

        // Recorded at signal time, before submitBuy — the entry OI
        // baseline is the bar that triggered the signal, not whatever OI
        // happens to be current at fill confirmation.
        let oi_at_entry = current_oi;
        let vwap_at_entry = vwap;
        let initial_stop = bar.close * (1.0 - self.config.exit.initial_stop_loss_pct);

        match self
            .paper_broker
            .submit_buy(
                key,
                self.config.market.option_lot_size,
                bar.close,
                now,
                initial_stop,
                vwap_at_entry,
                oi_at_entry,
            )
            .await
        {
            Ok(position) => {
                info!(
                    "entry filled: {} strike={} @ {:.2}",
                    key.option_type.as_str(),
                    strike,
                    bar.close
                );
                self.emit(
                    EventType::EntryFilled,
                    EventPayload::EntryFilled {
                        order_id: position.order_id.clone(),
                        option_key_label: key.label(),
                        entry_price: position.entry_price,
                        quantity: position.quantity,
                    },
                )
                .await;
                self.state.write().await.active_position = Some(position);
            }
            Err(e) => {
                warn!("entry refused by broker, staying analyzed: {}", e);
                self.emit(
                    EventType::EntryRefused,
                    EventPayload::EntryRefused { reason: e.to_string() },
                )
                .await;
            }
        }

        Ok(())
    }

    /// Keeps the held option's VWAP/OI state current during Holding so
    /// rule 2 and rule 3 of exit evaluation see fresh readings even though
    /// the exit loop itself only polls LTP every minute.
    async fn refresh_holding_market_data(&self, broker: &Broker, now: Instant) -> Result<()> {
        let key = {
            let state = self.state.read().await;
            match state.active_position.as_ref() {
                Some(p) => p.option_key,
                None => return Ok(()),
            }
        };

        let bar = match broker.get_five_minute_candle(key, now).await {
            Ok(b) => b,
            Err(e) => {
                if !e.is_transient() {
                    warn!("holding: market data refresh failed: {}", e);
                }
                return Ok(());
            }
        };

        let mut state = self.state.write().await;
        if let Some(acc) = state.vwap_accumulators.get_mut(&key) {
            let _ = analyzer::update_vwap_incremental(acc, &bar);
        }
        if let Some(oi) = bar.open_interest {
            state.last_oi_per_key.insert(key, oi);
        }
        Ok(())
    }

    /// Exit evaluation: fetch LTP, skip the tick on missing/stale data,
    /// then run the five ordered rules and act on whichever fires first.
    async fn evaluate_exit(&self, broker: &Broker, now: Instant) -> Result<()> {
        const STALE_SECONDS: i64 = 120;

        let position = {
            let state = self.state.read().await;
            match state.active_position.clone() {
                Some(p) => p,
                None => return Ok(()),
            }
        };

        let ltp = match broker.get_ltp(position.option_key).await {
            Ok(l) => l,
            Err(e) => {
                warn!("exit evaluation: ltp unavailable, skipping tick: {}", e);
                self.emit(
                    EventType::TickSkipped,
                    EventPayload::TickSkipped {
                        reason: "missing_ltp".into(),
                    },
                )
                .await;
                return Ok(());
            }
        };
        if ltp.age_seconds(now) > STALE_SECONDS {
            warn!("exit evaluation: stale quote ({}s old), skipping tick", ltp.age_seconds(now));
            self.emit(
                EventType::TickSkipped,
                EventPayload::TickSkipped {
                    reason: "stale_quote".into(),
                },
            )
            .await;
            return Ok(());
        }

        let (current_vwap, current_oi) = {
            let state = self.state.read().await;
            let vwap = state
                .vwap_accumulators
                .get(&position.option_key)
                .and_then(|a| a.vwap())
                .unwrap_or(position.vwap_at_entry);
            let oi = *state
                .last_oi_per_key
                .get(&position.option_key)
                .unwrap_or(&position.oi_at_entry);
            (vwap, oi)
        };

        let tick = rules::evaluate_exit_rules(&position, ltp.price, current_vwap, current_oi, now, &self.config.exit);

        {
            let mut state = self.state.write().await;
            if let Some(p) = state.active_position.as_mut() {
                p.peak_price = tick.peak_price;
                p.trailing_stop = tick.trailing_stop;
            }
        }

        let Some(decision) = tick.decision else {
            return Ok(());
        };

        let exit_price = match self.config.broker.exit_price_mode {
            ExitPriceMode::Strict => decision.strict_price,
            ExitPriceMode::Market => ltp.price,
        };

        self.emit(
            EventType::ExitSignal,
            EventPayload::ExitSignal {
                order_id: position.order_id.clone(),
                reason: decision.reason.as_str().to_string(),
            },
        )
        .await;

        let closed = self
            .paper_broker
            .submit_sell(&position.order_id, exit_price, decision.reason, now, current_oi, current_vwap)
            .await?;

        {
            let mut state = self.state.write().await;
            state.active_position = None;
            state.trade_taken = true;
            state.closed_positions.push(closed.clone());
        }

        info!(
            "exit filled: {} reason={} @ {:.2} pnl={:.2}",
            closed.position.order_id,
            decision.reason.as_str(),
            closed.exit_price,
            closed.pnl
        );
        self.emit(
            EventType::ExitFilled,
            EventPayload::ExitFilled {
                order_id: closed.position.order_id.clone(),
                exit_price: closed.exit_price,
                reason: decision.reason.as_str().to_string(),
                pnl: closed.pnl,
            },
        )
        .await;

        Ok(())
    }

    pub async fn update_heartbeat(&self) {
        self.state.write().await.heartbeat_instant = Some(now_ist());
    }
}
