/// Dual-Loop Runner: the process that owns the broker connection, the
/// contract cache, the strategy engine, and the state/trade-log writers,
/// and drives them from three cooperating tasks — a 5-minute entry task, a
/// 1-minute exit task, and a low-priority cache watcher.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::{Broker, PaperBroker, PaperBrokerSnapshot};
use crate::cache::ContractCache;
use crate::config::credentials::DetectedBroker;
use crate::config::loader::{BrokerMode, Config};
use crate::config::Credentials;
use crate::error::Result;
use crate::events::EventBus;
use crate::positions::TradeLog;
use crate::state::{PortfolioSnapshot, StateDocument, StateManager, SystemHealth};
use crate::strategy::StrategyEngine;
use crate::types::now_ist;

pub struct RunnerPaths {
    pub token_file: PathBuf,
    pub cache_file: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub event_log_file: PathBuf,
}

pub struct Runner {
    broker: Arc<Broker>,
    cache: Arc<ContractCache>,
    paper_broker: Arc<PaperBroker>,
    strategy: Arc<StrategyEngine>,
    state_manager: Arc<StateManager>,
    trade_log: Arc<TradeLog>,
    config: Config,
    session_id: String,
    shutdown: Arc<AtomicBool>,
    /// Count of `closed_positions` as of the last trade-log append, shared
    /// by both loops so only the tick that actually closed the trade
    /// writes the row — only `exit_loop` ever advances it, but `entry_loop`
    /// reads the same cursor so it never re-appends a stale one.
    last_closed_count: AtomicUsize,
}

impl Runner {
    pub async fn bootstrap(
        config: Config,
        credentials: &Credentials,
        forced_broker: Option<DetectedBroker>,
        paths: RunnerPaths,
    ) -> Result<Self> {
        let broker = Arc::new(Broker::from_credentials_with_override(
            forced_broker,
            credentials,
            paths.token_file.to_string_lossy().into_owned(),
        )?);
        broker.connect().await?;
        info!("✅ Broker connected");

        let cache = Arc::new(ContractCache::new(&paths.cache_file));
        if let Err(e) = cache.load().await {
            warn!("⚠️  Contract cache unavailable at startup ({}), falling back to broker.get_next_expiry", e);
        }

        let paper_broker = Arc::new(PaperBroker::new(
            config.position_sizing.initial_capital,
            config.risk_management.max_positions as usize,
        ));

        let event_bus = Arc::new(EventBus::new(paths.event_log_file.to_string_lossy().into_owned()));
        event_bus.start_processing().await;

        let state_manager = Arc::new(StateManager::new(paths.state_dir.clone()));
        let trade_log = TradeLog::new(TradeLog::session_path(&paths.log_dir, now_ist().naive_local()));

        let session_date = now_ist().date_naive();
        let recovered = state_manager.check_recoverable(session_date).await?;

        let strategy = match recovered {
            Some(document) => {
                info!("🔄 Resuming from recoverable state ({})", session_date);
                let restored_state = document.restore_daily_state();
                paper_broker
                    .restore(PaperBrokerSnapshot {
                        cash: document.portfolio.cash,
                        active_positions: restored_state.active_position.clone().into_iter().collect(),
                    })
                    .await;
                let engine = StrategyEngine::new(
                    config.clone(),
                    cache.clone(),
                    paper_broker.clone(),
                    Some(event_bus.clone()),
                    session_date,
                );
                engine.restore_state(restored_state).await;
                Arc::new(engine)
            }
            None => {
                state_manager.archive_if_present(session_date).await?;
                Arc::new(StrategyEngine::new(
                    config.clone(),
                    cache.clone(),
                    paper_broker.clone(),
                    Some(event_bus.clone()),
                    session_date,
                ))
            }
        };

        Ok(Self {
            broker,
            cache,
            paper_broker,
            strategy,
            state_manager,
            trade_log,
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
            last_closed_count: AtomicUsize::new(0),
        })
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let entry_runner = self.clone();
        let exit_runner = self.clone();
        let cache_runner = self.clone();

        let entry_task = tokio::spawn(async move { entry_runner.entry_loop().await });
        let exit_task = tokio::spawn(async move { exit_runner.exit_loop().await });
        let cache_task = tokio::spawn(async move { cache_runner.cache_watch_loop().await });

        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        self.shutdown.store(true, Ordering::SeqCst);

        let _ = entry_task.await;
        let _ = exit_task.await;
        let _ = cache_task.await;

        self.flush_state(self.health_snapshot(false, false)).await?;
        self.broker.logout().await;
        info!("👋 Shutdown complete");
        Err(crate::error::EngineError::Shutdown("interrupted by signal".into()))
    }

    async fn entry_loop(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = now_ist();
            if crate::time::is_trading_day(now) && crate::time::session::is_at_or_after_session_start(now) {
                if let Err(e) = self.strategy.run_five_minute_tick(&self.broker, now).await {
                    error!("❌ Entry tick failed: {}", e);
                }
                self.strategy.update_heartbeat().await;
                if let Err(e) = self.after_tick(true, false).await {
                    error!("❌ State flush failed after entry tick: {}", e);
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.broker.wait_until_next_five_minute_boundary().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }

    async fn exit_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            let now = now_ist();
            if let Err(e) = self.strategy.run_one_minute_tick(&self.broker, now).await {
                error!("❌ Exit tick failed: {}", e);
            }
            self.strategy.update_heartbeat().await;
            if let Err(e) = self.after_tick(false, true).await {
                error!("❌ State flush failed after exit tick: {}", e);
            }
        }
    }

    async fn cache_watch_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            match self.cache.check_for_update().await {
                Ok(true) => info!("🔄 Contract cache reloaded"),
                Ok(false) => {}
                Err(e) => warn!("⚠️  Cache check failed: {}", e),
            }
        }
    }

    /// Appends to the trade log before the state flush (durability on
    /// crash) whenever a tick closed a position, then always flushes.
    /// `last_closed_count` lives on `Runner` rather than per-loop: only
    /// `exit_loop` ever closes a position, but `entry_loop` calls this too,
    /// and a loop-local cursor would see the same new count as "new" again
    /// on its own next tick and double-append the row.
    async fn after_tick(&self, entry_running: bool, exit_running: bool) -> Result<()> {
        let snapshot = self.strategy.snapshot().await;
        let count = snapshot.closed_positions.len();
        let previous = self.last_closed_count.swap(count, Ordering::SeqCst);
        if count > previous {
            if let Some(closed) = snapshot.closed_positions.last() {
                self.trade_log.append(closed, &snapshot.last_oi_per_key).await?;
            }
        }
        self.flush_state(self.health_snapshot(entry_running, exit_running)).await
    }

    async fn flush_state(&self, health: SystemHealth) -> Result<()> {
        let snapshot = self.strategy.snapshot().await;
        let cash = self.paper_broker.cash().await;
        let positions_value = match &snapshot.active_position {
            Some(p) => match self.broker.get_ltp(p.option_key).await {
                Ok(ltp) => ltp.price * p.quantity as f64,
                Err(_) => p.entry_price * p.quantity as f64,
            },
            None => 0.0,
        };

        let document = StateDocument::build(
            &snapshot,
            &self.session_id,
            match self.config.broker.mode {
                BrokerMode::Paper => "paper",
                BrokerMode::Live => "live",
            },
            PortfolioSnapshot {
                cash,
                positions_value,
                initial_capital: self.config.position_sizing.initial_capital,
            },
            health,
        );
        self.state_manager.flush(&document).await
    }

    fn health_snapshot(&self, entry_loop_running: bool, exit_loop_running: bool) -> SystemHealth {
        SystemHealth {
            last_heartbeat: Some(now_ist().fixed_offset()),
            broker_connected: true,
            entry_loop_running,
            exit_loop_running,
            recovered_at: None,
        }
    }
}
