//! Front-end surface: single orders, OCO pairs, and at most one running strategy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{DeskError, ValidationError};
use crate::execution::{CancelAllReport, ExecutionEngine, OcoState};
use crate::gateway::RetryPolicy;
use crate::strategy::grid::{GridConfig, GridPlan, GridProgress, GridRuntime, run_grid};
use crate::strategy::handle::{StrategyHandle, StrategyKind, StrategyProgress, StrategySnapshot};
use crate::strategy::twap::{TwapPlan, TwapProgress, run_twap};
use crate::types::{AssetBalance, HistoricalOrder, OrderIntent, OrderRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySettings {
    pub grid_poll_interval: Duration,
    pub grid_retry: RetryPolicy,
    pub oco_poll_interval: Duration,
}

impl Default for StrategySettings {
    fn default() -> Self {
        let grid = GridRuntime::default();
        Self {
            grid_poll_interval: grid.poll_interval,
            grid_retry: grid.retry,
            oco_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Finished strategies kept queryable by handle id.
const FINISHED_HANDLES_KEPT: usize = 16;

pub struct TradingDesk {
    engine: Arc<ExecutionEngine>,
    settings: StrategySettings,
    shutdown: CancellationToken,
    next_handle: AtomicU64,
    active: Mutex<Option<Arc<StrategyHandle>>>,
    handles: Mutex<HashMap<u64, Arc<StrategyHandle>>>,
}

impl TradingDesk {
    pub fn new(engine: Arc<ExecutionEngine>, settings: StrategySettings) -> Self {
        Self {
            engine,
            settings,
            shutdown: CancellationToken::new(),
            next_handle: AtomicU64::new(1),
            active: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub async fn place_order(&self, intent: OrderIntent) -> Result<OrderRecord, DeskError> {
        self.engine.place_order(intent).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord, DeskError> {
        self.engine.cancel_order(order_id).await
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderRecord, DeskError> {
        self.engine.refresh_order(order_id).await
    }

    /// Cancels every open order on `symbol`. A running grid sees its orders
    /// end and stalls the affected levels.
    pub async fn cancel_all(&self, symbol: &str) -> Result<CancelAllReport, DeskError> {
        let report = self.engine.cancel_all(symbol).await?;
        tracing::info!(
            target: "desk",
            symbol,
            canceled = report.canceled.len(),
            failed = report.failed.len(),
            "cancel-all finished"
        );
        Ok(report)
    }

    pub async fn order_history(&self, symbol: &str, limit: u32) -> Result<Vec<HistoricalOrder>, DeskError> {
        self.engine.order_history(symbol, limit).await
    }

    pub async fn account_balances(&self) -> Result<Vec<AssetBalance>, DeskError> {
        self.engine.account_balances().await
    }

    /// Places the pair and starts a background watcher that enforces
    /// one-cancels-other until the pair settles.
    pub async fn place_oco(
        &self,
        first: OrderIntent,
        second: OrderIntent,
    ) -> Result<(OrderRecord, OrderRecord), DeskError> {
        let (a, b) = self.engine.place_oco(first, second).await?;
        let engine = Arc::clone(&self.engine);
        let key = a.exchange_order_id.clone();
        let interval = self.settings.oco_poll_interval;
        tokio::spawn(async move {
            match engine.watch_oco(&key, interval).await {
                Ok(OcoState::BothFilled) => {
                    tracing::error!(target: "desk", key = %key, "OCO settled with both legs filled");
                }
                Ok(state) => {
                    tracing::info!(target: "desk", key = %key, state = ?state, "OCO settled");
                }
                Err(err) => {
                    tracing::error!(target: "desk", key = %key, error = %err, "OCO watcher stopped");
                }
            }
        });
        Ok((a, b))
    }

    /// Builds a TWAP plan from the registered symbol rules. No network call.
    pub fn plan_twap(
        &self,
        parent: OrderIntent,
        total_duration: Duration,
        slice_count: u32,
    ) -> Result<TwapPlan, DeskError> {
        let rules = self.engine.registry().require(parent.symbol())?;
        Ok(TwapPlan::new(parent, total_duration, slice_count, &rules)?)
    }

    /// Builds a grid around the current ticker price.
    pub async fn plan_grid(&self, config: GridConfig) -> Result<GridPlan, DeskError> {
        let rules = self.engine.registry().require(&config.symbol)?;
        let reference = self.engine.gateway().ticker_price(&config.symbol).await?;
        Ok(GridPlan::new(config, reference, &rules)?)
    }

    pub fn start_twap(&self, plan: TwapPlan) -> Result<Arc<StrategyHandle>, DeskError> {
        let mut active = self.claim_slot()?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(&self.engine);
        let progress = StrategyProgress::Twap(TwapProgress::new(&plan));
        let handle = StrategyHandle::spawn(
            &self.shutdown,
            id,
            StrategyKind::Twap,
            progress,
            None,
            move |cancel, reporter| run_twap(engine, plan, cancel, reporter),
        );
        tracing::info!(target: "desk", strategy = id, "twap started");
        *active = Some(Arc::clone(&handle));
        self.register(&handle);
        Ok(handle)
    }

    pub fn start_grid(&self, plan: GridPlan) -> Result<Arc<StrategyHandle>, DeskError> {
        let mut active = self.claim_slot()?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(&self.engine);
        let runtime = GridRuntime {
            poll_interval: self.settings.grid_poll_interval,
            retry: self.settings.grid_retry,
        };
        let (fill_tx, fill_rx) = mpsc::unbounded_channel();
        let progress = StrategyProgress::Grid(GridProgress::new(&plan));
        let handle = StrategyHandle::spawn(
            &self.shutdown,
            id,
            StrategyKind::Grid,
            progress,
            Some(fill_tx),
            move |cancel, reporter| run_grid(engine, plan, runtime, cancel, reporter, fill_rx),
        );
        tracing::info!(target: "desk", strategy = id, "grid started");
        *active = Some(Arc::clone(&handle));
        self.register(&handle);
        Ok(handle)
    }

    /// Requests a cooperative stop and waits for the strategy to settle.
    pub async fn stop(&self, handle_id: u64) -> Result<StrategySnapshot, DeskError> {
        let handle = self.handle(handle_id)?;
        handle.request_stop();
        let snapshot = handle.join().await;
        tracing::info!(target: "desk", strategy = handle_id, status = snapshot.status.as_str(), "strategy stopped");
        Ok(snapshot)
    }

    /// Stops every running strategy and waits for each to settle. Strategies
    /// cannot be started afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let running: Vec<Arc<StrategyHandle>> = self
            .handles()
            .values()
            .filter(|handle| !handle.is_finished())
            .cloned()
            .collect();
        for handle in running {
            let snapshot = handle.join().await;
            tracing::info!(target: "desk", strategy = handle.id(), status = snapshot.status.as_str(), "strategy stopped at shutdown");
        }
    }

    pub fn status(&self, handle_id: u64) -> Result<StrategySnapshot, DeskError> {
        Ok(self.handle(handle_id)?.snapshot())
    }

    pub fn handle(&self, handle_id: u64) -> Result<Arc<StrategyHandle>, DeskError> {
        self.handles()
            .get(&handle_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStrategy { handle: handle_id }.into())
    }

    fn claim_slot(&self) -> Result<MutexGuard<'_, Option<Arc<StrategyHandle>>>, DeskError> {
        let active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "desk", "active strategy lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if self.shutdown.is_cancelled() {
            return Err(ValidationError::DeskShutDown.into());
        }
        if let Some(running) = active.as_ref() {
            if !running.is_finished() {
                return Err(ValidationError::StrategyAlreadyRunning {
                    handle: running.id(),
                }
                .into());
            }
        }
        Ok(active)
    }

    /// Adds a new handle and drops the oldest finished ones past the limit.
    fn register(&self, handle: &Arc<StrategyHandle>) {
        let mut handles = self.handles();
        handles.insert(handle.id(), Arc::clone(handle));
        let mut finished: Vec<u64> = handles
            .values()
            .filter(|existing| existing.is_finished())
            .map(|existing| existing.id())
            .collect();
        if finished.len() > FINISHED_HANDLES_KEPT {
            finished.sort_unstable();
            for id in &finished[..finished.len() - FINISHED_HANDLES_KEPT] {
                handles.remove(id);
            }
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<u64, Arc<StrategyHandle>>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
