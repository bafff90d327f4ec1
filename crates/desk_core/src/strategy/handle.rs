use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::grid::GridProgress;
use super::twap::TwapProgress;
use crate::types::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Twap,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Running,
    Completed,
    Canceled,
    Failed,
}

impl StrategyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StrategyStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyStatus::Running => "RUNNING",
            StrategyStatus::Completed => "COMPLETED",
            StrategyStatus::Canceled => "CANCELED",
            StrategyStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyProgress {
    Twap(TwapProgress),
    Grid(GridProgress),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySnapshot {
    pub id: u64,
    pub kind: StrategyKind,
    pub status: StrategyStatus,
    pub progress: StrategyProgress,
    /// Set when the strategy failed; carries the orders left open.
    pub error: Option<String>,
    pub open_orders: Vec<OrderId>,
}

/// Write side of a strategy's status channel, owned by the strategy task.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<StrategySnapshot>,
}

impl StatusReporter {
    pub fn update(&self, apply: impl FnOnce(&mut StrategySnapshot)) {
        self.tx.send_modify(apply);
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        self.tx.borrow().clone()
    }
}

/// Caller-side handle to a running strategy task.
#[derive(Debug)]
pub struct StrategyHandle {
    id: u64,
    kind: StrategyKind,
    cancel: CancellationToken,
    status_rx: watch::Receiver<StrategySnapshot>,
    fill_tx: Option<mpsc::UnboundedSender<OrderId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyHandle {
    /// Starts the strategy task. The task receives a child of `parent`, so
    /// cancelling the parent stops every strategy spawned under it.
    pub(crate) fn spawn<F, Fut>(
        parent: &CancellationToken,
        id: u64,
        kind: StrategyKind,
        progress: StrategyProgress,
        fill_tx: Option<mpsc::UnboundedSender<OrderId>>,
        run: F,
    ) -> Arc<Self>
    where
        F: FnOnce(CancellationToken, StatusReporter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let (status_tx, status_rx) = watch::channel(StrategySnapshot {
            id,
            kind,
            status: StrategyStatus::Running,
            progress,
            error: None,
            open_orders: Vec::new(),
        });
        let task = tokio::spawn(run(cancel.clone(), StatusReporter { tx: status_tx }));
        Arc::new(Self {
            id,
            kind,
            cancel,
            status_rx,
            fill_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot().status.is_terminal()
    }

    /// Asks the strategy to stop at its next tick boundary.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Pushes a fill notification to a grid. Returns false for strategies that
    /// do not take notifications or have already exited.
    pub fn notify_fill(&self, order_id: &str) -> bool {
        match &self.fill_tx {
            Some(tx) => tx.send(order_id.to_string()).is_ok(),
            None => false,
        }
    }

    /// Waits for the strategy task to exit and returns its final snapshot.
    pub async fn join(&self) -> StrategySnapshot {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(target: "desk", strategy = self.id, error = %err, "strategy task aborted");
            }
        } else {
            let mut rx = self.status_rx.clone();
            let _ = rx.wait_for(|snapshot| snapshot.status.is_terminal()).await;
        }
        self.snapshot()
    }
}
