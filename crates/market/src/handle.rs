use crate::reconciler::Command;
use kizashi_core::analysis::entity::AnalysisReport;
use kizashi_core::common::{Interval, StreamKey};
use kizashi_core::market::port::{ConnectionState, EventStream, SubscriptionEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// # Summary
/// 单个订阅的消费方句柄。
///
/// # Invariants
/// - 句柄被丢弃时对账任务被中止，挂起的重连计时器与在途回填一并取消。
/// - 读取类方法只访问对账任务发布的最新值，不会阻塞写入方。
pub struct SubscriptionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    key: watch::Receiver<StreamKey>,
    state: watch::Receiver<ConnectionState>,
    latest: watch::Receiver<Option<Arc<AnalysisReport>>>,
    events: broadcast::Sender<SubscriptionEvent>,
    task: AbortHandle,
    // 通知注册表移除条目
    cleanup_tx: mpsc::Sender<Uuid>,
}

/// 构造句柄所需的各端
pub(crate) struct HandleParts {
    pub id: Uuid,
    pub commands: mpsc::UnboundedSender<Command>,
    pub key: watch::Receiver<StreamKey>,
    pub state: watch::Receiver<ConnectionState>,
    pub latest: watch::Receiver<Option<Arc<AnalysisReport>>>,
    pub events: broadcast::Sender<SubscriptionEvent>,
    pub task: AbortHandle,
    pub cleanup_tx: mpsc::Sender<Uuid>,
}

impl SubscriptionHandle {
    pub(crate) fn new(parts: HandleParts) -> Self {
        Self {
            id: parts.id,
            commands: parts.commands,
            key: parts.key,
            state: parts.state,
            latest: parts.latest,
            events: parts.events,
            task: parts.task,
            cleanup_tx: parts.cleanup_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 当前订阅的 (交易对, 周期)，切换后随之更新
    pub fn key(&self) -> StreamKey {
        self.key.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 最近一次发布的分析结果
    pub fn latest(&self) -> Option<Arc<AnalysisReport>> {
        self.latest.borrow().clone()
    }

    /// # Summary
    /// 订阅事件流。
    ///
    /// # Logic
    /// 1. 调用时立即注册接收端，之后发布的事件都不会遗漏。
    /// 2. 消费过慢导致积压时跳过被覆盖的事件并记录告警。
    /// 3. 对账任务结束后流随之结束。
    ///
    /// # Returns
    /// 异步事件流。
    pub fn events(&self) -> EventStream {
        let mut rx = self.events.subscribe();
        let id = self.id;
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%id, skipped, "Subscription consumer lagging, events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// # Summary
    /// 注册分析更新回调，每次序列变更后触发。
    ///
    /// # Logic
    /// 1. 由最新结果通道驱动，注册前已发布的结果会立即回调一次。
    /// 2. 回调慢于写入时，期间的多次更新合并为一次，回调拿到的始终是最新结果。
    /// 3. 切换期间结果被清空，此时不回调。
    ///
    /// # Arguments
    /// * `callback`: 接收最新分析结果的回调。
    ///
    /// # Returns
    /// 回调任务的中止句柄。
    pub fn on_analysis_updated<F>(&self, callback: F) -> AbortHandle
    where
        F: Fn(Arc<AnalysisReport>) + Send + 'static,
    {
        let mut latest = self.latest.clone();
        tokio::spawn(async move {
            while latest.changed().await.is_ok() {
                let report = latest.borrow_and_update().clone();
                if let Some(report) = report {
                    callback(report);
                }
            }
        })
        .abort_handle()
    }

    /// # Summary
    /// 请求向前补数。
    ///
    /// # Logic
    /// 上界取 min(before, 最早一根时间)；已有回填在途时请求被忽略。
    ///
    /// # Arguments
    /// * `before`: 可选的不包含上界 (Unix 秒)。
    pub fn request_backfill(&self, before: Option<i64>) {
        self.send(Command::Backfill { before });
    }

    /// 切换到新的 (交易对, 周期)：丢弃旧连接与序列，重新加载历史并连接
    pub fn switch(&self, symbol: &str, interval: Interval) {
        self.send(Command::Switch(StreamKey::new(symbol, interval)));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(id = %self.id, "Reconciler gone, command dropped");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        if self.cleanup_tx.try_send(self.id).is_err() {
            debug!(id = %self.id, "Registry cleanup channel unavailable");
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &*self.key.borrow())
            .field("state", &*self.state.borrow())
            .finish()
    }
}
