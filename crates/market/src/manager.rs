use crate::handle::{HandleParts, SubscriptionHandle};
use crate::reconciler::{Outlets, Reconciler};
use dashmap::DashMap;
use kizashi_core::common::{Interval, StreamKey};
use kizashi_core::config::StreamConfig;
use kizashi_core::market::port::{ConnectionState, MarketDataProvider};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

/// # Summary
/// 订阅注册中心，为每个订阅创建独立的序列与对账任务。
///
/// # Invariants
/// - 订阅之间不共享任何序列状态，同一 (交易对, 周期) 的两个订阅各自独立。
/// - 句柄被丢弃后通过清理通道异步移除注册表条目。
pub struct MarketHub {
    // 原始行情数据源驱动
    provider: Arc<dyn MarketDataProvider>,
    config: StreamConfig,
    // 活跃订阅注册表，Value 跟随切换实时更新
    subscriptions: DashMap<Uuid, watch::Receiver<StreamKey>>,
    // 用于接收句柄销毁信号的发送端
    cleanup_tx: mpsc::Sender<Uuid>,
}

impl MarketHub {
    /// # Summary
    /// 初始化注册中心。
    ///
    /// # Logic
    /// 1. 创建 mpsc 通道用于资源清理。
    /// 2. 构造实例并包装为 Arc。
    /// 3. 启动后台协程监听清理通道，根据接收到的 ID 移除注册表条目。
    ///
    /// # Arguments
    /// * `provider`: 满足 MarketDataProvider 接口的数据源驱动。
    /// * `config`: 每个订阅使用的流参数。
    ///
    /// # Returns
    /// 返回 MarketHub 的共享指针。
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: StreamConfig) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Uuid>(100);
        let hub = Arc::new(Self {
            provider,
            config,
            subscriptions: DashMap::new(),
            cleanup_tx: tx,
        });

        let hub_ref = Arc::downgrade(&hub);
        tokio::spawn(async move {
            info!("Subscription cleanup monitor started");
            while let Some(id) = rx.recv().await {
                let Some(hub) = hub_ref.upgrade() else {
                    break;
                };
                if hub.subscriptions.remove(&id).is_some() {
                    debug!(%id, "Cleanup monitor: subscription removed");
                }
            }
        });

        hub
    }

    /// # Summary
    /// 订阅一个 (交易对, 周期)。
    ///
    /// # Logic
    /// 1. 创建状态、最新结果与事件广播通道。
    /// 2. 启动对账任务：加载历史后建立长连接。
    /// 3. 登记到注册表并返回句柄。
    ///
    /// # Arguments
    /// * `symbol`: 交易对代码，大小写不敏感。
    /// * `interval`: K 线周期。
    ///
    /// # Returns
    /// 订阅句柄，丢弃即取消订阅。
    pub fn subscribe(&self, symbol: &str, interval: Interval) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let key = StreamKey::new(symbol, interval);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (key_tx, key_rx) = watch::channel(key.clone());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (latest_tx, latest_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(self.config.event_buffer.max(1));

        let reconciler = Reconciler::new(
            key.clone(),
            self.provider.clone(),
            self.config.clone(),
            Outlets {
                key: key_tx,
                state: state_tx,
                latest: latest_tx,
                events: events_tx.clone(),
            },
        );
        let task = tokio::spawn(reconciler.run(cmd_rx)).abort_handle();

        self.subscriptions.insert(id, key_rx.clone());
        info!(%id, key = %key, "Subscribed");

        SubscriptionHandle::new(HandleParts {
            id,
            commands: cmd_tx,
            key: key_rx,
            state: state_rx,
            latest: latest_rx,
            events: events_tx,
            task,
            cleanup_tx: self.cleanup_tx.clone(),
        })
    }

    /// 取消订阅，立即从注册表移除并停止对账任务
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.remove(&handle.id());
        info!(id = %handle.id(), key = %handle.key(), "Unsubscribed");
        drop(handle);
    }

    /// 为指定订阅请求向前补数
    pub fn request_backfill(&self, handle: &SubscriptionHandle, before: Option<i64>) {
        handle.request_backfill(before);
    }

    /// 当前活跃订阅数量
    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// 当前活跃订阅的 (交易对, 周期) 列表
    pub fn active_keys(&self) -> Vec<StreamKey> {
        self.subscriptions
            .iter()
            .map(|entry| entry.value().borrow().clone())
            .collect()
    }
}
