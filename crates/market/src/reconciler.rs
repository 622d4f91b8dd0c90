use crate::backoff::ReconnectPolicy;
use crate::series::{CandleSeries, MergeOutcome};
use futures::StreamExt;
use futures::future::BoxFuture;
use kizashi_analysis::analyze;
use kizashi_core::analysis::entity::AnalysisReport;
use kizashi_core::common::StreamKey;
use kizashi_core::config::StreamConfig;
use kizashi_core::market::entity::Kline;
use kizashi_core::market::error::MarketError;
use kizashi_core::market::port::{
    ConnectionState, FeedEvent, FeedStream, KlineUpdate, MarketDataProvider, SubscriptionEvent,
};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

/// 订阅句柄发往对账任务的指令
#[derive(Debug)]
pub(crate) enum Command {
    // 向前补数，`before` 为可选的不包含上界
    Backfill { before: Option<i64> },
    // 切换到新的 (交易对, 周期)
    Switch(StreamKey),
}

/// # Summary
/// 对账任务对外发布状态所用的发送端集合。
pub(crate) struct Outlets {
    pub key: watch::Sender<StreamKey>,
    pub state: watch::Sender<ConnectionState>,
    pub latest: watch::Sender<Option<Arc<AnalysisReport>>>,
    pub events: broadcast::Sender<SubscriptionEvent>,
}

type HistoryFuture = BoxFuture<'static, Result<Vec<Kline>, MarketError>>;
type ConnectFuture = BoxFuture<'static, Result<FeedStream, MarketError>>;

/// 数据源链路的当前阶段
enum Link {
    // 初始历史加载中
    Loading(HistoryFuture),
    // 正在建立长连接
    Connecting(ConnectFuture),
    // 长连接已打开
    Open(FeedStream),
    // 等待重连计时器
    Backoff(Pin<Box<Sleep>>),
    // 重连耗尽，等待显式切换
    Idle,
}

enum LinkEvent {
    Loaded(Result<Vec<Kline>, MarketError>),
    Opened(Result<FeedStream, MarketError>),
    Feed(Option<FeedEvent>),
    RetryDue,
}

/// 推进当前链路直到产生下一个事件；`Idle` 永不返回
async fn next_link_event(link: &mut Link) -> LinkEvent {
    match link {
        Link::Loading(fetch) => LinkEvent::Loaded(fetch.await),
        Link::Connecting(connect) => LinkEvent::Opened(connect.await),
        Link::Open(stream) => LinkEvent::Feed(stream.next().await),
        Link::Backoff(timer) => {
            timer.as_mut().await;
            LinkEvent::RetryDue
        }
        Link::Idle => std::future::pending().await,
    }
}

async fn poll_backfill(pending: &mut Option<HistoryFuture>) -> Result<Vec<Kline>, MarketError> {
    match pending {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

/// # Summary
/// 单个订阅的流对账器，序列的唯一写入者。
///
/// # Invariants
/// - 所有对序列的修改都在 `run` 所在的单个任务内串行执行。
/// - 任意时刻至多一个回填请求在途。
/// - 切换订阅时旧连接、重连计时器与在途回填一并丢弃。
pub(crate) struct Reconciler {
    key: StreamKey,
    provider: Arc<dyn MarketDataProvider>,
    config: StreamConfig,
    policy: ReconnectPolicy,
    series: CandleSeries,
    // 连续失败的连接次数，连接成功后归零
    failures: u32,
    outlets: Outlets,
}

impl Reconciler {
    pub fn new(
        key: StreamKey,
        provider: Arc<dyn MarketDataProvider>,
        config: StreamConfig,
        outlets: Outlets,
    ) -> Self {
        Self {
            key,
            provider,
            policy: ReconnectPolicy::from(&config.reconnect),
            series: CandleSeries::new(config.series_capacity),
            config,
            failures: 0,
            outlets,
        }
    }

    /// # Summary
    /// 对账主循环。
    ///
    /// # Logic
    /// 1. 先加载历史数据，再建立长连接。
    /// 2. 同时等待三类事件：句柄指令、链路事件、回填结果。
    /// 3. 指令通道关闭（句柄被丢弃）时退出，链路与计时器随之释放。
    ///
    /// # Arguments
    /// * `commands`: 句柄指令接收端。
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(key = %self.key, "Reconciler started");
        let mut link = self.load_history();
        let mut backfill: Option<HistoryFuture> = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Backfill { before }) => self.start_backfill(&mut backfill, before),
                    Some(Command::Switch(key)) => {
                        backfill = None;
                        link = self.switch(key);
                    }
                    None => break,
                },
                event = next_link_event(&mut link) => {
                    if let Some(next) = self.on_link_event(event) {
                        link = next;
                    }
                }
                result = poll_backfill(&mut backfill), if backfill.is_some() => {
                    backfill = None;
                    self.finish_backfill(result);
                }
            }
        }
        info!(key = %self.key, "Reconciler stopped");
    }

    fn load_history(&self) -> Link {
        let provider = self.provider.clone();
        let key = self.key.clone();
        let limit = self.config.history_limit;
        debug!(key = %key, limit, "Loading history");
        Link::Loading(Box::pin(async move {
            provider.fetch_history(&key, limit, None).await
        }))
    }

    fn connect(&self) -> Link {
        self.set_state(ConnectionState::Connecting);
        let provider = self.provider.clone();
        let key = self.key.clone();
        Link::Connecting(Box::pin(async move { provider.connect(&key).await }))
    }

    /// # Summary
    /// 处理链路事件。
    ///
    /// # Returns
    /// 需要切换链路阶段时返回新的阶段。
    fn on_link_event(&mut self, event: LinkEvent) -> Option<Link> {
        match event {
            LinkEvent::Loaded(result) => {
                match result.and_then(|klines| {
                    self.series.replace_all(klines).map_err(MarketError::from)
                }) {
                    Ok(()) => {
                        info!(key = %self.key, candles = self.series.len(), "History loaded");
                        self.publish();
                    }
                    Err(e) => self.fetch_failed(e),
                }
                Some(self.connect())
            }
            LinkEvent::Opened(Ok(stream)) => {
                info!(key = %self.key, "Stream connected");
                self.failures = 0;
                self.set_state(ConnectionState::Connected);
                Some(Link::Open(stream))
            }
            LinkEvent::Opened(Err(e)) => {
                warn!(key = %self.key, error = %e, "Stream connect failed");
                Some(self.schedule_reconnect())
            }
            LinkEvent::Feed(Some(FeedEvent::Kline(update))) => {
                self.apply(update);
                None
            }
            LinkEvent::Feed(Some(FeedEvent::Malformed(raw))) => {
                warn!(key = %self.key, raw = %raw, "Malformed stream message dropped");
                None
            }
            LinkEvent::Feed(Some(FeedEvent::Error(message))) => {
                warn!(key = %self.key, error = %message, "Stream transport error");
                None
            }
            LinkEvent::Feed(Some(FeedEvent::Closed { code, reason })) => {
                warn!(key = %self.key, ?code, reason = %reason, "Stream closed");
                Some(self.schedule_reconnect())
            }
            LinkEvent::Feed(None) => {
                warn!(key = %self.key, "Stream ended");
                Some(self.schedule_reconnect())
            }
            LinkEvent::RetryDue => Some(self.connect()),
        }
    }

    /// # Summary
    /// 记录一次连接失败并决定下一阶段。
    ///
    /// # Logic
    /// 1. 失败计数加一。
    /// 2. 仍在重连预算内：进入 Disconnected，发布 `Reconnecting` 并启动计时器。
    /// 3. 预算耗尽：进入 Failed，发布 `ConnectionFailed`，不再自动重连。
    fn schedule_reconnect(&mut self) -> Link {
        self.failures = self.failures.saturating_add(1);
        match self.policy.delay_for(self.failures) {
            Some(delay) => {
                info!(
                    key = %self.key,
                    attempt = self.failures,
                    delay_ms = delay.as_millis(),
                    "Reconnect scheduled"
                );
                self.set_state(ConnectionState::Disconnected);
                self.emit(SubscriptionEvent::Reconnecting {
                    attempt: self.failures,
                    delay,
                });
                Link::Backoff(Box::pin(tokio::time::sleep(delay)))
            }
            None => {
                error!(key = %self.key, attempts = self.failures, "Reconnect budget exhausted");
                self.set_state(ConnectionState::Failed);
                self.emit(SubscriptionEvent::ConnectionFailed {
                    attempts: self.failures,
                });
                Link::Idle
            }
        }
    }

    fn apply(&mut self, update: KlineUpdate) {
        if !self.key.matches(&update.symbol, update.interval) {
            debug!(
                key = %self.key,
                symbol = %update.symbol,
                interval = %update.interval,
                "Message for another stream ignored"
            );
            return;
        }
        let time = update.kline.candle.time;
        match self.series.merge_update(update.kline) {
            MergeOutcome::Ignored => debug!(key = %self.key, time, "Stale kline ignored"),
            MergeOutcome::Replaced | MergeOutcome::Appended => self.publish(),
        }
    }

    /// # Summary
    /// 发起一次向前补数。
    ///
    /// # Logic
    /// 1. 已有在途回填或序列为空时忽略。
    /// 2. 上界取 min(before, 最早一根时间)，未指定 before 时取最早一根时间。
    fn start_backfill(&self, pending: &mut Option<HistoryFuture>, before: Option<i64>) {
        if pending.is_some() {
            debug!(key = %self.key, "Backfill already in flight, request dropped");
            return;
        }
        let Some(earliest) = self.series.first_time() else {
            debug!(key = %self.key, "Series empty, backfill skipped");
            return;
        };
        let end_before = before.map_or(earliest, |b| b.min(earliest));
        let provider = self.provider.clone();
        let key = self.key.clone();
        let limit = self.config.backfill_limit;
        debug!(key = %key, end_before, limit, "Backfill requested");
        *pending = Some(Box::pin(async move {
            provider.fetch_history(&key, limit, Some(end_before)).await
        }));
    }

    fn finish_backfill(&mut self, result: Result<Vec<Kline>, MarketError>) {
        match result {
            Ok(klines) => {
                let added = self.series.merge_backfill(klines);
                info!(key = %self.key, added, total = self.series.len(), "Backfill merged");
                if added > 0 {
                    self.publish();
                }
            }
            Err(e) => self.fetch_failed(e),
        }
    }

    fn switch(&mut self, key: StreamKey) -> Link {
        info!(from = %self.key, to = %key, "Switching subscription");
        self.key = key.clone();
        self.series.clear();
        self.failures = 0;
        self.outlets.key.send_replace(key);
        self.outlets.latest.send_replace(None);
        self.set_state(ConnectionState::Disconnected);
        self.load_history()
    }

    fn fetch_failed(&self, err: MarketError) {
        warn!(key = %self.key, error = %err, "History fetch failed");
        self.emit(SubscriptionEvent::FetchFailed(err.to_string()));
    }

    /// 从当前快照重新计算并发布分析结果
    fn publish(&self) {
        let report = Arc::new(analyze(self.key.clone(), self.series.klines()));
        self.outlets.latest.send_replace(Some(report.clone()));
        self.emit(SubscriptionEvent::Analysis(report));
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.outlets.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            self.emit(SubscriptionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SubscriptionEvent) {
        // 没有订阅者时发送失败，属正常情况
        self.outlets.events.send(event).ok();
    }
}
