use crate::analysis::entity::AnalysisReport;
use crate::common::{Interval, StreamKey};
use crate::market::entity::Kline;
use crate::market::error::MarketError;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// # Summary
/// 实时推送中的一条 K 线更新，携带其所属的交易对与周期。
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    // 消息声明的交易对
    pub symbol: String,
    // 消息声明的周期
    pub interval: Interval,
    // K 线记录，`is_final = false` 表示尚未收盘的进行中 K 线
    pub kline: Kline,
}

/// # Summary
/// 长连接上产生的事件，对应 onMessage / onError / onClose 回调。
///
/// # Invariants
/// - `Closed` 之后流不再产生任何事件。
/// - `Error` 之后数据源必须随即结束该流。
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    // 成功解析的 K 线更新
    Kline(KlineUpdate),
    // 无法解析的原始消息，由消费方丢弃
    Malformed(String),
    // 传输层错误
    Error(String),
    // 连接关闭
    Closed { code: Option<u16>, reason: String },
}

/// # Summary
/// 行情连接事件流别名，使用动态分发的异步流。
pub type FeedStream = Pin<Box<dyn Stream<Item = FeedEvent> + Send>>;

/// # Summary
/// 市场行情数据提供者接口（原始数据源）。
///
/// # Invariants
/// - `fetch_history` 返回的记录按时间升序，数量不超过 `limit`。
/// - `connect` 返回 Ok 即视为连接已打开 (onOpen)；流结束即视为连接关闭。
/// - 实现者不负责重连，重连策略由上层对账器统一管理。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// # Summary
    /// 获取历史 K 线。
    ///
    /// # Logic
    /// 1. 构建数据源请求，若给定 `end_before` 则只返回开始时间严格小于它的记录。
    /// 2. 执行网络请求并解析响应数据。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    /// * `limit`: 请求的数量上限。
    /// * `end_before`: 可选的截止时间（Unix 秒，不包含）。
    ///
    /// # Returns
    /// 成功返回按时间升序的 K 线列表，失败返回 MarketError。
    async fn fetch_history(
        &self,
        key: &StreamKey,
        limit: usize,
        end_before: Option<i64>,
    ) -> Result<Vec<Kline>, MarketError>;

    /// # Summary
    /// 打开实时 K 线长连接。
    ///
    /// # Logic
    /// 1. 建立连接，失败时立即返回错误。
    /// 2. 连接成功后持续产出 FeedEvent，直到连接关闭。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    ///
    /// # Returns
    /// 成功返回事件流。
    async fn connect(&self, key: &StreamKey) -> Result<FeedStream, MarketError>;
}

/// # Summary
/// 订阅的连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    // 重连次数耗尽后的终态，需显式重新订阅
    Failed,
}

/// # Summary
/// 向订阅方分发的事件。
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    // 序列发生变更后重新计算的分析结果
    Analysis(Arc<AnalysisReport>),
    // 连接状态变化
    StateChanged(ConnectionState),
    // 已安排第 `attempt` 次重连，等待 `delay` 后发起
    Reconnecting { attempt: u32, delay: Duration },
    // 历史数据获取失败，序列保持不变
    FetchFailed(String),
    // 重连次数耗尽
    ConnectionFailed { attempts: u32 },
}

/// 订阅事件流别名
pub type EventStream = Pin<Box<dyn Stream<Item = SubscriptionEvent> + Send>>;
