//! 测试辅助：可编排的行情数据源。

use crate::common::StreamKey;
use crate::market::entity::{Candle, Kline};
use crate::market::error::MarketError;
use crate::market::port::{FeedEvent, FeedStream, MarketDataProvider};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 一次历史数据请求的记录
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub key: StreamKey,
    pub limit: usize,
    pub end_before: Option<i64>,
}

enum ConnectPlan {
    Refuse(String),
    Accept(mpsc::UnboundedReceiver<FeedEvent>),
}

/// # Summary
/// 按脚本响应的模拟数据源。
///
/// # Invariants
/// - 历史请求按入队顺序消费脚本，脚本耗尽后返回空列表。
/// - 连接请求按入队顺序消费脚本，脚本耗尽后一律拒绝连接。
/// - 被接受的连接在测试持有的发送端被丢弃时结束。
#[derive(Default)]
pub struct MockProvider {
    history: Mutex<VecDeque<Result<Vec<Kline>, MarketError>>>,
    history_requests: Mutex<Vec<HistoryRequest>>,
    history_latency: Mutex<Option<Duration>>,
    connections: Mutex<VecDeque<ConnectPlan>>,
    connect_log: Mutex<Vec<(StreamKey, Instant)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一次历史请求的响应
    pub fn push_history(&self, response: Result<Vec<Kline>, MarketError>) {
        lock(&self.history).push_back(response);
    }

    /// 为每次历史请求增加固定延迟，用于模拟请求在途
    pub fn set_history_latency(&self, latency: Duration) {
        *lock(&self.history_latency) = Some(latency);
    }

    /// 追加一次被拒绝的连接
    pub fn refuse_connection(&self, reason: &str) {
        lock(&self.connections).push_back(ConnectPlan::Refuse(reason.to_string()));
    }

    /// # Summary
    /// 追加一次会被接受的连接。
    ///
    /// # Returns
    /// 向该连接推送事件的发送端；丢弃即关闭连接。
    pub fn accept_connection(&self) -> mpsc::UnboundedSender<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.connections).push_back(ConnectPlan::Accept(rx));
        tx
    }

    /// 已收到的历史请求
    pub fn history_requests(&self) -> Vec<HistoryRequest> {
        lock(&self.history_requests).clone()
    }

    /// 每次连接尝试的时刻（tokio 时钟）
    pub fn connect_instants(&self) -> Vec<Instant> {
        lock(&self.connect_log).iter().map(|(_, at)| *at).collect()
    }

    /// 每次连接尝试的订阅键
    pub fn connect_keys(&self) -> Vec<StreamKey> {
        lock(&self.connect_log).iter().map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_history(
        &self,
        key: &StreamKey,
        limit: usize,
        end_before: Option<i64>,
    ) -> Result<Vec<Kline>, MarketError> {
        lock(&self.history_requests).push(HistoryRequest {
            key: key.clone(),
            limit,
            end_before,
        });
        let latency = *lock(&self.history_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = lock(&self.history).pop_front();
        scripted.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn connect(&self, key: &StreamKey) -> Result<FeedStream, MarketError> {
        lock(&self.connect_log).push((key.clone(), Instant::now()));
        let plan = lock(&self.connections).pop_front();
        match plan {
            Some(ConnectPlan::Accept(rx)) => {
                let stream = async_stream::stream! {
                    let mut rx = rx;
                    while let Some(event) = rx.recv().await {
                        yield event;
                    }
                };
                Ok(Box::pin(stream))
            }
            Some(ConnectPlan::Refuse(reason)) => Err(MarketError::Network(reason)),
            None => Err(MarketError::Network("no scripted connection".to_string())),
        }
    }
}

/// 构造一根 K 线记录
pub fn kline(time: i64, open: f64, high: f64, low: f64, close: f64) -> Kline {
    Kline {
        candle: Candle {
            time,
            open,
            high,
            low,
            close,
        },
        volume: 1.0,
        is_final: true,
    }
}

/// 构造一段收盘价逐根上涨 1 的 K 线，时间间隔 60 秒
pub fn rising_klines(start_time: i64, count: usize, start_price: f64) -> Vec<Kline> {
    let mut price = start_price;
    let mut time = start_time;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(kline(time, price, price + 1.5, price - 0.5, price + 1.0));
        price += 1.0;
        time += 60;
    }
    out
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
