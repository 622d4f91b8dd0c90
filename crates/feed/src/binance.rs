use async_trait::async_trait;
use futures::StreamExt;
use kizashi_core::common::{Interval, StreamKey};
use kizashi_core::config::FeedConfig;
use kizashi_core::market::entity::{Candle, Kline};
use kizashi_core::market::error::MarketError;
use kizashi_core::market::port::{FeedEvent, FeedStream, KlineUpdate, MarketDataProvider};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info};

// 单次 REST 请求允许的最大条数
const MAX_REST_LIMIT: usize = 1_500;
// 长连接事件缓冲
const FEED_BUFFER: usize = 256;

/// # Summary
/// Binance U 本位合约行情提供者实现。
///
/// # Invariants
/// - 历史数据走 REST `/fapi/v1/klines`，实时数据走 `{symbol}@kline_{interval}` 长连接。
/// - 不做任何重连，连接结束即流结束。
#[derive(Clone)]
pub struct BinanceProvider {
    // 内部使用的 HTTP 客户端
    client: Client,
    rest_base_url: String,
    ws_base_url: String,
}

impl BinanceProvider {
    /// # Summary
    /// 创建一个新的 BinanceProvider 实例。
    ///
    /// # Logic
    /// 1. 安装 rustls 的 ring 加密后端（已安装时忽略）。
    /// 2. 按配置设置请求超时并初始化 reqwest 客户端。
    ///
    /// # Arguments
    /// * `config`: 数据源端点配置。
    ///
    /// # Returns
    /// 客户端构建失败时返回 `MarketError::Network`。
    pub fn new(config: &FeedConfig) -> Result<Self, MarketError> {
        // 进程内只能安装一次，重复安装返回 Err
        rustls::crypto::ring::default_provider().install_default().ok();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MarketError::Network(e.to_string()))?;

        Ok(Self {
            client,
            rest_base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            ws_base_url: config.ws_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn stream_url(&self, key: &StreamKey) -> String {
        format!(
            "{}/ws/{}@kline_{}",
            self.ws_base_url,
            key.symbol.to_lowercase(),
            key.interval.as_str()
        )
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    /// # Summary
    /// 从 Binance 拉取历史 K 线。
    ///
    /// # Logic
    /// 1. `limit` 截断到接口上限 1500。
    /// 2. 给定 `end_before`（秒，不包含）时换算为 `endTime = end_before × 1000 − 1` 毫秒。
    /// 3. 非 2xx 返回 `Status`，解析失败返回 `Parse`。
    /// 4. 收盘时间已过的 K 线标记为 is_final。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    /// * `limit`: 数量上限。
    /// * `end_before`: 可选的不包含上界。
    ///
    /// # Returns
    /// 按时间升序的 K 线列表。
    async fn fetch_history(
        &self,
        key: &StreamKey,
        limit: usize,
        end_before: Option<i64>,
    ) -> Result<Vec<Kline>, MarketError> {
        let url = format!("{}/fapi/v1/klines", self.rest_base_url);
        let mut query = vec![
            ("symbol", key.symbol.clone()),
            ("interval", key.interval.as_str().to_string()),
            ("limit", limit.clamp(1, MAX_REST_LIMIT).to_string()),
        ];
        if let Some(end) = end_before {
            query.push(("endTime", end_time_ms(end).to_string()));
        }

        debug!(key = %key, limit, ?end_before, "Fetching klines");
        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::Status(resp.status().as_u16()));
        }

        let rows: Vec<Vec<Value>> = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut klines = parse_rest_rows(&rows, now_ms)?;
        if let Some(end) = end_before {
            klines.retain(|k| k.candle.time < end);
        }
        Ok(klines)
    }

    /// # Summary
    /// 打开 K 线长连接。
    ///
    /// # Logic
    /// 1. 建立 WebSocket 连接，失败直接返回 `Network`。
    /// 2. 启动后台任务读取消息：文本帧解析为 K 线或 `Malformed`，关闭帧转为 `Closed`，
    ///    传输错误转为 `Error` 后结束。
    /// 3. 消费方丢弃流时后台任务随即退出并释放连接。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    ///
    /// # Returns
    /// 事件流。
    async fn connect(&self, key: &StreamKey) -> Result<FeedStream, MarketError> {
        let url = self.stream_url(key);
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;
        info!(url = %url, "Kline stream opened");

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = ws.next() => message,
                };
                let event = match message {
                    None => break,
                    Some(Ok(Message::Text(text))) => parse_ws_message(text.as_str()),
                    Some(Ok(Message::Close(frame))) => FeedEvent::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame
                            .map(|f| f.reason.as_str().to_owned())
                            .unwrap_or_default(),
                    },
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => FeedEvent::Error(e.to_string()),
                };
                let terminal = matches!(event, FeedEvent::Closed { .. } | FeedEvent::Error(_));
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
            debug!(url = %url, "Kline stream task finished");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// # Summary
/// 解析 REST K 线数组。
///
/// # Logic
/// 每行格式为 `[openTime, open, high, low, close, volume, closeTime, ...]`，时间为毫秒，价格为字符串。
///
/// # Arguments
/// * `rows`: 原始 JSON 行。
/// * `now_ms`: 当前毫秒时间，用于判断是否已收盘。
///
/// # Returns
/// 任意一行格式不符时返回 `MarketError::Parse`。
fn parse_rest_rows(rows: &[Vec<Value>], now_ms: i64) -> Result<Vec<Kline>, MarketError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let bad = || MarketError::Parse(format!("malformed kline row {i}"));
            let open_ms = row.first().and_then(Value::as_i64).ok_or_else(bad)?;
            let close_ms = row.get(6).and_then(Value::as_i64).ok_or_else(bad)?;
            let field = |idx: usize| -> Result<f64, MarketError> {
                row.get(idx).and_then(value_f64).ok_or_else(bad)
            };
            Ok(Kline {
                candle: Candle {
                    time: open_ms.div_euclid(1_000),
                    open: field(1)?,
                    high: field(2)?,
                    low: field(3)?,
                    close: field(4)?,
                },
                volume: field(5)?,
                is_final: close_ms < now_ms,
            })
        })
        .collect()
}

/// 秒级的排他上界转为毫秒级的包含上界，越界时饱和
fn end_time_ms(end: i64) -> i64 {
    end.saturating_mul(1_000).saturating_sub(1)
}

/// 数值字段可能是字符串或数字
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

/// 长连接推送的 K 线消息
#[derive(Deserialize, Debug)]
struct WsEnvelope {
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Deserialize, Debug)]
struct WsKline {
    // 开盘时间（毫秒）
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    // 本根 K 线是否已收盘
    #[serde(rename = "x")]
    is_final: bool,
}

/// # Summary
/// 解析一条长连接文本消息。
///
/// # Returns
/// 成功返回 `FeedEvent::Kline`，任何解析失败返回携带原文的 `FeedEvent::Malformed`。
fn parse_ws_message(text: &str) -> FeedEvent {
    match decode_ws_kline(text) {
        Some(update) => FeedEvent::Kline(update),
        None => FeedEvent::Malformed(text.to_string()),
    }
}

fn decode_ws_kline(text: &str) -> Option<KlineUpdate> {
    let envelope: WsEnvelope = serde_json::from_str(text).ok()?;
    let k = envelope.kline;
    let interval: Interval = k.interval.parse().ok()?;
    Some(KlineUpdate {
        symbol: k.symbol,
        interval,
        kline: Kline {
            candle: Candle {
                time: k.open_time.div_euclid(1_000),
                open: k.open.parse().ok()?,
                high: k.high.parse().ok()?,
                low: k.low.parse().ok()?,
                close: k.close.parse().ok()?,
            },
            volume: k.volume.parse().ok()?,
            is_final: k.is_final,
        },
    })
}
