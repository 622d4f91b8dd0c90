use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub stream: StreamConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

/// 行情数据源端点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub request_timeout_secs: u64,
}

/// # Summary
/// 单个订阅的数据流与序列参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    // 初始历史加载条数
    pub history_limit: usize,
    // 每次向前补数的条数
    pub backfill_limit: usize,
    // 实时追加时序列保留的最大长度
    pub series_capacity: usize,
    // 订阅事件广播缓冲
    pub event_buffer: usize,
    pub reconnect: ReconnectConfig,
}

/// # Summary
/// 指数退避重连参数。
///
/// # Invariants
/// - 第 n 次重连延迟为 min(base_delay_ms × 2^n, max_delay_ms)。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

/// 启动时默认关注的交易对
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub symbol: String,
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    // 设置后额外按日滚动写入该目录
    pub directory: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://fapi.binance.com".to_string(),
            ws_base_url: "wss://fstream.binance.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            history_limit: 500,
            backfill_limit: 500,
            series_capacity: 5_000,
            event_buffer: 128,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "15m".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
