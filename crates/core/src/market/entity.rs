use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单根 K 线数据实体，记录特定时段内的价格波动。
///
/// # Invariants
/// - `time` 为 K 线开始时间的 Unix 秒，在一条序列内唯一且严格递增。
/// - `high` 必须大于或等于 `low`, `open`, `close`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    // K 线开始时间 (Unix 秒)
    pub time: i64,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价
    pub close: f64,
}

impl Candle {
    /// K 线开始时间的 UTC 表示，时间戳越界时返回 None。
    pub fn open_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }

    /// 实体上沿
    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    /// 实体下沿
    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// 阴线：开盘高于收盘
    pub fn is_bearish(&self) -> bool {
        self.open > self.close
    }

    /// 阳线：开盘低于收盘
    pub fn is_bullish(&self) -> bool {
        self.open < self.close
    }
}

/// # Summary
/// 数据源返回的单条 K 线记录（历史或实时推送），携带成交量与收盘标记。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    // K 线价格数据
    pub candle: Candle,
    // 成交量
    pub volume: f64,
    // 是否为最终数据 (即该周期已收盘)
    pub is_final: bool,
}

/// # Summary
/// 成交量柱方向，由收盘价相对上一根的涨跌推导，不单独存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeDirection {
    Up,
    Down,
}

/// # Summary
/// 成交量样本。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSample {
    // 对应 K 线的开始时间
    pub time: i64,
    // 成交量
    pub value: f64,
    // 涨跌方向
    pub direction: VolumeDirection,
}

/// # Summary
/// 由 K 线记录推导成交量序列。
///
/// # Logic
/// 1. 收盘价大于或等于上一根收盘价记为 Up，否则 Down。
/// 2. 第一根与自身比较，恒为 Up。
///
/// # Arguments
/// * `klines`: 按时间升序的 K 线记录。
///
/// # Returns
/// 与输入等长、时间对齐的成交量序列。
pub fn volume_samples(klines: &[Kline]) -> Vec<VolumeSample> {
    let mut prev_close = klines.first().map(|k| k.candle.close);
    klines
        .iter()
        .map(|k| {
            let direction = match prev_close {
                Some(prev) if k.candle.close < prev => VolumeDirection::Down,
                _ => VolumeDirection::Up,
            };
            prev_close = Some(k.candle.close);
            VolumeSample {
                time: k.candle.time,
                value: k.volume,
                direction,
            }
        })
        .collect()
}
