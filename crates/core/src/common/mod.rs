use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// K 线时间周期枚举，覆盖交易所支持的全部周期。
///
/// # Invariants
/// - `Display` 输出与交易所接口使用的字符串完全一致（注意 `1M` 代表月线，`1m` 代表分钟线）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    // 1分钟
    Minute1,
    // 3分钟
    Minute3,
    // 5分钟
    Minute5,
    // 15分钟
    Minute15,
    // 30分钟
    Minute30,
    // 1小时
    Hour1,
    // 2小时
    Hour2,
    // 4小时
    Hour4,
    // 6小时
    Hour6,
    // 8小时
    Hour8,
    // 12小时
    Hour12,
    // 1日
    Day1,
    // 3日
    Day3,
    // 1周
    Week1,
    // 1月
    Month1,
}

impl Interval {
    /// 交易所使用的周期字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `1M` 与 `1m` 仅大小写不同，必须先于小写归一化处理
        if s == "1M" {
            return Ok(Interval::Month1);
        }
        match s.to_lowercase().as_str() {
            "1m" | "minute1" => Ok(Interval::Minute1),
            "3m" | "minute3" => Ok(Interval::Minute3),
            "5m" | "minute5" => Ok(Interval::Minute5),
            "15m" | "minute15" => Ok(Interval::Minute15),
            "30m" | "minute30" => Ok(Interval::Minute30),
            "1h" | "hour1" => Ok(Interval::Hour1),
            "2h" | "hour2" => Ok(Interval::Hour2),
            "4h" | "hour4" => Ok(Interval::Hour4),
            "6h" | "hour6" => Ok(Interval::Hour6),
            "8h" | "hour8" => Ok(Interval::Hour8),
            "12h" | "hour12" => Ok(Interval::Hour12),
            "1d" | "day1" => Ok(Interval::Day1),
            "3d" | "day3" => Ok(Interval::Day3),
            "1w" | "week1" => Ok(Interval::Week1),
            "month1" => Ok(Interval::Month1),
            _ => Err(format!("Unknown Interval: {}", s)),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 订阅键：交易对与周期的组合，唯一确定一条行情序列。
///
/// # Invariants
/// - `symbol` 统一保存为大写形式。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamKey {
    // 交易对代码 (例如: BTCUSDT)
    pub symbol: String,
    // K 线周期
    pub interval: Interval,
}

impl StreamKey {
    /// 构造订阅键，交易对代码统一转为大写。
    pub fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            interval,
        }
    }

    /// # Summary
    /// 判断一条推送消息是否属于当前订阅。
    ///
    /// # Logic
    /// 1. 交易对代码忽略大小写比较。
    /// 2. 周期必须完全一致。
    ///
    /// # Arguments
    /// * `symbol`: 消息携带的交易对。
    /// * `interval`: 消息携带的周期。
    ///
    /// # Returns
    /// 匹配返回 true。
    pub fn matches(&self, symbol: &str, interval: Interval) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol) && self.interval == interval
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// # Summary
/// 将计数转换为浮点数，用于均值等统计计算。
///
/// # Logic
/// 1. 计数可无损放入 u32 时走 `f64::from`。
/// 2. 超出范围时按 u32 上限处理（行情窗口远小于该值）。
pub fn count_f64(n: usize) -> f64 {
    u32::try_from(n).map(f64::from).unwrap_or(f64::from(u32::MAX))
}
