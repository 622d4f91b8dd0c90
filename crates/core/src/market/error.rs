use thiserror::Error;

/// # Summary
/// 市场数据域错误枚举，处理网络、状态码、解析及序列校验等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP / WebSocket 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 数据源返回非 2xx 状态码
    #[error("HTTP status {0}")]
    Status(u16),
    // 数据解析错误，如 JSON 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 数据源返回的序列不满足时间升序且唯一
    #[error("Invalid series: {0}")]
    InvalidSeries(String),
}
