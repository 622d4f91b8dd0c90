use crate::common::StreamKey;
use crate::market::entity::{Candle, VolumeSample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// # Summary
/// 指标输出点。
///
/// # Invariants
/// - `time` 与其描述的 K 线开始时间一致；指标序列是 K 线序列的后缀对齐子序列。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub time: i64,
    pub value: f64,
}

/// # Summary
/// 一次快照上计算出的全部指标序列。
///
/// # Invariants
/// - 数据不足的指标为空序列，而不是补零。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma5: Vec<IndicatorPoint>,
    pub sma20: Vec<IndicatorPoint>,
    pub sma60: Vec<IndicatorPoint>,
    pub sma120: Vec<IndicatorPoint>,
    pub rsi: Vec<IndicatorPoint>,
    // 唐奇安通道上轨
    pub donchian_upper: Vec<IndicatorPoint>,
    // 唐奇安通道下轨
    pub donchian_lower: Vec<IndicatorPoint>,
    pub bollinger_upper: Vec<IndicatorPoint>,
    pub bollinger_middle: Vec<IndicatorPoint>,
    pub bollinger_lower: Vec<IndicatorPoint>,
}

/// 多空方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

/// # Summary
/// 吞没形态事件。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngulfingEvent {
    // 后一根（吞没）K 线在序列中的下标
    pub index: usize,
    pub direction: Direction,
    // 吞没 K 线
    pub candle: Candle,
}

/// 摆动点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// # Summary
/// 摆动点（局部极值）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub time: i64,
    // 摆动高点取 high，摆动低点取 low
    pub price: f64,
    pub kind: SwingKind,
}

/// 支撑/阻力类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

/// # Summary
/// 支撑阻力位。
///
/// # Invariants
/// - `strength` 位于 [0, 1]，等于 min(touches / 10, 1)。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SrLevel {
    pub price: f64,
    pub strength: f64,
    pub touches: usize,
    pub kind: LevelKind,
}

/// 图表形态类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    DoubleTop,
    DoubleBottom,
}

/// # Summary
/// 图表形态匹配结果。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub start_index: usize,
    pub end_index: usize,
    // 颈线价格
    pub neckline: Option<f64>,
    // 等幅测算目标价
    pub target: Option<f64>,
}

/// 背离所基于的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceSource {
    Rsi,
    Volume,
}

impl std::fmt::Display for DivergenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceSource::Rsi => write!(f, "RSI"),
            DivergenceSource::Volume => write!(f, "Volume"),
        }
    }
}

/// 背离强度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceStrength {
    Regular,
    Hidden,
}

/// # Summary
/// 价格与指标之间的背离。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub direction: Direction,
    pub source: DivergenceSource,
    // 前一个分形在序列中的下标
    pub start_index: usize,
    // 当前分形在序列中的下标
    pub end_index: usize,
    pub strength: DivergenceStrength,
}

/// 市场结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStructure {
    Uptrend,
    Downtrend,
    Ranging,
}

/// # Summary
/// 结构与形态分析汇总。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub divergences: Vec<Divergence>,
    pub swing_points: Vec<SwingPoint>,
    pub support_resistance: Vec<SrLevel>,
    pub patterns: Vec<PatternMatch>,
    pub market_structure: MarketStructure,
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self {
            divergences: Vec::new(),
            swing_points: Vec::new(),
            support_resistance: Vec::new(),
            patterns: Vec::new(),
            market_structure: MarketStructure::Ranging,
        }
    }
}

/// 交易信号方向，`None` 表示当前没有合格的入场形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Bullish,
    Bearish,
    None,
}

/// # Summary
/// 可执行的入场信号。
///
/// # Invariants
/// - 方向为 `None` 时所有价格为 0 且 `trigger_time` 为 None。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub direction: SignalDirection,
    pub entry: f64,
    pub stop_loss: f64,
    // 1R / 2R / 3R 止盈位
    pub take_profits: [f64; 3],
    // 触发信号的 K 线时间
    pub trigger_time: Option<i64>,
}

impl TradingSignal {
    /// 空信号
    pub fn none() -> Self {
        Self {
            direction: SignalDirection::None,
            entry: 0.0,
            stop_loss: 0.0,
            take_profits: [0.0; 3],
            trigger_time: None,
        }
    }
}

/// # Summary
/// 综合评分结果，包含多空得分、理由与入场信号。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub signal: TradingSignal,
    pub bullish_score: u32,
    pub bearish_score: u32,
    pub bullish_reasons: Vec<String>,
    pub bearish_reasons: Vec<String>,
}

/// 斐波那契回撤位
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub ratio: f64,
    pub price: f64,
}

/// # Summary
/// 每次序列变更后发布给订阅方的完整分析结果。
///
/// # Invariants
/// - 由同一份不可变快照一次性计算得出，不持有任何跨次计算的状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub key: StreamKey,
    // 计算所基于的 K 线快照
    pub candles: Arc<[Candle]>,
    pub volumes: Vec<VolumeSample>,
    pub indicators: IndicatorSet,
    pub engulfing: Vec<EngulfingEvent>,
    pub analysis: AnalysisSnapshot,
    pub fibonacci: Vec<FibonacciLevel>,
    pub report: SignalReport,
}
