use kizashi_core::analysis::entity::{
    MarketStructure, PatternKind, PatternMatch, SwingKind, SwingPoint,
};
use kizashi_core::market::entity::Candle;

pub const SWING_LOOKBACK: usize = 5;
// 两个摆动点视为"同一高度"的相对容差
const DOUBLE_PATTERN_TOLERANCE: f64 = 0.02;
// 判定市场结构时使用的最近摆动点数量
const STRUCTURE_WINDOW: usize = 6;

/// # Summary
/// 检测摆动高点与摆动低点。
///
/// # Logic
/// 1. 下标 i 的最高价严格高于前后各 `lookback` 根的最高价时为摆动高点。
/// 2. 最低价严格低于前后各 `lookback` 根的最低价时为摆动低点。
/// 3. 相等的极值不计入；同一根同时满足时先输出高点再输出低点。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `lookback`: 两侧比较的 K 线数量。
///
/// # Returns
/// 按下标升序的摆动点。
pub fn detect_swing_points(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    let mut points = Vec::new();
    if candles.len() <= 2 * lookback {
        return points;
    }
    for i in lookback..candles.len() - lookback {
        let current = &candles[i];
        let neighbours = || (1..=lookback).flat_map(move |j| [&candles[i - j], &candles[i + j]]);

        if neighbours().all(|c| current.high > c.high) {
            points.push(SwingPoint {
                index: i,
                time: current.time,
                price: current.high,
                kind: SwingKind::High,
            });
        }
        if neighbours().all(|c| current.low < c.low) {
            points.push(SwingPoint {
                index: i,
                time: current.time,
                price: current.low,
                kind: SwingKind::Low,
            });
        }
    }
    points
}

/// # Summary
/// 检测双顶形态。
///
/// # Logic
/// 1. 依次取相邻的两个摆动高点，价差相对前一个高点小于 2% 时视为双顶。
/// 2. 两点之间（含两端）K 线的最低价为颈线。
/// 3. 目标价 = 颈线 − (第一个高点 − 颈线)。
/// 4. 每一对满足条件的相邻高点都输出，不做去重。
pub fn detect_double_tops(candles: &[Candle], swings: &[SwingPoint]) -> Vec<PatternMatch> {
    detect_double(candles, swings, SwingKind::High)
}

/// # Summary
/// 检测双底形态，与双顶镜像：颈线取区间最高价，目标价 = 颈线 + (颈线 − 第一个低点)。
pub fn detect_double_bottoms(candles: &[Candle], swings: &[SwingPoint]) -> Vec<PatternMatch> {
    detect_double(candles, swings, SwingKind::Low)
}

fn detect_double(candles: &[Candle], swings: &[SwingPoint], kind: SwingKind) -> Vec<PatternMatch> {
    let same_kind: Vec<&SwingPoint> = swings.iter().filter(|p| p.kind == kind).collect();
    same_kind
        .windows(2)
        .filter_map(|pair| {
            let (first, second) = (pair[0], pair[1]);
            let diff = (first.price - second.price).abs() / first.price;
            if diff.is_nan() || diff >= DOUBLE_PATTERN_TOLERANCE {
                return None;
            }
            let between = candles.get(first.index..=second.index)?;
            let (pattern, neckline) = match kind {
                SwingKind::High => (
                    PatternKind::DoubleTop,
                    between.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
                ),
                SwingKind::Low => (
                    PatternKind::DoubleBottom,
                    between.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
                ),
            };
            Some(PatternMatch {
                kind: pattern,
                start_index: first.index,
                end_index: second.index,
                neckline: Some(neckline),
                // 等幅测算：neckline ± |first − neckline|
                target: Some(neckline - (first.price - neckline)),
            })
        })
        .collect()
}

/// # Summary
/// 根据最近的摆动点判定市场结构。
///
/// # Logic
/// 1. 取最近 6 个摆动点，高点与低点都至少 2 个，否则为震荡。
/// 2. 最新高点与最新低点都高于各自前一个时为上升趋势。
/// 3. 都低于各自前一个时为下降趋势，其余为震荡。
pub fn market_structure(swings: &[SwingPoint]) -> MarketStructure {
    let recent = &swings[swings.len().saturating_sub(STRUCTURE_WINDOW)..];
    let highs: Vec<f64> = recent
        .iter()
        .filter(|p| p.kind == SwingKind::High)
        .map(|p| p.price)
        .collect();
    let lows: Vec<f64> = recent
        .iter()
        .filter(|p| p.kind == SwingKind::Low)
        .map(|p| p.price)
        .collect();

    let last_two = |prices: &[f64]| match prices {
        [.., prev, last] => Some((*prev, *last)),
        _ => None,
    };
    let (Some((prev_high, last_high)), Some((prev_low, last_low))) =
        (last_two(&highs), last_two(&lows))
    else {
        return MarketStructure::Ranging;
    };

    if last_high > prev_high && last_low > prev_low {
        MarketStructure::Uptrend
    } else if last_high < prev_high && last_low < prev_low {
        MarketStructure::Downtrend
    } else {
        MarketStructure::Ranging
    }
}
