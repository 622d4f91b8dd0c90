use kizashi_core::analysis::entity::{IndicatorPoint, IndicatorSet};
use kizashi_core::common::count_f64;
use kizashi_core::market::entity::Candle;

pub const RSI_PERIOD: usize = 14;
pub const SMA5_PERIOD: usize = 5;
pub const SMA20_PERIOD: usize = 20;
pub const SMA60_PERIOD: usize = 60;
pub const SMA120_PERIOD: usize = 120;
pub const DONCHIAN_PERIOD: usize = 20;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;

/// # Summary
/// 收盘价简单移动平均。
///
/// # Logic
/// 1. 以 `period` 为窗口滑动，首个输出对齐下标 `period - 1` 的 K 线。
/// 2. 输出长度为 `len - period + 1`；数据不足或 `period == 0` 时返回空序列。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `period`: 窗口长度。
///
/// # Returns
/// 后缀对齐的指标序列。
pub fn sma(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }
    let divisor = count_f64(period);
    candles
        .windows(period)
        .map(|window| {
            let sum: f64 = window.iter().map(|c| c.close).sum();
            IndicatorPoint {
                time: window[period - 1].time,
                value: sum / divisor,
            }
        })
        .collect()
}

/// # Summary
/// Wilder 平滑的相对强弱指标。
///
/// # Logic
/// 1. 由相邻收盘价计算逐步涨幅与跌幅。
/// 2. 取前 `period` 个涨跌幅的算术平均作为种子。
/// 3. 自下标 `period + 1` 的 K 线起，按 `avg = (avg × (period − 1) + new) / period` 平滑并输出。
/// 4. `avg_loss == 0` 时 RSI 记为 100。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `period`: 平滑周期。
///
/// # Returns
/// 长度为 `len - period - 1` 的指标序列，数据不足时为空。
pub fn rsi(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || candles.len() < period + 2 {
        return Vec::new();
    }
    let changes: Vec<(f64, f64)> = candles
        .windows(2)
        .map(|pair| {
            let change = pair[1].close - pair[0].close;
            (change.max(0.0), (-change).max(0.0))
        })
        .collect();

    let p = count_f64(period);
    let mut avg_gain = changes[..period].iter().map(|(g, _)| g).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|(_, l)| l).sum::<f64>() / p;

    // changes[i] 描述的是 candles[i + 1]
    changes[period..]
        .iter()
        .zip(&candles[period + 1..])
        .map(|((gain, loss), candle)| {
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
            let value = if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
            };
            IndicatorPoint {
                time: candle.time,
                value,
            }
        })
        .collect()
}

/// # Summary
/// 唐奇安通道：滚动窗口内最高价与最低价。
///
/// # Returns
/// (上轨, 下轨)，均对齐窗口最后一根 K 线；数据不足时均为空。
pub fn donchian(candles: &[Candle], period: usize) -> (Vec<IndicatorPoint>, Vec<IndicatorPoint>) {
    if period == 0 || candles.len() < period {
        return (Vec::new(), Vec::new());
    }
    candles
        .windows(period)
        .map(|window| {
            let time = window[period - 1].time;
            let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            (
                IndicatorPoint { time, value: high },
                IndicatorPoint { time, value: low },
            )
        })
        .unzip()
}

/// 布林带三条轨道
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<IndicatorPoint>,
    pub middle: Vec<IndicatorPoint>,
    pub lower: Vec<IndicatorPoint>,
}

/// # Summary
/// 布林带。
///
/// # Logic
/// 1. 中轨为收盘价 SMA(period)。
/// 2. 同一窗口内计算总体标准差（除以 `period`）。
/// 3. 上下轨为中轨 ± k·σ。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `period`: 窗口长度。
/// * `k`: 标准差倍数。
///
/// # Returns
/// 三条对齐的轨道；数据不足时全部为空。
pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> BollingerBands {
    let mut bands = BollingerBands::default();
    if period == 0 || candles.len() < period {
        return bands;
    }
    let n = count_f64(period);
    for window in candles.windows(period) {
        let time = window[period - 1].time;
        let mean = window.iter().map(|c| c.close).sum::<f64>() / n;
        let variance = window.iter().map(|c| (c.close - mean).powi(2)).sum::<f64>() / n;
        let sigma = variance.sqrt();
        bands.middle.push(IndicatorPoint { time, value: mean });
        bands.upper.push(IndicatorPoint {
            time,
            value: mean + k * sigma,
        });
        bands.lower.push(IndicatorPoint {
            time,
            value: mean - k * sigma,
        });
    }
    bands
}

/// # Summary
/// 计算发布所需的全部指标。
pub fn compute_indicators(candles: &[Candle]) -> IndicatorSet {
    let (donchian_upper, donchian_lower) = donchian(candles, DONCHIAN_PERIOD);
    let bands = bollinger(candles, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
    IndicatorSet {
        sma5: sma(candles, SMA5_PERIOD),
        sma20: sma(candles, SMA20_PERIOD),
        sma60: sma(candles, SMA60_PERIOD),
        sma120: sma(candles, SMA120_PERIOD),
        rsi: rsi(candles, RSI_PERIOD),
        donchian_upper,
        donchian_lower,
        bollinger_upper: bands.upper,
        bollinger_middle: bands.middle,
        bollinger_lower: bands.lower,
    }
}
