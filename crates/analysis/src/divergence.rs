use kizashi_core::analysis::entity::{Direction, Divergence, DivergenceSource, DivergenceStrength};
use kizashi_core::market::entity::Candle;

pub const DIVERGENCE_WINDOW: usize = 50;
// 分形两侧各需比较的 K 线数量
const FRACTAL_SPAN: usize = 2;
// 向前寻找上一个分形时，与当前分形的最小间隔
const MIN_PAIR_GAP: usize = 5;

/// # Summary
/// 检测价格与指标之间的常规背离。
///
/// # Logic
/// 1. 只看最近 50 根 K 线；K 线或指标不足 50 个时返回空列表。
/// 2. 对窗口内每个分形高点（最高价严格高于两侧各 2 根），从其前方第 5 根开始向前寻找最近的分形高点，
///    找到第一个即停止：若价格创更高高点而指标给出更低高点，记录一次看跌背离。
/// 3. 分形低点镜像处理：价格更低低点而指标更高低点为看涨背离。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `values`: 与 K 线后缀对齐的指标值（RSI 或成交量）。
/// * `source`: 指标来源，写入结果。
///
/// # Returns
/// 下标为整条序列坐标的背离列表。
pub fn detect_divergences(
    candles: &[Candle],
    values: &[f64],
    source: DivergenceSource,
) -> Vec<Divergence> {
    let mut found = Vec::new();
    if candles.len() < DIVERGENCE_WINDOW || values.len() < DIVERGENCE_WINDOW {
        return found;
    }
    let base = candles.len() - DIVERGENCE_WINDOW;
    let bars = &candles[base..];
    let vals = &values[values.len() - DIVERGENCE_WINDOW..];

    for i in FRACTAL_SPAN..DIVERGENCE_WINDOW - FRACTAL_SPAN {
        if is_fractal(bars, i, |c| c.high, |a, b| a > b)
            && let Some(j) = prior_fractal(bars, i, |c| c.high, |a, b| a > b)
            && bars[i].high > bars[j].high
            && vals[i] < vals[j]
        {
            found.push(regular(Direction::Bearish, source, base + j, base + i));
        }
        if is_fractal(bars, i, |c| c.low, |a, b| a < b)
            && let Some(j) = prior_fractal(bars, i, |c| c.low, |a, b| a < b)
            && bars[i].low < bars[j].low
            && vals[i] > vals[j]
        {
            found.push(regular(Direction::Bullish, source, base + j, base + i));
        }
    }
    found
}

fn regular(direction: Direction, source: DivergenceSource, start: usize, end: usize) -> Divergence {
    Divergence {
        direction,
        source,
        start_index: start,
        end_index: end,
        strength: DivergenceStrength::Regular,
    }
}

/// 下标 i 的价格在两侧各 2 根内严格占优
fn is_fractal(
    bars: &[Candle],
    i: usize,
    price: impl Fn(&Candle) -> f64,
    beats: impl Fn(f64, f64) -> bool,
) -> bool {
    if i < FRACTAL_SPAN || i + FRACTAL_SPAN >= bars.len() {
        return false;
    }
    let p = price(&bars[i]);
    (1..=FRACTAL_SPAN).all(|k| beats(p, price(&bars[i - k])) && beats(p, price(&bars[i + k])))
}

/// 从 i - 5 向前寻找第一个同类分形
fn prior_fractal(
    bars: &[Candle],
    i: usize,
    price: impl Fn(&Candle) -> f64 + Copy,
    beats: impl Fn(f64, f64) -> bool + Copy,
) -> Option<usize> {
    let start = i.checked_sub(MIN_PAIR_GAP)?;
    (FRACTAL_SPAN..=start)
        .rev()
        .find(|&j| is_fractal(bars, j, price, beats))
}
