use kizashi_core::analysis::entity::{FibonacciLevel, LevelKind, SrLevel};
use kizashi_core::common::count_f64;
use kizashi_core::market::entity::Candle;

const SR_WINDOW: usize = 200;
pub const SR_TOLERANCE: f64 = 0.005;
const SR_MIN_TOUCHES: usize = 3;
const SR_MAX_LEVELS: usize = 10;

const FIB_WINDOW: usize = 200;
pub const FIB_RATIOS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];

struct Cluster {
    price: f64,
    touches: usize,
}

/// # Summary
/// 聚类最近 200 根 K 线的高低点，得到支撑阻力位。
///
/// # Logic
/// 1. 按时间顺序依次收集每根 K 线的最高价与最低价。
/// 2. 每个价格归入第一个代表价与其相对偏差小于 `tolerance` 的簇，簇代表价按触及次数做加权平均；
///    找不到时新建一个簇。该贪心归并依赖输入顺序，结果按固定顺序可复现。
/// 3. 只保留触及次数不少于 3 的簇；代表价低于最新收盘价为支撑，否则为阻力。
/// 4. 强度 = min(触及次数 / 10, 1)，按强度降序（稳定排序）取前 10 个。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
/// * `tolerance`: 归并的相对容差。
///
/// # Returns
/// 支撑阻力位列表；序列为空时返回空列表。
pub fn support_resistance(candles: &[Candle], tolerance: f64) -> Vec<SrLevel> {
    let recent = &candles[candles.len().saturating_sub(SR_WINDOW)..];
    let Some(latest) = recent.last() else {
        return Vec::new();
    };

    let mut clusters: Vec<Cluster> = Vec::new();
    for price in recent.iter().flat_map(|c| [c.high, c.low]) {
        match clusters
            .iter_mut()
            .find(|cluster| (price - cluster.price).abs() / cluster.price < tolerance)
        {
            Some(cluster) => {
                let n = count_f64(cluster.touches);
                cluster.price = (cluster.price * n + price) / (n + 1.0);
                cluster.touches += 1;
            }
            None => clusters.push(Cluster { price, touches: 1 }),
        }
    }

    let mut levels: Vec<SrLevel> = clusters
        .into_iter()
        .filter(|c| c.touches >= SR_MIN_TOUCHES)
        .map(|c| SrLevel {
            price: c.price,
            strength: (count_f64(c.touches) / 10.0).min(1.0),
            touches: c.touches,
            kind: if c.price < latest.close {
                LevelKind::Support
            } else {
                LevelKind::Resistance
            },
        })
        .collect();
    levels.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    levels.truncate(SR_MAX_LEVELS);
    levels
}

/// # Summary
/// 最近 200 根 K 线的斐波那契回撤位。
///
/// # Logic
/// 1. 找出最高价与最低价（并列时取最早出现的一根）。
/// 2. 高点晚于低点视为上涨段（起点为低点），否则视为下跌段（起点为高点）。
/// 3. 各比例价位 = 起点 + (终点 − 起点) × 比例。
pub fn fibonacci_levels(candles: &[Candle]) -> Vec<FibonacciLevel> {
    let recent = &candles[candles.len().saturating_sub(FIB_WINDOW)..];
    let Some(first) = recent.first() else {
        return Vec::new();
    };

    let (mut high, mut low) = (first, first);
    for candle in &recent[1..] {
        if candle.high > high.high {
            high = candle;
        }
        if candle.low < low.low {
            low = candle;
        }
    }

    let (start, end) = if high.time > low.time {
        (low.low, high.high)
    } else {
        (high.high, low.low)
    };
    FIB_RATIOS
        .iter()
        .map(|&ratio| FibonacciLevel {
            ratio,
            price: start + (end - start) * ratio,
        })
        .collect()
}
