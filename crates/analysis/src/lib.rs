pub mod divergence;
pub mod engulfing;
pub mod indicator;
pub mod levels;
pub mod signal;
pub mod structure;

use kizashi_core::analysis::entity::{AnalysisReport, AnalysisSnapshot, DivergenceSource};
use kizashi_core::common::StreamKey;
use kizashi_core::market::entity::{Candle, Kline, volume_samples};
use std::sync::Arc;
use tracing::debug;

/// # Summary
/// 在一份序列快照上从头计算完整的分析结果。
///
/// # Logic
/// 1. 计算全部指标与成交量方向。
/// 2. 依次检测吞没、RSI 背离、成交量背离、摆动点、双顶、双底、支撑阻力与市场结构。
/// 3. 计算斐波那契回撤位并打分。
///
/// # Arguments
/// * `key`: 序列所属的 (交易对, 周期)。
/// * `klines`: 按时间升序的 K 线快照。
///
/// # Returns
/// 不依赖任何历史计算状态的 `AnalysisReport`。
pub fn analyze(key: StreamKey, klines: &[Kline]) -> AnalysisReport {
    let candles: Arc<[Candle]> = klines.iter().map(|k| k.candle).collect();
    let volumes = volume_samples(klines);
    let indicators = indicator::compute_indicators(&candles);
    let engulfing = engulfing::detect_engulfing(&candles);

    let rsi_values: Vec<f64> = indicators.rsi.iter().map(|p| p.value).collect();
    let volume_values: Vec<f64> = volumes.iter().map(|v| v.value).collect();
    let mut divergences =
        divergence::detect_divergences(&candles, &rsi_values, DivergenceSource::Rsi);
    divergences.extend(divergence::detect_divergences(
        &candles,
        &volume_values,
        DivergenceSource::Volume,
    ));

    let swing_points = structure::detect_swing_points(&candles, structure::SWING_LOOKBACK);
    let mut patterns = structure::detect_double_tops(&candles, &swing_points);
    patterns.extend(structure::detect_double_bottoms(&candles, &swing_points));
    let analysis = AnalysisSnapshot {
        divergences,
        support_resistance: levels::support_resistance(&candles, levels::SR_TOLERANCE),
        patterns,
        market_structure: structure::market_structure(&swing_points),
        swing_points,
    };

    let report = signal::score(&candles, &indicators, &engulfing, &analysis);
    debug!(
        key = %key,
        candles = candles.len(),
        bullish = report.bullish_score,
        bearish = report.bearish_score,
        signal = ?report.signal.direction,
        "analysis recomputed"
    );

    AnalysisReport {
        fibonacci: levels::fibonacci_levels(&candles),
        key,
        candles,
        volumes,
        indicators,
        engulfing,
        analysis,
        report,
    }
}
