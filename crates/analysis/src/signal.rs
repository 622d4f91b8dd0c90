use kizashi_core::analysis::entity::{
    AnalysisSnapshot, Direction, EngulfingEvent, IndicatorPoint, IndicatorSet, LevelKind,
    MarketStructure, PatternKind, SignalDirection, SignalReport, SrLevel, TradingSignal,
};
use kizashi_core::market::entity::Candle;

// 背离结束点需落在最近 N 根之内
pub const DIVERGENCE_RECENCY: usize = 20;
// 形态结束点需落在最近 N 根之内
pub const PATTERN_RECENCY: usize = 50;
// 吞没事件需落在最近 N 根之内才产生入场信号
pub const ENGULFING_RECENCY: usize = 52;
// 收盘价与支撑阻力位的相对距离阈值
pub const LEVEL_PROXIMITY: f64 = 0.01;
pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;

#[derive(Default)]
struct Tally {
    score: u32,
    reasons: Vec<String>,
}

impl Tally {
    fn add(&mut self, weight: u32, reason: impl Into<String>) {
        self.score += weight;
        self.reasons.push(reason.into());
    }
}

fn last_value(points: &[IndicatorPoint]) -> Option<f64> {
    points.last().map(|p| p.value)
}

fn near_level(levels: &[SrLevel], kind: LevelKind, close: f64) -> Option<&SrLevel> {
    levels
        .iter()
        .find(|l| l.kind == kind && ((close - l.price).abs() / l.price) < LEVEL_PROXIMITY)
}

/// # Summary
/// 对最新状态进行多空打分，并从最近的吞没事件推导入场信号。
///
/// # Logic
/// 1. 各规则独立计分，规则顺序只影响理由列表的顺序：
///    市场结构 ±2，近 20 根内的背离每个 ±2，贴近支撑/阻力 ±1，近 50 根内的双底/双顶每个 ±2，
///    均线多头/空头排列 ±1，收盘价相对 SMA5 ±1，RSI 超卖/超买 ±1，触及布林下轨/上轨 ±1。
/// 2. 入场信号只看最后一个吞没事件，且其下标需位于最近 52 根之内；
///    入场价为该 K 线收盘价，止损为其最低价（看涨）或最高价（看跌），止盈为 1R/2R/3R。
///
/// # Arguments
/// * `candles`: 当前序列快照。
/// * `indicators`: 同一快照上的指标。
/// * `engulfing`: 全部吞没事件，按下标升序。
/// * `analysis`: 结构与形态分析结果。
///
/// # Returns
/// 序列为空时返回零分与空信号。
pub fn score(
    candles: &[Candle],
    indicators: &IndicatorSet,
    engulfing: &[EngulfingEvent],
    analysis: &AnalysisSnapshot,
) -> SignalReport {
    let mut bull = Tally::default();
    let mut bear = Tally::default();

    let Some(last) = candles.last() else {
        return SignalReport {
            signal: TradingSignal::none(),
            bullish_score: 0,
            bearish_score: 0,
            bullish_reasons: Vec::new(),
            bearish_reasons: Vec::new(),
        };
    };
    let len = candles.len();
    let close = last.close;

    match analysis.market_structure {
        MarketStructure::Uptrend => bull.add(2, "Market structure: uptrend (HH, HL)"),
        MarketStructure::Downtrend => bear.add(2, "Market structure: downtrend (LH, LL)"),
        MarketStructure::Ranging => {}
    }

    for div in analysis
        .divergences
        .iter()
        .filter(|d| d.end_index + DIVERGENCE_RECENCY > len)
    {
        match div.direction {
            Direction::Bullish => bull.add(2, format!("{} bullish divergence", div.source)),
            Direction::Bearish => bear.add(2, format!("{} bearish divergence", div.source)),
        }
    }

    if let Some(level) = near_level(&analysis.support_resistance, LevelKind::Support, close) {
        bull.add(1, format!("Near strong support ({:.2})", level.price));
    }
    if let Some(level) = near_level(&analysis.support_resistance, LevelKind::Resistance, close) {
        bear.add(1, format!("Near strong resistance ({:.2})", level.price));
    }

    for pattern in analysis
        .patterns
        .iter()
        .filter(|p| p.end_index + PATTERN_RECENCY > len)
    {
        match pattern.kind {
            PatternKind::DoubleBottom => bull.add(2, "Double bottom pattern"),
            PatternKind::DoubleTop => bear.add(2, "Double top pattern"),
        }
    }

    let sma5 = last_value(&indicators.sma5);
    if let (Some(s5), Some(s20), Some(s60), Some(s120)) = (
        sma5,
        last_value(&indicators.sma20),
        last_value(&indicators.sma60),
        last_value(&indicators.sma120),
    ) {
        if s5 > s20 && s20 > s60 && s60 > s120 {
            bull.add(1, "SMA bullish alignment (5>20>60>120)");
        } else if s5 < s20 && s20 < s60 && s60 < s120 {
            bear.add(1, "SMA bearish alignment (5<20<60<120)");
        }
    }

    if let Some(s5) = sma5 {
        if close > s5 {
            bull.add(1, "Price above SMA5");
        } else if close < s5 {
            bear.add(1, "Price below SMA5");
        }
    }

    if let Some(rsi) = last_value(&indicators.rsi) {
        if rsi < RSI_OVERSOLD {
            bull.add(1, "RSI oversold (<30)");
        } else if rsi > RSI_OVERBOUGHT {
            bear.add(1, "RSI overbought (>70)");
        }
    }

    if let (Some(upper), Some(lower)) = (
        last_value(&indicators.bollinger_upper),
        last_value(&indicators.bollinger_lower),
    ) {
        if close <= lower {
            bull.add(1, "Close at lower Bollinger band (oversold)");
        }
        if close >= upper {
            bear.add(1, "Close at upper Bollinger band (overbought)");
        }
    }

    SignalReport {
        signal: entry_signal(len, engulfing),
        bullish_score: bull.score,
        bearish_score: bear.score,
        bullish_reasons: bull.reasons,
        bearish_reasons: bear.reasons,
    }
}

/// 由最近的吞没事件推导入场、止损与三档止盈
fn entry_signal(len: usize, engulfing: &[EngulfingEvent]) -> TradingSignal {
    let Some(event) = engulfing
        .last()
        .filter(|e| e.index + ENGULFING_RECENCY > len)
    else {
        return TradingSignal::none();
    };
    let entry = event.candle.close;
    let (direction, stop_loss) = match event.direction {
        Direction::Bullish => (SignalDirection::Bullish, event.candle.low),
        Direction::Bearish => (SignalDirection::Bearish, event.candle.high),
    };
    // 止损在入场价另一侧，step 带方向
    let step = entry - stop_loss;
    TradingSignal {
        direction,
        entry,
        stop_loss,
        take_profits: [entry + step, entry + 2.0 * step, entry + 3.0 * step],
        trigger_time: Some(event.candle.time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kizashi_core::analysis::entity::{Divergence, DivergenceSource, DivergenceStrength, PatternMatch};

    fn candle(time: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle { time, open, high, low, close }
    }

    fn series(len: usize, close: f64) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let t = i64::try_from(i).unwrap_or_default() * 60;
                candle(t, close, close + 1.0, close - 1.0, close)
            })
            .collect()
    }

    fn point(value: f64) -> Vec<IndicatorPoint> {
        vec![IndicatorPoint { time: 0, value }]
    }

    #[test]
    fn test_empty_series_scores_nothing() {
        let report = score(&[], &IndicatorSet::default(), &[], &AnalysisSnapshot::default());
        assert_eq!(report.bullish_score, 0);
        assert_eq!(report.bearish_score, 0);
        assert_eq!(report.signal, TradingSignal::none());
    }

    #[test]
    fn test_bearish_rules_accumulate() {
        let candles = series(100, 100.0);
        let indicators = IndicatorSet {
            sma5: point(100.5),
            sma20: point(101.0),
            sma60: point(102.0),
            sma120: point(103.0),
            rsi: point(75.0),
            bollinger_upper: point(100.0),
            bollinger_lower: point(90.0),
            ..IndicatorSet::default()
        };
        let analysis = AnalysisSnapshot {
            market_structure: MarketStructure::Downtrend,
            divergences: vec![
                Divergence {
                    direction: Direction::Bearish,
                    source: DivergenceSource::Rsi,
                    start_index: 85,
                    end_index: 95,
                    strength: DivergenceStrength::Regular,
                },
                // 太早，不计分
                Divergence {
                    direction: Direction::Bearish,
                    source: DivergenceSource::Volume,
                    start_index: 60,
                    end_index: 80,
                    strength: DivergenceStrength::Regular,
                },
            ],
            support_resistance: vec![SrLevel {
                price: 100.5,
                strength: 0.5,
                touches: 5,
                kind: LevelKind::Resistance,
            }],
            patterns: vec![PatternMatch {
                kind: PatternKind::DoubleTop,
                start_index: 60,
                end_index: 70,
                neckline: Some(95.0),
                target: Some(90.0),
            }],
            ..AnalysisSnapshot::default()
        };

        let report = score(&candles, &indicators, &[], &analysis);
        // 结构 2 + 背离 2 + 阻力 1 + 双顶 2 + 排列 1 + SMA5 1 + RSI 1 + 布林 1
        assert_eq!(report.bearish_score, 11);
        assert_eq!(report.bullish_score, 0);
        assert!(report.bearish_reasons.contains(&"RSI bearish divergence".to_string()));
        assert!(report.bearish_reasons.contains(&"Near strong resistance (100.50)".to_string()));
        assert_eq!(report.signal.direction, SignalDirection::None);
    }

    #[test]
    fn test_partial_sma_set_skips_alignment() {
        let candles = series(30, 100.0);
        let indicators = IndicatorSet {
            sma5: point(90.0),
            sma20: point(80.0),
            ..IndicatorSet::default()
        };
        let report = score(&candles, &indicators, &[], &AnalysisSnapshot::default());
        assert_eq!(report.bullish_score, 1);
        assert_eq!(report.bullish_reasons, vec!["Price above SMA5".to_string()]);
    }

    #[test]
    fn test_bearish_engulfing_signal_levels() {
        let candles = series(60, 100.0);
        let event = EngulfingEvent {
            index: 58,
            direction: Direction::Bearish,
            candle: candle(3_480, 101.0, 104.0, 95.0, 98.0),
        };
        let report = score(&candles, &IndicatorSet::default(), &[event], &AnalysisSnapshot::default());
        let signal = report.signal;
        assert_eq!(signal.direction, SignalDirection::Bearish);
        assert_eq!(signal.entry, 98.0);
        assert_eq!(signal.stop_loss, 104.0);
        assert_eq!(signal.take_profits, [92.0, 86.0, 80.0]);
        assert_eq!(signal.trigger_time, Some(3_480));
    }

    #[test]
    fn test_stale_engulfing_is_ignored() {
        let candles = series(100, 100.0);
        let event = EngulfingEvent {
            index: 48,
            direction: Direction::Bullish,
            candle: candle(2_880, 99.0, 103.0, 97.0, 102.0),
        };
        let report = score(&candles, &IndicatorSet::default(), &[event], &AnalysisSnapshot::default());
        assert_eq!(report.signal.direction, SignalDirection::None);

        let event = EngulfingEvent { index: 49, ..event };
        let report = score(&candles, &IndicatorSet::default(), &[event], &AnalysisSnapshot::default());
        assert_eq!(report.signal.direction, SignalDirection::Bullish);
        assert_eq!(report.signal.take_profits, [107.0, 112.0, 117.0]);
    }
}
