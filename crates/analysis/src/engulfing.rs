use kizashi_core::analysis::entity::{Direction, EngulfingEvent};
use kizashi_core::market::entity::Candle;

/// # Summary
/// 检测相邻两根 K 线构成的吞没形态。
///
/// # Logic
/// 1. 看涨吞没：前一根为阴线，后一根为阳线，且后一根实体严格包含前一根实体的上下沿。
/// 2. 看跌吞没：前一根为阳线，后一根为阴线，包含条件相同。
/// 3. 只比较相邻的两根，不跨越间隔。
///
/// # Arguments
/// * `candles`: 按时间升序的 K 线。
///
/// # Returns
/// 按下标升序的吞没事件。
pub fn detect_engulfing(candles: &[Candle]) -> Vec<EngulfingEvent> {
    candles
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let (prev, curr) = (&pair[0], &pair[1]);
            let contains =
                curr.body_high() > prev.body_high() && curr.body_low() < prev.body_low();
            if !contains {
                return None;
            }
            let direction = if prev.is_bearish() && curr.is_bullish() {
                Direction::Bullish
            } else if prev.is_bullish() && curr.is_bearish() {
                Direction::Bearish
            } else {
                return None;
            };
            Some(EngulfingEvent {
                index: i + 1,
                direction,
                candle: *curr,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, open: f64, close: f64) -> Candle {
        Candle {
            time,
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
        }
    }

    #[test]
    fn test_bullish_engulfing() {
        let candles = [candle(0, 100.0, 90.0), candle(60, 89.0, 102.0)];
        let events = detect_engulfing(&candles);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Direction::Bullish);
        assert_eq!(events[0].index, 1);
        assert_eq!(events[0].candle.time, 60);
    }

    #[test]
    fn test_bearish_engulfing() {
        let candles = [candle(0, 90.0, 100.0), candle(60, 101.0, 88.0)];
        let events = detect_engulfing(&candles);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Direction::Bearish);
    }

    #[test]
    fn test_equal_body_edge_is_not_engulfing() {
        // 上沿相等，不满足严格包含
        let candles = [candle(0, 100.0, 90.0), candle(60, 89.0, 100.0)];
        assert!(detect_engulfing(&candles).is_empty());
    }

    #[test]
    fn test_same_colour_is_not_engulfing() {
        let candles = [candle(0, 90.0, 100.0), candle(60, 89.0, 102.0)];
        assert!(detect_engulfing(&candles).is_empty());
    }

    #[test]
    fn test_only_adjacent_pairs_are_examined() {
        let candles = [
            candle(0, 100.0, 90.0),
            candle(60, 95.0, 96.0),
            candle(120, 89.0, 102.0),
        ];
        let events = detect_engulfing(&candles);
        // 第三根只与第二根比较：第二根为阳线，不构成看涨吞没
        assert!(events.is_empty());
    }
}
