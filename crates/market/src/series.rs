use kizashi_core::market::entity::Kline;
use kizashi_core::market::error::MarketError;
use thiserror::Error;

/// # Summary
/// 序列写入错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("candles not strictly ascending at index {index}: {previous} then {current}")]
    NotAscending {
        index: usize,
        previous: i64,
        current: i64,
    },
}

impl From<SeriesError> for MarketError {
    fn from(err: SeriesError) -> Self {
        MarketError::InvalidSeries(err.to_string())
    }
}

/// 单条实时更新的合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    // 与最后一根同一时间，原地替换
    Replaced,
    // 时间更新，追加到末尾
    Appended,
    // 过期或重复，序列未变
    Ignored,
}

/// # Summary
/// 单个订阅独占的 K 线序列。
///
/// # Invariants
/// - 按 `time` 严格升序，不存在重复时间。
/// - 追加超出容量时从头部淘汰最旧的一根；回填不受容量限制，一次追加不会使序列变短。
/// - 只由所属对账任务写入。
#[derive(Debug, Clone)]
pub struct CandleSeries {
    // 有序 K 线数据
    data: Vec<Kline>,
    // 追加时的容量上限
    capacity: usize,
}

impl CandleSeries {
    /// # Summary
    /// 创建一个空序列。
    ///
    /// # Arguments
    /// * `capacity`: 追加时保留的最大数量，至少为 1。
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// # Summary
    /// 用历史数据整体替换序列。
    ///
    /// # Logic
    /// 1. 校验输入按时间严格升序。
    /// 2. 校验失败时序列保持不变。
    ///
    /// # Arguments
    /// * `klines`: 历史 K 线。
    ///
    /// # Returns
    /// 输入非升序时返回 `SeriesError::NotAscending`。
    pub fn replace_all(&mut self, klines: Vec<Kline>) -> Result<(), SeriesError> {
        if let Some((index, pair)) = klines
            .windows(2)
            .enumerate()
            .find(|(_, w)| w[0].candle.time >= w[1].candle.time)
        {
            return Err(SeriesError::NotAscending {
                index: index + 1,
                previous: pair[0].candle.time,
                current: pair[1].candle.time,
            });
        }
        self.data = klines;
        Ok(())
    }

    /// # Summary
    /// 合并一条实时推送。
    ///
    /// # Logic
    /// 1. 时间等于最后一根：原地替换（进行中的 K 线）。
    /// 2. 时间晚于最后一根：追加；超出容量时只淘汰最旧的一根，
    ///    回填带入的历史随新 K 线逐根滑出，追加不会使序列变短。
    /// 3. 其余情况：丢弃。
    ///
    /// # Arguments
    /// * `kline`: 推送的 K 线。
    ///
    /// # Returns
    /// 合并结果。
    pub fn merge_update(&mut self, kline: Kline) -> MergeOutcome {
        let Some(last) = self.data.last_mut() else {
            self.data.push(kline);
            return MergeOutcome::Appended;
        };
        if kline.candle.time == last.candle.time {
            *last = kline;
            MergeOutcome::Replaced
        } else if kline.candle.time > last.candle.time {
            self.data.push(kline);
            if self.data.len() > self.capacity {
                self.data.remove(0);
            }
            MergeOutcome::Appended
        } else {
            MergeOutcome::Ignored
        }
    }

    /// # Summary
    /// 合并一页更早的历史数据。
    ///
    /// # Logic
    /// 1. 过滤掉序列中已存在的时间，以及批内重复的时间。
    /// 2. 前置剩余记录并按时间重新排序。
    ///
    /// # Arguments
    /// * `klines`: 回填的 K 线。
    ///
    /// # Returns
    /// 实际新增的数量。
    pub fn merge_backfill(&mut self, mut klines: Vec<Kline>) -> usize {
        klines.retain(|k| {
            self.data
                .binary_search_by_key(&k.candle.time, |e| e.candle.time)
                .is_err()
        });
        klines.sort_by_key(|k| k.candle.time);
        klines.dedup_by_key(|k| k.candle.time);
        let added = klines.len();
        if added > 0 {
            klines.append(&mut self.data);
            klines.sort_by_key(|k| k.candle.time);
            self.data = klines;
        }
        added
    }

    /// 清空序列
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// 最早一根的时间
    pub fn first_time(&self) -> Option<i64> {
        self.data.first().map(|k| k.candle.time)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 当前序列的只读视图
    pub fn klines(&self) -> &[Kline] {
        &self.data
    }
}
