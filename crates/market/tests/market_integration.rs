use anyhow::{Result, anyhow};
use futures::StreamExt;
use kizashi_core::analysis::entity::AnalysisReport;
use kizashi_core::common::{Interval, StreamKey};
use kizashi_core::config::StreamConfig;
use kizashi_core::market::entity::Kline;
use kizashi_core::market::error::MarketError;
use kizashi_core::market::port::{
    ConnectionState, EventStream, FeedEvent, KlineUpdate, SubscriptionEvent,
};
use kizashi_core::test_utils::{HistoryRequest, MockProvider, kline, rising_klines};
use kizashi_market::MarketHub;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(120);

fn update(symbol: &str, interval: Interval, kline: Kline) -> FeedEvent {
    FeedEvent::Kline(KlineUpdate {
        symbol: symbol.to_string(),
        interval,
        kline,
    })
}

async fn next_event(events: &mut EventStream) -> Result<SubscriptionEvent> {
    tokio::time::timeout(WAIT, events.next())
        .await?
        .ok_or_else(|| anyhow!("event stream ended"))
}

async fn next_analysis(events: &mut EventStream) -> Result<Arc<AnalysisReport>> {
    loop {
        if let SubscriptionEvent::Analysis(report) = next_event(events).await? {
            return Ok(report);
        }
    }
}

async fn wait_for_state(events: &mut EventStream, state: ConnectionState) -> Result<()> {
    loop {
        if let SubscriptionEvent::StateChanged(s) = next_event(events).await?
            && s == state
        {
            return Ok(());
        }
    }
}

async fn next_reconnect(events: &mut EventStream) -> Result<(u32, u128)> {
    loop {
        if let SubscriptionEvent::Reconnecting { attempt, delay } = next_event(events).await? {
            return Ok((attempt, delay.as_millis()));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_history_then_live_merge() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(0, 10, 100.0)));
    let feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("btcusdt", Interval::Minute1);
    let mut events = handle.events();

    let report = next_analysis(&mut events).await?;
    assert_eq!(report.candles.len(), 10);
    assert_eq!(report.key, StreamKey::new("BTCUSDT", Interval::Minute1));
    wait_for_state(&mut events, ConnectionState::Connected).await?;
    assert_eq!(handle.state(), ConnectionState::Connected);

    // 进行中的 K 线：同一时间替换
    let mut live = kline(540, 109.0, 120.0, 108.0, 119.0);
    live.is_final = false;
    feed.send(update("BTCUSDT", Interval::Minute1, live))?;
    let report = next_analysis(&mut events).await?;
    assert_eq!(report.candles.len(), 10);
    assert_eq!(report.candles[9].close, 119.0);

    // 其他订阅的残留消息、无法解析的消息和过期 K 线都不产生更新
    feed.send(update("ETHUSDT", Interval::Minute1, kline(600, 1.0, 1.0, 1.0, 1.0)))?;
    feed.send(update("BTCUSDT", Interval::Minute5, kline(600, 1.0, 1.0, 1.0, 1.0)))?;
    feed.send(FeedEvent::Malformed("{\"e\":".to_string()))?;
    feed.send(update("BTCUSDT", Interval::Minute1, kline(300, 1.0, 1.0, 1.0, 1.0)))?;
    feed.send(update("btcusdt", Interval::Minute1, kline(600, 119.0, 121.0, 118.0, 120.0)))?;

    let report = next_analysis(&mut events).await?;
    assert_eq!(report.candles.len(), 11);
    assert_eq!(report.candles[10].time, 600);
    assert_eq!(report.candles[5].close, 106.0);

    let latest = handle.latest().ok_or_else(|| anyhow!("no latest report"))?;
    assert_eq!(latest.candles.len(), 11);
    assert_eq!(
        provider.history_requests(),
        vec![HistoryRequest {
            key: StreamKey::new("BTCUSDT", Interval::Minute1),
            limit: 500,
            end_before: None,
        }]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_until_terminal() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(0, 5, 100.0)));
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute15);
    let mut events = handle.events();

    let mut delays = Vec::new();
    let attempts = loop {
        match next_event(&mut events).await? {
            SubscriptionEvent::Reconnecting { attempt, delay } => {
                assert_eq!(usize::try_from(attempt)?, delays.len() + 1);
                delays.push(delay.as_millis());
            }
            SubscriptionEvent::ConnectionFailed { attempts } => break attempts,
            _ => {}
        }
    };

    assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000]);
    assert_eq!(attempts, 6);
    assert_eq!(handle.state(), ConnectionState::Failed);

    let instants = provider.connect_instants();
    assert_eq!(instants.len(), 6);
    let gaps: Vec<u128> = instants
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis())
        .collect();
    assert_eq!(gaps, delays);

    // 终态后不再有任何自动重连
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(provider.connect_instants().len(), 6);
    // 历史数据仍然可用
    assert_eq!(handle.latest().map(|r| r.candles.len()), Some(5));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_successful_connection_resets_attempts() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.refuse_connection("exchange down");
    let feed = provider.accept_connection();
    provider.refuse_connection("exchange down again");
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();

    assert_eq!(next_reconnect(&mut events).await?, (1, 2_000));
    wait_for_state(&mut events, ConnectionState::Connected).await?;

    drop(feed);
    wait_for_state(&mut events, ConnectionState::Disconnected).await?;
    assert_eq!(next_reconnect(&mut events).await?, (1, 2_000));
    assert_eq!(next_reconnect(&mut events).await?, (2, 4_000));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_frame_triggers_reconnect() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    let feed = provider.accept_connection();
    let _second = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();
    wait_for_state(&mut events, ConnectionState::Connected).await?;

    feed.send(FeedEvent::Closed {
        code: Some(1006),
        reason: "abnormal closure".to_string(),
    })?;
    assert_eq!(next_reconnect(&mut events).await?, (1, 2_000));
    wait_for_state(&mut events, ConnectionState::Connected).await?;
    assert_eq!(provider.connect_instants().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_backfill_in_flight() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(6_000, 5, 100.0)));
    provider.push_history(Ok(rising_klines(5_700, 5, 90.0)));
    let _feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();
    next_analysis(&mut events).await?;
    wait_for_state(&mut events, ConnectionState::Connected).await?;

    provider.set_history_latency(Duration::from_secs(5));
    handle.request_backfill(None);
    hub.request_backfill(&handle, Some(100));
    handle.request_backfill(Some(1_000_000));

    let report = next_analysis(&mut events).await?;
    assert_eq!(report.candles.len(), 10);
    assert_eq!(report.candles[0].time, 5_700);
    assert!(report.candles.windows(2).all(|w| w[0].time < w[1].time));

    let requests = provider.history_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].end_before, Some(6_000));
    assert_eq!(requests[1].limit, 500);

    // 上一次完成后可以再次回填，上界取较小者
    handle.request_backfill(Some(9_999));
    tokio::time::sleep(Duration::from_secs(10)).await;
    let requests = provider.history_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].end_before, Some(5_700));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_switch_discards_previous_stream() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(0, 5, 100.0)));
    let old_feed = provider.accept_connection();
    provider.push_history(Ok(rising_klines(0, 3, 2_000.0)));
    let new_feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();
    assert_eq!(next_analysis(&mut events).await?.candles.len(), 5);
    wait_for_state(&mut events, ConnectionState::Connected).await?;

    handle.switch("ethusdt", Interval::Hour1);
    let eth = StreamKey::new("ETHUSDT", Interval::Hour1);
    let report = next_analysis(&mut events).await?;
    assert_eq!(report.key, eth);
    assert_eq!(report.candles.len(), 3);
    assert_eq!(handle.key(), eth);
    assert_eq!(hub.active_keys(), vec![eth.clone()]);
    wait_for_state(&mut events, ConnectionState::Connected).await?;

    // 旧连接已被释放
    assert!(
        old_feed
            .send(update("BTCUSDT", Interval::Minute1, kline(300, 1.0, 1.0, 1.0, 1.0)))
            .is_err()
    );

    new_feed.send(update("BTCUSDT", Interval::Minute1, kline(180, 1.0, 1.0, 1.0, 1.0)))?;
    new_feed.send(update("ETHUSDT", Interval::Hour1, kline(180, 2_003.0, 2_010.0, 2_001.0, 2_008.0)))?;
    let report = next_analysis(&mut events).await?;
    assert_eq!(report.candles.len(), 4);
    assert_eq!(report.candles[3].close, 2_008.0);

    let keys: Vec<StreamKey> = provider
        .history_requests()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(keys, vec![StreamKey::new("BTCUSDT", Interval::Minute1), eth.clone()]);
    assert_eq!(provider.connect_keys().last(), Some(&eth));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_leaves_series_empty() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Err(MarketError::Status(500)));
    let feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();

    let message = loop {
        if let SubscriptionEvent::FetchFailed(message) = next_event(&mut events).await? {
            break message;
        }
    };
    assert!(message.contains("500"));
    assert!(handle.latest().is_none());

    // 连接照常建立，实时数据从空序列开始累积
    wait_for_state(&mut events, ConnectionState::Connected).await?;
    feed.send(update("BTCUSDT", Interval::Minute1, kline(60, 1.0, 2.0, 0.5, 1.5)))?;
    assert_eq!(next_analysis(&mut events).await?.candles.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unordered_history_is_rejected() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(vec![
        kline(120, 1.0, 1.0, 1.0, 1.0),
        kline(60, 1.0, 1.0, 1.0, 1.0),
    ]));
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();
    let failed = loop {
        if let SubscriptionEvent::FetchFailed(message) = next_event(&mut events).await? {
            break message;
        }
    };
    assert!(failed.starts_with("Invalid series"));
    assert!(handle.latest().is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels_reconnect_and_cleans_registry() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let first = hub.subscribe("BTCUSDT", Interval::Minute1);
    let second = hub.subscribe("BTCUSDT", Interval::Minute1);
    assert_ne!(first.id(), second.id());
    assert_eq!(hub.active_count(), 2);

    let mut events = second.events();
    assert_eq!(next_reconnect(&mut events).await?.0, 1);
    let connects_before = provider.connect_instants().len();

    hub.unsubscribe(first);
    assert_eq!(hub.active_count(), 1);

    drop(events);
    drop(second);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(hub.active_count(), 0);
    assert_eq!(provider.connect_instants().len(), connects_before);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_analysis_callback_fires_on_updates() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(0, 3, 100.0)));
    let feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = handle.on_analysis_updated(move |report| {
        tx.send(report.candles.len()).ok();
    });

    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await?, Some(3));
    feed.send(update("BTCUSDT", Interval::Minute1, kline(180, 103.0, 105.0, 102.0, 104.0)))?;
    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await?, Some(4));

    callback.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_late_callback_receives_latest_report() -> Result<()> {
    let provider = Arc::new(MockProvider::new());
    provider.push_history(Ok(rising_klines(0, 3, 100.0)));
    let feed = provider.accept_connection();
    let hub = MarketHub::new(provider.clone(), StreamConfig::default());

    let handle = hub.subscribe("BTCUSDT", Interval::Minute1);
    let mut events = handle.events();
    assert_eq!(next_analysis(&mut events).await?.candles.len(), 3);

    for i in 0..20_i32 {
        let price = 103.0 + f64::from(i);
        feed.send(update(
            "BTCUSDT",
            Interval::Minute1,
            kline(180 + i64::from(i) * 60, price, price + 1.5, price - 0.5, price + 1.0),
        ))?;
    }
    while next_analysis(&mut events).await?.candles.len() < 23 {}

    // 注册时已有结果，立即回调
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = handle.on_analysis_updated(move |report| {
        tx.send(report.candles.len()).ok();
    });
    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await?, Some(23));

    // 连续更新时回调最终停在最新结果上
    for i in 20..30_i32 {
        let price = 103.0 + f64::from(i);
        feed.send(update(
            "BTCUSDT",
            Interval::Minute1,
            kline(180 + i64::from(i) * 60, price, price + 1.5, price - 0.5, price + 1.0),
        ))?;
    }
    let mut seen = Vec::new();
    while seen.last() != Some(&33) {
        match tokio::time::timeout(WAIT, rx.recv()).await? {
            Some(len) => seen.push(len),
            None => return Err(anyhow!("callback channel closed")),
        }
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(handle.latest().map(|r| r.candles.len()), Some(33));

    callback.abort();
    Ok(())
}
