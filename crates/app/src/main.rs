mod logging;
mod settings;

use futures::StreamExt;
use kizashi_core::analysis::entity::AnalysisReport;
use kizashi_core::common::Interval;
use kizashi_core::market::port::SubscriptionEvent;
use kizashi_feed::BinanceProvider;
use kizashi_market::MarketHub;
use std::sync::Arc;
use tracing::{error, info, warn};

/// # Summary
/// 应用启动入口，纯粹的装配容器。
///
/// # Logic
/// 1. 加载分层配置并初始化日志。
/// 2. 实例化 Binance 数据源与订阅注册中心。
/// 3. 订阅配置中的 (交易对, 周期)，逐条记录分析更新与连接事件。
/// 4. 收到 Ctrl-C 或事件流结束时取消订阅并退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = settings::load()?;
    let _guard = logging::init(&config.log)?;
    info!("Kizashi starting...");

    let interval: Interval = config.watch.interval.parse()?;
    let feed = Arc::new(BinanceProvider::new(&config.feed)?);
    let hub = MarketHub::new(feed, config.stream.clone());

    let handle = hub.subscribe(&config.watch.symbol, interval);
    let mut events = handle.events();
    info!(key = %handle.key(), "Watching. Press Ctrl-C to exit");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received. Exiting...");
                break;
            }
            event = events.next() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    hub.unsubscribe(handle);
    Ok(())
}

fn log_event(event: &SubscriptionEvent) {
    match event {
        SubscriptionEvent::Analysis(report) => log_report(report),
        SubscriptionEvent::StateChanged(state) => info!(?state, "Connection state changed"),
        SubscriptionEvent::Reconnecting { attempt, delay } => {
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting")
        }
        SubscriptionEvent::FetchFailed(message) => warn!(%message, "History fetch failed"),
        SubscriptionEvent::ConnectionFailed { attempts } => {
            error!(attempts, "Connection failed, resubscribe to retry")
        }
    }
}

fn log_report(report: &AnalysisReport) {
    let Some(last) = report.candles.last() else {
        info!(key = %report.key, "Series empty");
        return;
    };
    let scores = &report.report;
    info!(
        key = %report.key,
        time = last.time,
        close = last.close,
        structure = ?report.analysis.market_structure,
        bullish = scores.bullish_score,
        bearish = scores.bearish_score,
        signal = ?scores.signal.direction,
        "Analysis updated"
    );
    if !scores.bullish_reasons.is_empty() {
        info!(reasons = ?scores.bullish_reasons, "Bullish reasons");
    }
    if !scores.bearish_reasons.is_empty() {
        info!(reasons = ?scores.bearish_reasons, "Bearish reasons");
    }
}
