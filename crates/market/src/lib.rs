//! 行情流对账层：K 线序列、重连策略、对账任务与订阅注册中心。

pub mod backoff;
pub mod handle;
pub mod manager;
mod reconciler;
pub mod series;

pub use handle::SubscriptionHandle;
pub use manager::MarketHub;
