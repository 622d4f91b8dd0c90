//! 行情数据源的具体实现。

pub mod binance;

pub use binance::BinanceProvider;
