//! Kizashi 核心领域层：实体、错误、端口与配置。
//!
//! 本 crate 不依赖工作区内任何其他 crate，所有具体实现通过端口 (Trait) 注入。

pub mod analysis;
pub mod common;
pub mod config;
pub mod market;

#[cfg(feature = "test-utils")]
pub mod test_utils;
