use config::{Config, ConfigError, Environment, File};
use kizashi_core::config::AppConfig;

/// # Summary
/// 加载分层配置。
///
/// # Logic
/// 1. 可选的 `config/default.toml`。
/// 2. 可选的 `config/local.toml`，用于本机覆盖。
/// 3. `KIZASHI__SECTION__FIELD` 形式的环境变量，优先级最高。
/// 4. 缺失的字段全部取默认值。
///
/// # Returns
/// 反序列化失败时返回 `ConfigError`。
pub fn load() -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(
            Environment::with_prefix("KIZASHI")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
