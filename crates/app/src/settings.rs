use config::{Config, ConfigError, Environment, File};
use joule_core::config::AppConfig;

/// 未设置 `JOULE_CONFIG` 时读取的配置文件 (扩展名由 config 自动探测)
const DEFAULT_CONFIG_PATH: &str = "config/joule";

/// 配置文件路径，可通过 `JOULE_CONFIG` 覆盖
pub fn config_path() -> String {
    std::env::var("JOULE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// # Summary
/// 分层加载应用配置。
///
/// # Logic
/// 1. 以 `AppConfig::default()` 作为最底层。
/// 2. 叠加可选的配置文件，文件不存在时跳过。
/// 3. 叠加 `JOULE__` 前缀的环境变量 (`__` 分隔层级)，例如 `JOULE__DATABASE__DATA_DIR`。
pub fn load(path: &str) -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("JOULE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
