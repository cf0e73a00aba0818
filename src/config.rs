//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// 事件总线容量（超出后慢订阅者会丢失事件）
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefetchConfig {
    /// 合并多次过期标记的等待时间（毫秒）
    pub debounce_ms: u64,
    /// 失败重试的基础退避时间（毫秒），按 2^n 递增
    pub backoff_base_ms: u64,
    /// 最大尝试次数
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// 后端 REST API 地址；未配置时不启动后台拉取
    pub base_url: Option<String>,
    /// 请求超时时间（毫秒）
    pub request_timeout_ms: u64,
    /// Bearer 令牌（使用 Secret 包装，防止日志泄露）
    pub token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// 角色注册表 JSON 文件路径；未配置时使用内置注册表
    pub registry_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub realtime: RealtimeConfig,
    pub refetch: RefetchConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("realtime.bus_capacity", 1000)?
            .set_default("refetch.debounce_ms", 50)?
            .set_default("refetch.backoff_base_ms", 500)?
            .set_default("refetch.max_attempts", 3)?
            .set_default("api.request_timeout_ms", 10000)?;

        // 从环境变量加载配置（前缀为 TASKMASTER_）
        settings = settings.add_source(
            Environment::with_prefix("TASKMASTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.realtime.bus_capacity == 0 {
            return Err(ConfigError::Message("bus_capacity must be > 0".to_string()));
        }

        if self.refetch.max_attempts < 1 || self.refetch.max_attempts > 20 {
            return Err(ConfigError::Message(
                "refetch.max_attempts must be between 1 and 20".to_string(),
            ));
        }

        if self.refetch.debounce_ms > 60_000 {
            return Err(ConfigError::Message(
                "refetch.debounce_ms must be <= 60000".to_string(),
            ));
        }

        if let Some(url) = &self.api.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Message(format!(
                    "Invalid api.base_url: {}. Must start with http:// or https://",
                    url
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "TASKMASTER_SERVER__ADDR",
            "TASKMASTER_LOGGING__LEVEL",
            "TASKMASTER_LOGGING__FORMAT",
            "TASKMASTER_API__BASE_URL",
            "TASKMASTER_API__TOKEN",
            "TASKMASTER_REFETCH__MAX_ATTEMPTS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:3000");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.realtime.bus_capacity, 1000);
        assert_eq!(config.refetch.max_attempts, 3);
        assert!(config.api.base_url.is_none());
        assert!(config.api.token.is_none());
        assert!(config.access.registry_path.is_none());
    }

    #[test]
    #[serial]
    fn test_config_api_from_env() {
        clear_env();
        std::env::set_var("TASKMASTER_API__BASE_URL", "https://api.example.com");
        std::env::set_var("TASKMASTER_API__TOKEN", "token-value");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.api.base_url.as_deref(), Some("https://api.example.com"));
        assert!(config.api.token.is_some());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_port() {
        clear_env();
        std::env::set_var("TASKMASTER_SERVER__ADDR", "0.0.0.0:80");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("TASKMASTER_LOGGING__LEVEL", "invalid");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_base_url() {
        clear_env();
        std::env::set_var("TASKMASTER_API__BASE_URL", "ftp://example.com");

        let result = AppConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }
}
