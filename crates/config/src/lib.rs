//! 统一配置中心
//!
//! 提供告警分发服务的全局配置管理，包括：
//! - JWT认证
//! - 回放缓冲
//! - 限流默认值
//! - 服务设置
//!
//! 配置在进程启动时加载一次，之后以只读引用传入各组件。

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 告警流配置
    pub stream: StreamConfig,
    /// 回放缓冲配置
    pub replay: ReplayConfig,
    /// 服务配置
    pub server: ServerConfig,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 告警流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// 每个连接的出站写队列容量，写满视为投递失败
    pub send_queue_capacity: usize,
    /// 连接空闲超时（秒），超时后注销连接
    pub idle_timeout_secs: u64,
    /// 最后一个连接断开后订阅的保留期（秒）
    pub subscription_grace_secs: u64,
}

/// 回放缓冲配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// 每个身份保留的最大事件条数
    pub max_entries: usize,
    /// 事件最长保留时间（秒）
    pub max_age_secs: u64,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// 从环境变量加载配置
    /// 对于关键安全配置（JWT_SECRET），如果环境变量不存在将会 panic
    /// 这确保了生产环境中不会使用不安全的默认值
    pub fn from_env() -> Self {
        Self {
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .expect("JWT_SECRET environment variable is required for production safety"),
                expiration_hours: env_parse("JWT_EXPIRATION_HOURS", 24),
            },
            stream: StreamConfig::from_env(),
            replay: ReplayConfig::from_env(),
            server: ServerConfig::from_env(),
        }
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认值，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        Self {
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                    "dev-secret-key-not-for-production-use-minimum-32-chars".to_string()
                }),
                expiration_hours: env_parse("JWT_EXPIRATION_HOURS", 24),
            },
            stream: StreamConfig::from_env(),
            replay: ReplayConfig::from_env(),
            server: ServerConfig::from_env(),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度和安全性（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // 检查JWT密钥是否为明显的开发密钥
        if self.jwt.secret.contains("dev-secret")
            || self.jwt.secret.contains("not-for-production")
            || self.jwt.secret.contains("please-change")
        {
            return Err(ConfigError::InvalidJwtSecret(
                "Cannot use development JWT secret in production".to_string(),
            ));
        }

        if self.stream.send_queue_capacity == 0 {
            return Err(ConfigError::InvalidStreamConfig(
                "Send queue capacity must be greater than 0".to_string(),
            ));
        }

if self.replay.max_entries == 0 {
            return Err(ConfigError::InvalidReplayConfig(
                "Replay buffer must retain at least one entry".to_string(),
            ));
        }

        Ok(())
    }
}

impl StreamConfig {
    fn from_env() -> Self {
        Self {
            send_queue_capacity: env_parse("STREAM_SEND_QUEUE_CAPACITY", 256),
            idle_timeout_secs: env_parse("STREAM_IDLE_TIMEOUT_SECS", 90),
            subscription_grace_secs: env_parse("STREAM_SUBSCRIPTION_GRACE_SECS", 300),
        }
    }
}

impl ReplayConfig {
    fn from_env() -> Self {
        Self {
            max_entries: env_parse("REPLAY_MAX_ENTRIES", 200),
            max_age_secs: env_parse("REPLAY_MAX_AGE_SECS", 120),
        }
    }
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("SERVER_PORT", 8080),
        }
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid stream configuration: {0}")]
    InvalidStreamConfig(String),
    #[error("Invalid replay configuration: {0}")]
    InvalidReplayConfig(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    /// 注意：生产环境应该明确调用 from_env() 而不是依赖默认值
    fn default() -> Self {
        Self::from_env_with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_from_env_with_defaults() {
        let config = AppConfig::from_env_with_defaults();
        assert!(!config.jwt.secret.is_empty());
        assert!(config.jwt.expiration_hours > 0);
        assert!(config.server.port > 0);
        assert!(config.replay.max_entries > 0);
        assert_eq!(config.stream.send_queue_capacity, 256);
    }

    #[test]
    fn test_config_from_env_requires_critical_vars() {
        env::remove_var("JWT_SECRET");

        // 测试缺少关键环境变量时会panic
        let result = std::panic::catch_unwind(AppConfig::from_env);
        assert!(
            result.is_err(),
            "AppConfig::from_env() should panic when critical env vars are missing"
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::from_env_with_defaults();

        // 开发配置需要修复JWT密钥才能通过验证
        config.jwt.secret = "production-grade-secret-key-with-sufficient-length".to_string();
        assert!(config.validate().is_ok());

        // 测试无效JWT密钥长度
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        // 测试开发JWT密钥在生产环境被拒绝
        config.jwt.secret = "dev-secret-key-not-for-production-use".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("development JWT secret"));
    }

    #[test]
    fn test_stream_limits_validation() {
        let mut config = AppConfig::from_env_with_defaults();
        config.jwt.secret = "production-grade-secret-key-with-sufficient-length".to_string();

        config.stream.send_queue_capacity = 0;
        assert!(config.validate().is_err());

        config.stream.send_queue_capacity = 256;
        config.replay.max_entries = 0;
        assert!(config.validate().is_err());
    }
}
