//! 应用运行配置加载。

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// JSON 寄存器映射文件
    pub bridge_config_path: PathBuf,
    /// 周期长度（毫秒）
    pub cycle_time_ms: u64,
    /// 每桥每周期最多执行的 LOW 读任务数（映射文件可按桥覆盖）
    pub low_priority_budget: usize,
    /// 单次 Modbus 请求超时（映射文件可按桥覆盖）
    pub modbus_timeout_ms: u64,
    /// 建立 TCP 连接超时
    pub modbus_connect_timeout_ms: u64,
    /// 以 info 级别输出每个周期的摘要
    pub log_cycle_summary: bool,
    /// Modbus/TCP 从站监听地址；未设置时不启动从站
    pub modbus_slave_bind: Option<SocketAddr>,
    /// JSON 从站映射文件（设置监听地址时必填）
    pub slave_config_path: Option<PathBuf>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let bridge_config_path = read_optional("EMS_BRIDGE_CONFIG")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Missing("EMS_BRIDGE_CONFIG".to_string()))?;
        let cycle_time_ms = read_u64_with_default("EMS_CYCLE_TIME_MS", 1000)?;
        if cycle_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "EMS_CYCLE_TIME_MS".to_string(),
                "0".to_string(),
            ));
        }
        let low_priority_budget = read_u64_with_default("EMS_LOW_PRIORITY_BUDGET", 1)? as usize;
        let modbus_timeout_ms = read_u64_with_default("EMS_MODBUS_TIMEOUT_MS", 3000)?;
        let modbus_connect_timeout_ms =
            read_u64_with_default("EMS_MODBUS_CONNECT_TIMEOUT_MS", 5000)?;
        let log_cycle_summary = read_bool_with_default("EMS_LOG_CYCLE_SUMMARY", false);
        let modbus_slave_bind = match read_optional("EMS_MODBUS_SLAVE_BIND") {
            Some(value) => Some(value.parse::<SocketAddr>().map_err(|_| {
                ConfigError::Invalid("EMS_MODBUS_SLAVE_BIND".to_string(), value.clone())
            })?),
            None => None,
        };
        let slave_config_path = read_optional("EMS_SLAVE_CONFIG").map(PathBuf::from);
        if modbus_slave_bind.is_some() && slave_config_path.is_none() {
            return Err(ConfigError::Missing("EMS_SLAVE_CONFIG".to_string()));
        }

        Ok(Self {
            bridge_config_path,
            cycle_time_ms,
            low_priority_budget,
            modbus_timeout_ms,
            modbus_connect_timeout_ms,
            log_cycle_summary,
            modbus_slave_bind,
            slave_config_path,
        })
    }

    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    pub fn modbus_timeout(&self) -> Duration {
        Duration::from_millis(self.modbus_timeout_ms)
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
