//! Modbus TCP 传输实现
//!
//! 基于 tokio-modbus，首次请求时建立连接；传输层出错或超时后丢弃连接，
//! 下次请求自动重连。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let config = TcpTransportConfig {
//!     host: "192.168.1.100".to_string(),
//!     port: 502,
//!     connect_timeout_ms: 5000,
//! };
//! let transport = TcpTransport::new(config)?;
//! ```

use crate::error::TransportError;
use crate::transport::ModbusTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Modbus TCP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_connect_timeout() -> u64 {
    5000
}

pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    ctx: Option<tokio_modbus::client::Context>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Result<Self, TransportError> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| TransportError::Connection(format!("invalid address: {}", e)))?;
        Ok(Self {
            addr,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            ctx: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn context(
        &mut self,
        unit_id: u8,
    ) -> Result<&mut tokio_modbus::client::Context, TransportError> {
        if self.ctx.is_none() {
            info!(target: "ems.modbus", addr = %self.addr, "connecting to modbus server");
            let ctx = tokio::time::timeout(self.connect_timeout, tcp::connect(self.addr))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout.as_millis() as u64))?
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            info!(target: "ems.modbus", addr = %self.addr, "connected to modbus server");
            self.ctx = Some(ctx);
        }
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| TransportError::Connection("not connected".to_string()))?;
        ctx.set_slave(Slave(unit_id));
        Ok(ctx)
    }

    /// 拆解 tokio-modbus 的双层结果：外层是传输错误（断开连接），内层是异常码
    fn settle<T, E, X>(&mut self, result: Result<Result<T, X>, E>) -> Result<T, TransportError>
    where
        E: Display,
        X: Debug,
    {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(TransportError::Exception(format!("{:?}", exception))),
            Err(e) => {
                warn!(
                    target: "ems.modbus",
                    addr = %self.addr,
                    error = %e,
                    "dropping modbus connection"
                );
                self.ctx = None;
                Err(TransportError::Io(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let result = self
            .context(unit_id)
            .await?
            .read_holding_registers(address, count)
            .await;
        let registers = self.settle(result)?;
        debug!(
            target: "ems.modbus",
            slave = unit_id,
            register = address,
            count = count,
            values = ?registers,
            "read modbus registers"
        );
        Ok(registers)
    }

    async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let result = self
            .context(unit_id)
            .await?
            .read_input_registers(address, count)
            .await;
        self.settle(result)
    }

    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError> {
        let result = self
            .context(unit_id)
            .await?
            .write_multiple_registers(address, words)
            .await;
        self.settle(result)
    }

    async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        word: u16,
    ) -> Result<(), TransportError> {
        let result = self
            .context(unit_id)
            .await?
            .write_single_register(address, word)
            .await;
        self.settle(result)
    }

    async fn reset(&mut self) {
        if self.ctx.take().is_some() {
            debug!(target: "ems.modbus", addr = %self.addr, "modbus connection reset");
        }
    }
}
