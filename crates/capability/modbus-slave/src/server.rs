//! Modbus/TCP 从站服务
//!
//! 监听 TCP 端口，把外部主站的请求路由到过程映像：
//! - 功能码 3/4 → [`ProcessImage::read_registers`]
//! - 功能码 6/16 → [`ProcessImage::stage_writes`]（只暂存为下一个写入值）
//!
//! 不区分 unit id，所有请求共用同一张映像。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let server = SlaveServer::bind("0.0.0.0:502".parse()?, image, channels).await?;
//! server.run(async { shutdown.await }).await?;
//! ```

use crate::error::SlaveError;
use crate::process_image::ProcessImage;
use domain::{ChannelError, ChannelRegistry};
use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};
use tracing::{debug, info, warn};

/// 单个连接上的请求处理
#[derive(Debug, Clone)]
pub struct SlaveService {
    image: Arc<ProcessImage>,
    channels: Arc<ChannelRegistry>,
}

impl SlaveService {
    pub fn new(image: Arc<ProcessImage>, channels: Arc<ChannelRegistry>) -> Self {
        Self { image, channels }
    }

    /// 处理一个请求；错误映射为 Modbus 异常码
    pub fn handle(&self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        let result = match request {
            Request::ReadHoldingRegisters(address, count) => self
                .image
                .read_registers(address, count, &self.channels)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(address, count) => self
                .image
                .read_registers(address, count, &self.channels)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleRegister(address, word) => self
                .image
                .stage_writes(address, &[word], &self.channels)
                .map(|_| Response::WriteSingleRegister(address, word)),
            Request::WriteMultipleRegisters(address, words) => {
                let count = words.len() as u16;
                self.image
                    .stage_writes(address, &words, &self.channels)
                    .map(|_| Response::WriteMultipleRegisters(address, count))
            }
            other => {
                debug!(target: "ems.modbus.slave", request = ?other, "unsupported function");
                return Err(ExceptionCode::IllegalFunction);
            }
        };
        result.map_err(|err| {
            debug!(target: "ems.modbus.slave", error = %err, "slave request rejected");
            exception_code(&err)
        })
    }
}

impl tokio_modbus::server::Service for SlaveService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, request: Self::Request) -> Self::Future {
        future::ready(self.handle(request))
    }
}

/// 地址类错误和只读 → 0x02，值错误 → 0x03，其余 → 0x04
pub fn exception_code(err: &SlaveError) -> ExceptionCode {
    match err {
        SlaveError::IllegalAddress(_) | SlaveError::ReadOnly(_) => {
            ExceptionCode::IllegalDataAddress
        }
        SlaveError::IllegalValue(_) | SlaveError::Channel(ChannelError::Value { .. }) => {
            ExceptionCode::IllegalDataValue
        }
        SlaveError::Channel(ChannelError::NotWritable(_)) => ExceptionCode::IllegalDataAddress,
        SlaveError::Channel(_) | SlaveError::Layout(_) | SlaveError::Parse(_) => {
            ExceptionCode::ServerDeviceFailure
        }
    }
}

/// Modbus/TCP 从站
pub struct SlaveServer {
    listener: TcpListener,
    service: SlaveService,
}

impl SlaveServer {
    pub async fn bind(
        addr: SocketAddr,
        image: Arc<ProcessImage>,
        channels: Arc<ChannelRegistry>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service: SlaveService::new(image, channels),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受连接直到 `shutdown` 完成
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let addr = self.local_addr()?;
        info!(target: "ems.modbus.slave", addr = %addr, "modbus slave listening");

        let service = self.service;
        let server = Server::new(self.listener);
        let on_connected = |stream: tokio::net::TcpStream, peer: SocketAddr| {
            let service = service.clone();
            async move {
                info!(target: "ems.modbus.slave", peer = %peer, "modbus master connected");
                accept_tcp_connection(stream, peer, move |_| {
                    Ok::<_, io::Error>(Some(service.clone()))
                })
            }
        };
        let on_process_error = |err: io::Error| {
            warn!(target: "ems.modbus.slave", error = %err, "modbus slave connection failed");
        };

        tokio::select! {
            result = server.serve(&on_connected, on_process_error) => result?,
            _ = shutdown => {}
        }
        info!(target: "ems.modbus.slave", addr = %addr, "modbus slave stopped");
        Ok(())
    }
}
