//! # Modbus 主站桥
//!
//! 把设备驱动声明的寄存器元素周期性地读写到通道：
//! - **元素**：寄存器字 ↔ 类型化值（字序、符号、浮点、字符串、占位）
//! - **转换器**：元素值 ↔ 通道值（比例因子、偏移、取反等，可组合）
//! - **任务**：连续元素组成一次请求（功能码 3/4 读，6/16 写）
//! - **调度**：HIGH 每周期执行，LOW 按预算轮转
//! - **桥**：独占一条链路，顺序执行任务，失败按任务隔离
//!
//! ## 架构设计
//!
//! ```text
//! RegisterMap (JSON) / 驱动代码
//!       │
//!       ▼
//! ModbusProtocol (component_id + unit_id)
//!       ├── ReadTask  ── Element ── Converter
//!       └── WriteTask ── Element ── Converter + 待写值
//!       │
//!       ▼
//! ModbusBridge ── TaskScheduler
//!       │
//!       ▼
//! ModbusTransport (TcpTransport / 测试桩)
//!       │
//!       ▼
//! ChannelRegistry（读阶段写入值，写阶段取走待写值）
//! ```
//!
//! ## 配置格式
//!
//! 见 [`definition`] 模块。

mod bridge;
mod converter;
pub mod definition;
mod element;
mod error;
mod protocol;
mod scheduler;
mod task;
mod tcp;
mod transport;
mod types;

pub use bridge::{
    BridgeConfig, BridgeHealth, CycleReport, ModbusBridge, TaskKind, TaskOutcome, TaskReport,
};
pub use converter::Converter;
pub use definition::RegisterMap;
pub use element::{Element, ElementKind, ElementType, bytes_to_words, words_to_bytes};
pub use error::{ConfigurationError, DecodeError, ModbusError, TransportError};
pub use protocol::ModbusProtocol;
pub use scheduler::{CyclePlan, TaskRef, TaskScheduler, TaskState};
pub use task::{ReadTask, RejectedWrite, WriteElement, WriteRequest, WriteTask};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::ModbusTransport;
pub use types::*;
