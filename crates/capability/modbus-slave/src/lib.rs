//! # Modbus 从站
//!
//! 把内部通道按固定布局暴露给外部 Modbus 主站：
//!
//! ```text
//! ModbusSlaveTable（每个组件）
//!       └── ModbusSlaveNatureTable（每个特性）
//!             └── ModbusRecord（通道 / 常量 / 占位 / 哈希 / 块长度 / 文本）
//!       │
//!       ▼
//! ProcessImage ── read_registers  → ChannelRegistry 当前值
//!              └─ write_registers → ChannelRegistry 下一个写入值
//! ```
//!
//! 记录在构建时确定，之后每次查询都重新读取通道值编码。
//! [`SlaveServer`] 在 Modbus/TCP 上对外提供这张映像。

pub mod definition;
mod error;
mod process_image;
mod record;
mod server;

pub use error::SlaveError;
pub use process_image::{
    COMPONENT_HEADER_WORDS, IMAGE_HEADER, MAX_READ_REGISTERS, ModbusSlaveNatureTable,
    ModbusSlaveTable, ProcessImage,
};
pub use definition::SlaveMap;
pub use record::{ModbusRecord, ModbusType, RecordKind, uint16_hash};
pub use server::{SlaveServer, SlaveService, exception_code};
