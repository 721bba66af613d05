//! 协议相关类型定义

use serde::{Deserialize, Serialize};

/// 单次读请求最多寄存器数（功能码 3/4）
pub const MAX_READ_REGISTERS: u16 = 125;

/// 单次写请求最多寄存器数（功能码 16）
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// 多寄存器数值的字序
///
/// 每个寄存器内部始终是高字节在前；字序只决定高位寄存器还是低位寄存器先传。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// 高位字在前（默认）
    #[default]
    MswLsw,
    /// 低位字在前
    LswMsw,
}

/// 读任务调度优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// 每个周期都执行
    High,
    /// 轮转执行，每周期最多执行预算个
    #[default]
    Low,
}

/// 读功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReadFunction {
    /// 读保持寄存器 (0x03)
    #[default]
    ReadHoldingRegisters,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters,
}

impl ReadFunction {
    pub fn code(self) -> u8 {
        match self {
            ReadFunction::ReadHoldingRegisters => 3,
            ReadFunction::ReadInputRegisters => 4,
        }
    }
}

impl TryFrom<u8> for ReadFunction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            3 => Ok(ReadFunction::ReadHoldingRegisters),
            4 => Ok(ReadFunction::ReadInputRegisters),
            _ => Err(format!("unsupported read function code: {}", code)),
        }
    }
}

impl From<ReadFunction> for u8 {
    fn from(function: ReadFunction) -> Self {
        function.code()
    }
}

/// 写功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WriteFunction {
    /// 写单个寄存器 (0x06)
    WriteSingleRegister,
    /// 写多个寄存器 (0x10)
    #[default]
    WriteMultipleRegisters,
}

impl WriteFunction {
    pub fn code(self) -> u8 {
        match self {
            WriteFunction::WriteSingleRegister => 6,
            WriteFunction::WriteMultipleRegisters => 16,
        }
    }
}

impl TryFrom<u8> for WriteFunction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            6 => Ok(WriteFunction::WriteSingleRegister),
            16 => Ok(WriteFunction::WriteMultipleRegisters),
            _ => Err(format!("unsupported write function code: {}", code)),
        }
    }
}

impl From<WriteFunction> for u8 {
    fn from(function: WriteFunction) -> Self {
        function.code()
    }
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
