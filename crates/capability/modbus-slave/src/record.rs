//! 从站记录
//!
//! 每条记录占用固定数量的寄存器，按 [`ModbusType`] 把值编码为大端字节。
//! 值缺失时编码为该类型的“未定义”位模式：
//!
//! | 类型 | 字数 | 未定义 |
//! |------|------|--------|
//! | Uint16 / Enum16 | 1 | `0xFFFF` |
//! | Uint32 | 2 | `0xFFFFFFFF` |
//! | Uint64 | 4 | 全 1 |
//! | Float32 / Float64 | 2 / 4 | NaN |
//! | String16 | 16 | 全 0 |
//!
//! 未定义模式可能与合法的极值重合（例如 Uint16 的 65535），读写两个方向都按未定义处理。

use crate::error::SlaveError;
use domain::{Value, round_half_even};
use serde::{Deserialize, Serialize};
use std::fmt;

const FLOAT32_UNDEFINED: u32 = 0x7FC0_0000;
const FLOAT64_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;

/// 记录的寄存器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusType {
    Enum16,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String16,
}

impl ModbusType {
    pub fn words(self) -> u16 {
        match self {
            ModbusType::Enum16 | ModbusType::Uint16 => 1,
            ModbusType::Uint32 | ModbusType::Float32 => 2,
            ModbusType::Uint64 | ModbusType::Float64 => 4,
            ModbusType::String16 => 16,
        }
    }

    pub fn bytes(self) -> usize {
        usize::from(self.words()) * 2
    }

    /// 值 → 大端字节；`None` 或无法表示的值得到未定义模式
    pub fn to_byte_array(self, value: Option<&Value>) -> Vec<u8> {
        match self {
            ModbusType::Enum16 | ModbusType::Uint16 => match value.and_then(integer) {
                Some(v) => (v as u16).to_be_bytes().to_vec(),
                None => u16::MAX.to_be_bytes().to_vec(),
            },
            ModbusType::Uint32 => match value.and_then(integer) {
                Some(v) => (v as u32).to_be_bytes().to_vec(),
                None => u32::MAX.to_be_bytes().to_vec(),
            },
            ModbusType::Uint64 => match value.and_then(integer) {
                Some(v) => (v as u64).to_be_bytes().to_vec(),
                None => u64::MAX.to_be_bytes().to_vec(),
            },
            ModbusType::Float32 => match value.and_then(float) {
                Some(v) => (v as f32).to_bits().to_be_bytes().to_vec(),
                None => FLOAT32_UNDEFINED.to_be_bytes().to_vec(),
            },
            ModbusType::Float64 => match value.and_then(float) {
                Some(v) => v.to_bits().to_be_bytes().to_vec(),
                None => FLOAT64_UNDEFINED.to_be_bytes().to_vec(),
            },
            ModbusType::String16 => {
                let mut bytes = vec![0u8; self.bytes()];
                if let Some(value) = value {
                    let text = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    let mut end = text.len().min(bytes.len());
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
                }
                bytes
            }
        }
    }

    /// 大端字节 → 值；未定义模式返回 `None`
    pub fn from_byte_array(self, bytes: &[u8]) -> Result<Option<Value>, SlaveError> {
        if bytes.len() != self.bytes() {
            return Err(SlaveError::IllegalValue(format!(
                "{} expects {} bytes, got {}",
                self,
                self.bytes(),
                bytes.len()
            )));
        }
        let value = match self {
            ModbusType::Enum16 | ModbusType::Uint16 => {
                let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
                (raw != u16::MAX).then(|| Value::I64(i64::from(raw)))
            }
            ModbusType::Uint32 => {
                let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (raw != u32::MAX).then(|| Value::I64(i64::from(raw)))
            }
            ModbusType::Uint64 => {
                let raw = u64::from_be_bytes(eight(bytes));
                if raw == u64::MAX {
                    None
                } else {
                    let v = i64::try_from(raw)
                        .map_err(|_| SlaveError::IllegalValue(format!("{} exceeds i64", raw)))?;
                    Some(Value::I64(v))
                }
            }
            ModbusType::Float32 => {
                let raw = f32::from_bits(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
                (!raw.is_nan()).then(|| Value::F64(f64::from(raw)))
            }
            ModbusType::Float64 => {
                let raw = f64::from_bits(u64::from_be_bytes(eight(bytes)));
                (!raw.is_nan()).then_some(Value::F64(raw))
            }
            ModbusType::String16 => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                if end == 0 {
                    None
                } else {
                    let text = std::str::from_utf8(&bytes[..end])
                        .map_err(|e| SlaveError::IllegalValue(e.to_string()))?;
                    Some(Value::String(text.to_string()))
                }
            }
        };
        Ok(value)
    }
}

impl fmt::Display for ModbusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusType::Enum16 => "enum16",
            ModbusType::Uint16 => "uint16",
            ModbusType::Uint32 => "uint32",
            ModbusType::Uint64 => "uint64",
            ModbusType::Float32 => "float32",
            ModbusType::Float64 => "float64",
            ModbusType::String16 => "string16",
        };
        f.write_str(name)
    }
}

fn eight(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

fn integer(value: &Value) -> Option<i128> {
    match value {
        Value::I64(v) => Some(i128::from(*v)),
        Value::F64(v) if v.is_finite() => Some(round_half_even(*v) as i128),
        Value::Bool(v) => Some(i128::from(*v)),
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

/// Java `String.hashCode` 的低 16 位，跨进程稳定
pub fn uint16_hash(text: &str) -> u16 {
    let hash = text
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)));
    hash as u16
}

/// 记录内容
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    /// 组件通道的当前值
    Channel { channel_id: String },
    Constant(Value),
    /// 占位，恒为未定义模式
    Reserved,
    /// 文本的 16 位哈希
    Hash(String),
    /// 块长度
    BlockLength(u16),
    /// 常量文本
    Text(String),
}

/// 一条从站记录
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRecord {
    offset: u16,
    name: String,
    modbus_type: ModbusType,
    kind: RecordKind,
}

impl ModbusRecord {
    pub fn channel(offset: u16, channel_id: impl Into<String>, modbus_type: ModbusType) -> Self {
        let channel_id = channel_id.into();
        Self {
            offset,
            name: channel_id.clone(),
            modbus_type,
            kind: RecordKind::Channel { channel_id },
        }
    }

    pub fn constant(
        offset: u16,
        name: impl Into<String>,
        modbus_type: ModbusType,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            offset,
            name: name.into(),
            modbus_type,
            kind: RecordKind::Constant(value.into()),
        }
    }

    pub fn reserved(offset: u16, modbus_type: ModbusType) -> Self {
        Self {
            offset,
            name: "Reserved".to_string(),
            modbus_type,
            kind: RecordKind::Reserved,
        }
    }

    pub fn uint16_hash(offset: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            offset,
            name: format!("Hash of \"{}\"", text),
            modbus_type: ModbusType::Uint16,
            kind: RecordKind::Hash(text),
        }
    }

    pub fn uint16_block_length(offset: u16, name: impl Into<String>, length: u16) -> Self {
        Self {
            offset,
            name: format!("Length of block \"{}\"", name.into()),
            modbus_type: ModbusType::Uint16,
            kind: RecordKind::BlockLength(length),
        }
    }

    pub fn string16(offset: u16, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            offset,
            name: name.into(),
            modbus_type: ModbusType::String16,
            kind: RecordKind::Text(text.into()),
        }
    }

    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modbus_type(&self) -> ModbusType {
        self.modbus_type
    }

    pub fn words(&self) -> u16 {
        self.modbus_type.words()
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    pub fn channel_id(&self) -> Option<&str> {
        match &self.kind {
            RecordKind::Channel { channel_id } => Some(channel_id),
            _ => None,
        }
    }

    /// 记录自身携带的值；通道记录需要外部提供
    pub fn static_value(&self) -> Option<Value> {
        match &self.kind {
            RecordKind::Channel { .. } | RecordKind::Reserved => None,
            RecordKind::Constant(value) => Some(value.clone()),
            RecordKind::Hash(text) => Some(Value::I64(i64::from(uint16_hash(text)))),
            RecordKind::BlockLength(length) => Some(Value::I64(i64::from(*length))),
            RecordKind::Text(text) => Some(Value::String(text.clone())),
        }
    }

    /// 编码记录；只有通道记录使用 `channel_value`
    pub fn to_byte_array(&self, channel_value: Option<&Value>) -> Vec<u8> {
        match &self.kind {
            RecordKind::Channel { .. } => self.modbus_type.to_byte_array(channel_value),
            RecordKind::Reserved => self.modbus_type.to_byte_array(None),
            _ => self.modbus_type.to_byte_array(self.static_value().as_ref()),
        }
    }

    /// 人类可读的取值说明，用于日志和协议导出
    pub fn value_description(&self) -> String {
        match &self.kind {
            RecordKind::Channel { .. } => match self.modbus_type {
                ModbusType::Enum16 => "enumeration".to_string(),
                ModbusType::Uint16 => "0..65535".to_string(),
                ModbusType::Uint32 => "0..4294967295".to_string(),
                ModbusType::Uint64 => "0..18446744073709551615".to_string(),
                ModbusType::Float32 | ModbusType::Float64 => "floating point".to_string(),
                ModbusType::String16 => "text, up to 32 bytes".to_string(),
            },
            RecordKind::Constant(value) => format!("constant {}", value),
            RecordKind::Reserved => "reserved".to_string(),
            RecordKind::Hash(text) => format!("0x{:04x}", uint16_hash(text)),
            RecordKind::BlockLength(length) => length.to_string(),
            RecordKind::Text(text) => format!("\"{}\"", text),
        }
    }
}

impl fmt::Display for ModbusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.name,
            self.modbus_type,
            self.value_description()
        )
    }
}
