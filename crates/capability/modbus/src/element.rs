//! 寄存器元素
//!
//! 一个元素描述一段连续寄存器，并在寄存器字与类型化值之间转换。
//! 元素在驱动声明时构建，此后不可变；解码结果写入通道，不保存在元素中。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let elements = vec![
//!     Element::signed_doubleword(100).channel("ActivePower"),
//!     Element::dummy(102, 103),
//!     Element::unsigned_word(104)
//!         .channel("Voltage")
//!         .converter(Converter::scale_factor(-1)),
//!     Element::string_word(105, 8).channel("SerialNumber"),
//! ];
//! ```

use crate::converter::Converter;
use crate::error::DecodeError;
use crate::types::WordOrder;
use domain::{Value, round_half_even};
use serde::{Deserialize, Serialize};

/// 元素类型（JSON 映射中的 `type` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    UnsignedWord,
    SignedWord,
    UnsignedDoubleword,
    SignedDoubleword,
    UnsignedQuadrupleword,
    SignedQuadrupleword,
    FloatDoubleword,
    FloatQuadrupleword,
    StringWord,
    Dummy,
}

/// 元素种类及其宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    UnsignedWord,
    SignedWord,
    UnsignedDoubleword,
    SignedDoubleword,
    UnsignedQuadrupleword,
    SignedQuadrupleword,
    /// IEEE-754 单精度
    FloatDoubleword,
    /// IEEE-754 双精度
    FloatQuadrupleword,
    /// 定长字符串，`length` 个寄存器（2 字节/寄存器）
    StringWord { length: u16 },
    /// 占位：保留地址空间，不产生通道值
    Dummy { length: u16 },
}

impl ElementKind {
    /// 占用的寄存器数
    pub fn registers(self) -> u16 {
        match self {
            ElementKind::UnsignedWord | ElementKind::SignedWord => 1,
            ElementKind::UnsignedDoubleword
            | ElementKind::SignedDoubleword
            | ElementKind::FloatDoubleword => 2,
            ElementKind::UnsignedQuadrupleword
            | ElementKind::SignedQuadrupleword
            | ElementKind::FloatQuadrupleword => 4,
            ElementKind::StringWord { length } | ElementKind::Dummy { length } => length,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::UnsignedWord => "UnsignedWord",
            ElementKind::SignedWord => "SignedWord",
            ElementKind::UnsignedDoubleword => "UnsignedDoubleword",
            ElementKind::SignedDoubleword => "SignedDoubleword",
            ElementKind::UnsignedQuadrupleword => "UnsignedQuadrupleword",
            ElementKind::SignedQuadrupleword => "SignedQuadrupleword",
            ElementKind::FloatDoubleword => "FloatDoubleword",
            ElementKind::FloatQuadrupleword => "FloatQuadrupleword",
            ElementKind::StringWord { .. } => "StringWord",
            ElementKind::Dummy { .. } => "DummyRegister",
        }
    }
}

/// 寄存器元素
#[derive(Debug, Clone)]
pub struct Element {
    start_address: u16,
    kind: ElementKind,
    word_order: WordOrder,
    channel_id: Option<String>,
    converter: Converter,
}

impl Element {
    pub fn new(start_address: u16, kind: ElementKind) -> Self {
        Self {
            start_address,
            kind,
            word_order: WordOrder::default(),
            channel_id: None,
            converter: Converter::direct(),
        }
    }

    pub fn unsigned_word(address: u16) -> Self {
        Self::new(address, ElementKind::UnsignedWord)
    }

    pub fn signed_word(address: u16) -> Self {
        Self::new(address, ElementKind::SignedWord)
    }

    pub fn unsigned_doubleword(address: u16) -> Self {
        Self::new(address, ElementKind::UnsignedDoubleword)
    }

    pub fn signed_doubleword(address: u16) -> Self {
        Self::new(address, ElementKind::SignedDoubleword)
    }

    pub fn unsigned_quadrupleword(address: u16) -> Self {
        Self::new(address, ElementKind::UnsignedQuadrupleword)
    }

    pub fn signed_quadrupleword(address: u16) -> Self {
        Self::new(address, ElementKind::SignedQuadrupleword)
    }

    pub fn float_doubleword(address: u16) -> Self {
        Self::new(address, ElementKind::FloatDoubleword)
    }

    pub fn float_quadrupleword(address: u16) -> Self {
        Self::new(address, ElementKind::FloatQuadrupleword)
    }

    pub fn string_word(address: u16, length: u16) -> Self {
        Self::new(address, ElementKind::StringWord { length })
    }

    /// 占位寄存器 `[from, to]`（闭区间）；`to < from` 时长度为 0，任务构建时被拒绝
    pub fn dummy(from: u16, to: u16) -> Self {
        let length = if to >= from { to - from + 1 } else { 0 };
        Self::new(from, ElementKind::Dummy { length })
    }

    pub fn word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }

    /// 映射到所属组件的通道 ID
    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn converter(mut self, converter: Converter) -> Self {
        self.converter = converter;
        self
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    /// 寄存器数
    pub fn len(&self) -> u16 {
        self.kind.registers()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 结束地址（不含），用 u32 避免 0xFFFF 处溢出
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.len())
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.kind, ElementKind::Dummy { .. })
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn get_converter(&self) -> &Converter {
        &self.converter
    }

    /// 寄存器字 → 原始值；占位元素返回 None
    pub fn decode(&self, words: &[u16]) -> Result<Option<Value>, DecodeError> {
        let expected = usize::from(self.len());
        if words.len() != expected {
            return Err(DecodeError::WrongLength {
                expected,
                actual: words.len(),
            });
        }

        let value = match self.kind {
            ElementKind::UnsignedWord => Value::I64(i64::from(words[0])),
            ElementKind::SignedWord => Value::I64(i64::from(words[0] as i16)),
            ElementKind::UnsignedDoubleword => {
                Value::I64(i64::from(self.combine(words) as u32))
            }
            ElementKind::SignedDoubleword => {
                Value::I64(i64::from(self.combine(words) as u32 as i32))
            }
            ElementKind::UnsignedQuadrupleword => {
                // 通道整数最宽为 i64，超出部分无法精确表示
                let raw = self.combine(words);
                let value = i64::try_from(raw).map_err(|_| DecodeError::OutOfRange {
                    value: raw.to_string(),
                    element: self.kind.name(),
                })?;
                Value::I64(value)
            }
            ElementKind::SignedQuadrupleword => Value::I64(self.combine(words) as i64),
            ElementKind::FloatDoubleword => {
                Value::F64(f64::from(f32::from_bits(self.combine(words) as u32)))
            }
            ElementKind::FloatQuadrupleword => Value::F64(f64::from_bits(self.combine(words))),
            ElementKind::StringWord { .. } => Value::String(decode_string(words)),
            ElementKind::Dummy { .. } => return Ok(None),
        };
        Ok(Some(value))
    }

    /// 原始值 → 寄存器字，值必须落在元素声明的宽度内
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>, DecodeError> {
        let name = self.kind.name();
        let words = match self.kind {
            ElementKind::UnsignedWord => {
                let v = integer_in_range(value, 0, i128::from(u16::MAX), name)?;
                vec![v as u16]
            }
            ElementKind::SignedWord => {
                let v = integer_in_range(value, i128::from(i16::MIN), i128::from(i16::MAX), name)?;
                vec![v as i16 as u16]
            }
            ElementKind::UnsignedDoubleword => {
                let v = integer_in_range(value, 0, i128::from(u32::MAX), name)?;
                self.split(u64::from(v as u32), 2)
            }
            ElementKind::SignedDoubleword => {
                let v = integer_in_range(value, i128::from(i32::MIN), i128::from(i32::MAX), name)?;
                self.split(u64::from(v as i32 as u32), 2)
            }
            ElementKind::UnsignedQuadrupleword => {
                let v = integer_in_range(value, 0, i128::from(i64::MAX), name)?;
                self.split(v as u64, 4)
            }
            ElementKind::SignedQuadrupleword => {
                let v = integer_in_range(value, i128::from(i64::MIN), i128::from(i64::MAX), name)?;
                self.split(v as i64 as u64, 4)
            }
            ElementKind::FloatDoubleword => {
                let v = float_value(value, name)?;
                let narrowed = v as f32;
                if v.is_finite() && narrowed.is_infinite() {
                    return Err(DecodeError::OutOfRange {
                        value: value.to_string(),
                        element: name,
                    });
                }
                self.split(u64::from(narrowed.to_bits()), 2)
            }
            ElementKind::FloatQuadrupleword => {
                let v = float_value(value, name)?;
                self.split(v.to_bits(), 4)
            }
            ElementKind::StringWord { length } => {
                let text = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                encode_string(&text, length)
            }
            ElementKind::Dummy { .. } => return Err(DecodeError::NoValue),
        };
        Ok(words)
    }

    /// 占位字（全 0），写任务中空出未暂存的区域时使用
    pub fn filler(&self) -> Vec<u16> {
        vec![0; usize::from(self.len())]
    }

    /// 寄存器字 → 通道值（解码后应用转换器）
    pub fn decode_to_channel(&self, words: &[u16]) -> Result<Option<Value>, DecodeError> {
        match self.decode(words)? {
            Some(raw) => self.converter.decode(raw).map(Some),
            None => Ok(None),
        }
    }

    /// 通道值 → 寄存器字（先逆转换再编码）
    pub fn encode_from_channel(&self, value: &Value) -> Result<Vec<u16>, DecodeError> {
        if self.is_dummy() {
            return Err(DecodeError::NoValue);
        }
        let raw = self.converter.encode(value.clone())?;
        self.encode(&raw)
    }

    /// 按字序拼接为 u64（高位在前的数值）
    fn combine(&self, words: &[u16]) -> u64 {
        let fold = |acc: u64, word: &u16| (acc << 16) | u64::from(*word);
        match self.word_order {
            WordOrder::MswLsw => words.iter().fold(0, fold),
            WordOrder::LswMsw => words.iter().rev().fold(0, fold),
        }
    }

    /// 按字序拆分为 `count` 个寄存器
    fn split(&self, raw: u64, count: usize) -> Vec<u16> {
        let mut words: Vec<u16> = (0..count)
            .rev()
            .map(|index| (raw >> (16 * index)) as u16)
            .collect();
        if self.word_order == WordOrder::LswMsw {
            words.reverse();
        }
        words
    }
}

fn integer_in_range(
    value: &Value,
    min: i128,
    max: i128,
    element: &'static str,
) -> Result<i128, DecodeError> {
    let integer = match value {
        Value::I64(v) => i128::from(*v),
        Value::Bool(v) => i128::from(*v),
        Value::F64(v) if v.is_finite() => {
            let rounded = round_half_even(*v);
            // 元素上界之外的浮点值直接判越界
            if rounded < min as f64 || rounded > max as f64 {
                return Err(DecodeError::OutOfRange {
                    value: value.to_string(),
                    element,
                });
            }
            rounded as i128
        }
        Value::String(text) => match text.trim().parse::<i128>() {
            Ok(v) => v,
            Err(_) => {
                return Err(DecodeError::TypeMismatch {
                    value: value.to_string(),
                    element,
                });
            }
        },
        Value::F64(_) => {
            return Err(DecodeError::OutOfRange {
                value: value.to_string(),
                element,
            });
        }
    };
    if integer < min || integer > max {
        return Err(DecodeError::OutOfRange {
            value: value.to_string(),
            element,
        });
    }
    Ok(integer)
}

fn float_value(value: &Value, element: &'static str) -> Result<f64, DecodeError> {
    match value {
        Value::String(_) => Err(DecodeError::TypeMismatch {
            value: value.to_string(),
            element,
        }),
        other => other.as_f64().ok_or_else(|| DecodeError::TypeMismatch {
            value: other.to_string(),
            element,
        }),
    }
}

/// 寄存器字 → 字节（每个寄存器高字节在前）
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

/// 字节 → 寄存器字；奇数长度时末尾补 0
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|chunk| {
            let high = chunk[0];
            let low = chunk.get(1).copied().unwrap_or(0);
            u16::from_be_bytes([high, low])
        })
        .collect()
}

fn decode_string(words: &[u16]) -> String {
    let bytes = words_to_bytes(words);
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// 编码为恰好 `length * 2` 字节：超长按字符边界截断，不足补 0
fn encode_string(text: &str, length: u16) -> Vec<u16> {
    let capacity = usize::from(length) * 2;
    let mut end = text.len().min(capacity);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut bytes = text.as_bytes()[..end].to_vec();
    bytes.resize(capacity, 0);
    bytes_to_words(&bytes)
}
