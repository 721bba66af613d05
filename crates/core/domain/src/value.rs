use serde::{Deserialize, Serialize};
use std::fmt;

/// 通道声明的数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    /// 16 位有符号整数
    Short,
    /// 32 位有符号整数
    Integer,
    /// 64 位有符号整数
    Long,
    /// 32 位浮点数
    Float,
    /// 64 位浮点数
    Double,
    String,
}

/// 通道值。
///
/// 寄存器元素解码后得到原始值，经转换器换算后写入通道；
/// 写方向则相反。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

/// 值转换错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("cannot convert {value} to {target:?}")]
    TypeMismatch { value: String, target: ValueType },
    #[error("value {value} out of range for {target:?}")]
    OutOfRange { value: String, target: ValueType },
}

/// 将小数收敛为整数：恰好处于 .5 时取偶数（银行家舍入）。
///
/// 所有“浮点 → 整数”的收窄都经过这里，保证舍入行为只有一个定义。
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

impl Value {
    /// 数值型返回 f64；字符串尝试解析。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::String(v) => v.trim().parse::<f64>().ok(),
        }
    }

    /// 数值型返回 i64；浮点值按 [`round_half_even`] 舍入，超出 i64 或非有限值返回 None。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::F64(v) => f64_to_i64(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::String(v) => {
                let trimmed = v.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(f64_to_i64))
            }
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::I64(_) | Value::F64(_))
    }

    /// 按通道声明类型收敛值。
    pub fn coerce(self, target: ValueType) -> Result<Value, ValueError> {
        let mismatch = |value: &Value| ValueError::TypeMismatch {
            value: value.to_string(),
            target,
        };
        match target {
            ValueType::Bool => match &self {
                Value::Bool(_) => Ok(self),
                Value::I64(v) => Ok(Value::Bool(*v != 0)),
                Value::F64(v) => Ok(Value::Bool(*v != 0.0)),
                Value::String(v) => match v.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "off" => Ok(Value::Bool(false)),
                    _ => Err(mismatch(&self)),
                },
            },
            ValueType::Short | ValueType::Integer | ValueType::Long => {
                let value = self.as_i64().ok_or_else(|| mismatch(&self))?;
                let (min, max) = match target {
                    ValueType::Short => (i64::from(i16::MIN), i64::from(i16::MAX)),
                    ValueType::Integer => (i64::from(i32::MIN), i64::from(i32::MAX)),
                    _ => (i64::MIN, i64::MAX),
                };
                if value < min || value > max {
                    return Err(ValueError::OutOfRange {
                        value: value.to_string(),
                        target,
                    });
                }
                Ok(Value::I64(value))
            }
            ValueType::Float => {
                let value = self.as_f64().ok_or_else(|| mismatch(&self))?;
                Ok(Value::F64(f64::from(value as f32)))
            }
            ValueType::Double => {
                let value = self.as_f64().ok_or_else(|| mismatch(&self))?;
                Ok(Value::F64(value))
            }
            ValueType::String => Ok(match self {
                Value::String(_) => self,
                other => Value::String(other.to_string()),
            }),
        }
    }
}

fn f64_to_i64(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = round_half_even(value);
    // i64::MAX as f64 == 2^63，严格小于才能安全转换
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I64(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
