//! 元素值 ↔ 通道值转换器
//!
//! 转换器是纯函数对（decode, encode），可组合：
//! `chain([a, b])` 解码时先 a 后 b，编码时先 b 的逆再 a 的逆，
//! 因此对可表示的 x 有 `decode(encode(x)) == x`。
//!
//! 比例因子的浮点结果不在这里舍入；收窄为整数时统一使用
//! [`domain::round_half_even`]（元素编码或整数通道收敛时）。

use crate::error::DecodeError;
use domain::Value;
use std::fmt;
use std::sync::Arc;

type ConvertFn = Arc<dyn Fn(Value) -> Result<Value, DecodeError> + Send + Sync>;

#[derive(Clone)]
enum Step {
    /// value * 10^factor
    ScaleFactor(i8),
    /// value + offset
    Offset(f64),
    /// 取反
    Invert,
    /// 负值归零（仅解码方向）
    KeepPositive,
    /// 条件归零（仅解码方向），例如相位不存在
    ZeroIf(bool),
    Custom { decode: ConvertFn, encode: ConvertFn },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ScaleFactor(factor) => write!(f, "ScaleFactor({})", factor),
            Step::Offset(offset) => write!(f, "Offset({})", offset),
            Step::Invert => write!(f, "Invert"),
            Step::KeepPositive => write!(f, "KeepPositive"),
            Step::ZeroIf(condition) => write!(f, "ZeroIf({})", condition),
            Step::Custom { .. } => write!(f, "Custom"),
        }
    }
}

/// 元素到通道的转换器（默认直通）。
#[derive(Debug, Clone, Default)]
pub struct Converter {
    steps: Vec<Step>,
}

impl Converter {
    /// 直通，不做任何转换
    pub fn direct() -> Self {
        Self::default()
    }

    /// 比例因子：解码 `value * 10^factor`，编码取逆
    pub fn scale_factor(factor: i8) -> Self {
        Self::single(Step::ScaleFactor(factor))
    }

    pub fn offset(offset: f64) -> Self {
        Self::single(Step::Offset(offset))
    }

    pub fn invert() -> Self {
        Self::single(Step::Invert)
    }

    pub fn keep_positive() -> Self {
        Self::single(Step::KeepPositive)
    }

    /// `condition` 为 true 时解码结果恒为 0（构建期确定，例如单相表的缺失相）
    pub fn zero_if(condition: bool) -> Self {
        Self::single(Step::ZeroIf(condition))
    }

    pub fn custom<D, E>(decode: D, encode: E) -> Self
    where
        D: Fn(Value) -> Result<Value, DecodeError> + Send + Sync + 'static,
        E: Fn(Value) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Self::single(Step::Custom {
            decode: Arc::new(decode),
            encode: Arc::new(encode),
        })
    }

    /// 按声明顺序组合
    pub fn chain(converters: impl IntoIterator<Item = Converter>) -> Self {
        Self {
            steps: converters
                .into_iter()
                .flat_map(|converter| converter.steps)
                .collect(),
        }
    }

    /// `self` 之后再应用 `next`
    pub fn then(mut self, next: Converter) -> Self {
        self.steps.extend(next.steps);
        self
    }

    pub fn is_direct(&self) -> bool {
        self.steps.is_empty()
    }

    /// 元素值 → 通道值
    pub fn decode(&self, value: Value) -> Result<Value, DecodeError> {
        self.steps
            .iter()
            .try_fold(value, |value, step| decode_step(step, value))
    }

    /// 通道值 → 元素值
    pub fn encode(&self, value: Value) -> Result<Value, DecodeError> {
        self.steps
            .iter()
            .rev()
            .try_fold(value, |value, step| encode_step(step, value))
    }

    fn single(step: Step) -> Self {
        Self { steps: vec![step] }
    }
}

fn decode_step(step: &Step, value: Value) -> Result<Value, DecodeError> {
    match step {
        Step::ScaleFactor(factor) => scale(value, i32::from(*factor)),
        Step::Offset(offset) => add_offset(value, *offset),
        Step::Invert => invert(value),
        Step::KeepPositive => match value {
            Value::I64(v) if v < 0 => Ok(Value::I64(0)),
            Value::F64(v) if v < 0.0 => Ok(Value::F64(0.0)),
            Value::I64(_) | Value::F64(_) => Ok(value),
            other => Err(mismatch(other)),
        },
        Step::ZeroIf(false) => Ok(value),
        Step::ZeroIf(true) => match value {
            Value::I64(_) => Ok(Value::I64(0)),
            Value::F64(_) => Ok(Value::F64(0.0)),
            Value::Bool(_) => Ok(Value::Bool(false)),
            other => Err(mismatch(other)),
        },
        Step::Custom { decode, .. } => decode(value),
    }
}

fn encode_step(step: &Step, value: Value) -> Result<Value, DecodeError> {
    match step {
        Step::ScaleFactor(factor) => scale(value, -i32::from(*factor)),
        Step::Offset(offset) => add_offset(value, -offset),
        Step::Invert => invert(value),
        Step::KeepPositive | Step::ZeroIf(_) => Ok(value),
        Step::Custom { encode, .. } => encode(value),
    }
}

fn scale(value: Value, exponent: i32) -> Result<Value, DecodeError> {
    if exponent == 0 {
        return Ok(value);
    }
    match value {
        Value::I64(v) if exponent > 0 => {
            let multiplied = 10i64
                .checked_pow(exponent as u32)
                .and_then(|factor| v.checked_mul(factor));
            Ok(match multiplied {
                Some(result) => Value::I64(result),
                None => Value::F64(v as f64 * pow10(exponent)),
            })
        }
        // 负指数用除法：整数除以 10^n 的结果是最接近真实值的 f64
        Value::I64(v) => Ok(Value::F64(v as f64 / pow10(-exponent))),
        Value::F64(v) if exponent > 0 => Ok(Value::F64(v * pow10(exponent))),
        Value::F64(v) => Ok(Value::F64(v / pow10(-exponent))),
        other => Err(mismatch(other)),
    }
}

fn pow10(exponent: i32) -> f64 {
    10f64.powi(exponent)
}

fn add_offset(value: Value, offset: f64) -> Result<Value, DecodeError> {
    match value {
        Value::I64(v) if offset.fract() == 0.0 && offset.abs() < 9.0e15 => {
            Ok(match v.checked_add(offset as i64) {
                Some(result) => Value::I64(result),
                None => Value::F64(v as f64 + offset),
            })
        }
        Value::I64(v) => Ok(Value::F64(v as f64 + offset)),
        Value::F64(v) => Ok(Value::F64(v + offset)),
        other => Err(mismatch(other)),
    }
}

fn invert(value: Value) -> Result<Value, DecodeError> {
    match value {
        Value::I64(v) => Ok(match v.checked_neg() {
            Some(result) => Value::I64(result),
            None => Value::F64(-(v as f64)),
        }),
        Value::F64(v) => Ok(Value::F64(-v)),
        Value::Bool(v) => Ok(Value::Bool(!v)),
        other => Err(mismatch(other)),
    }
}

fn mismatch(value: Value) -> DecodeError {
    DecodeError::TypeMismatch {
        value: value.to_string(),
        element: "converter",
    }
}
