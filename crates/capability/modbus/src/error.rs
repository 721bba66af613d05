//! Modbus 桥错误类型定义
//!
//! 三类错误的作用域各不相同：
//! - [`TransportError`]：任务级，记录日志后通道保留上次值，下个周期重试
//! - [`DecodeError`]：元素级，同一任务内的其他元素照常解码
//! - [`ConfigurationError`]：构建期致命错误（驱动声明有误），桥不会带着它运行

use domain::ChannelError;

/// 传输错误（连接、超时、异常应答、报文异常）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO / 协议栈错误
    #[error("io error: {0}")]
    Io(String),

    /// 从站返回异常码
    #[error("modbus exception: {0}")]
    Exception(String),

    /// 超时错误
    #[error("timeout after {0} ms")]
    Timeout(u64),

    /// 应答与请求不符
    #[error("malformed response: {0}")]
    Malformed(String),

    /// 传输层不支持该功能码
    #[error("unsupported function code: {0}")]
    Unsupported(u8),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// 元素编解码错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// 寄存器数量与元素宽度不符
    #[error("expected {expected} registers, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// 值超出元素声明宽度
    #[error("value {value} out of range for {element}")]
    OutOfRange { value: String, element: &'static str },

    /// 值类型与元素不匹配
    #[error("cannot convert {value} for {element}")]
    TypeMismatch { value: String, element: &'static str },

    /// 占位元素不承载值
    #[error("dummy element carries no value")]
    NoValue,

    /// 自定义转换器失败
    #[error("converter error: {0}")]
    Converter(String),

    /// 写入通道失败（类型收敛等）
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// 构建期配置错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("task at {start_address} has no elements")]
    EmptyTask { start_address: u16 },

    /// 元素之间存在未用占位元素填充的空洞
    #[error("gap between register {expected} and {found}")]
    Gap { expected: u32, found: u16 },

    #[error("element at {address} overlaps previous element ending at {previous_end}")]
    Overlap { address: u16, previous_end: u32 },

    #[error("invalid register count {count} at {address}")]
    InvalidWordCount { address: u16, count: u32 },

    #[error("task at {start_address} spans {length} registers (max {max})")]
    TooManyRegisters {
        start_address: u16,
        length: u32,
        max: u16,
    },

    #[error("task at {start_address} with {length} registers exceeds the address space")]
    AddressOverflow { start_address: u16, length: u32 },

    #[error("channel mapped twice: {0}")]
    DuplicateChannel(String),

    #[error("channel not registered: {0}")]
    UnknownChannel(String),

    #[error("component already attached: {0}")]
    DuplicateComponent(String),

    #[error("config parse error: {0}")]
    Parse(String),
}

/// 桥对外的统一错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModbusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// 没有写任务元素映射到该通道
    #[error("no write element for channel: {0}")]
    NoWriteElement(String),
}
