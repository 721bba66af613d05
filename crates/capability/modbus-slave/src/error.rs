use domain::ChannelError;

/// 从站错误
///
/// 应答时：地址类错误和只读对应异常码 0x02，值错误对应 0x03，其余为 0x04。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlaveError {
    /// 地址未映射到任何记录（或写请求只覆盖记录的一部分）
    #[error("illegal data address: {0}")]
    IllegalAddress(u16),

    #[error("illegal data value: {0}")]
    IllegalValue(String),

    #[error("register {0} is read-only")]
    ReadOnly(u16),

    /// 构建映像时记录重叠或越界
    #[error("invalid process image layout: {0}")]
    Layout(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("slave map parse error: {0}")]
    Parse(String),
}
