//! 通道模型
//!
//! 通道是组件对外暴露的类型化值槽，以稳定的字符串地址 `组件ID/通道ID` 标识
//! （例如 `meter0/ActivePower`）。元数据（类型、读写权限、单位、说明）登记在
//! [`ChannelRegistry`] 中，协议层只做两件事：
//! - 读方向：写入解码后的当前值
//! - 写方向：取出应用逻辑暂存的“下一个写入值”

use crate::value::{Value, ValueError, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

/// 通道读写权限。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// 通道元数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDoc {
    pub id: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub access: AccessMode,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ChannelDoc {
    pub fn new(id: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            value_type,
            access: AccessMode::ReadOnly,
            unit: None,
            text: None,
        }
    }

    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// 通道地址：`组件ID/通道ID`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelAddress {
    pub component_id: String,
    pub channel_id: String,
}

impl ChannelAddress {
    pub fn new(component_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_id, self.channel_id)
    }
}

impl FromStr for ChannelAddress {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((component, channel)) if !component.is_empty() && !channel.is_empty() => {
                Ok(Self::new(component, channel))
            }
            _ => Err(ChannelError::InvalidAddress(s.to_string())),
        }
    }
}

/// 通道访问错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid channel address: {0}")]
    InvalidAddress(String),
    #[error("channel not found: {0}")]
    NotFound(String),
    #[error("channel already registered: {0}")]
    Duplicate(String),
    #[error("channel is read-only: {0}")]
    NotWritable(String),
    #[error("channel {address}: {source}")]
    Value {
        address: String,
        #[source]
        source: ValueError,
    },
    #[error("lock failed")]
    Lock,
}

#[derive(Debug, Clone)]
struct ChannelState {
    doc: ChannelDoc,
    value: Option<Value>,
    next_write_value: Option<Value>,
}

/// 通道登记表（进程内共享，按地址查找）。
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelAddress, ChannelState>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个组件的全部通道；任一地址重复则整体失败。
    pub fn register(
        &self,
        component_id: &str,
        docs: impl IntoIterator<Item = ChannelDoc>,
    ) -> Result<(), ChannelError> {
        let docs: Vec<ChannelDoc> = docs.into_iter().collect();
        let mut channels = self.channels.write().map_err(|_| ChannelError::Lock)?;
        for doc in &docs {
            let address = ChannelAddress::new(component_id, doc.id.clone());
            if channels.contains_key(&address) {
                return Err(ChannelError::Duplicate(address.to_string()));
            }
        }
        for doc in docs {
            let address = ChannelAddress::new(component_id, doc.id.clone());
            channels.insert(
                address,
                ChannelState {
                    doc,
                    value: None,
                    next_write_value: None,
                },
            );
        }
        Ok(())
    }

    pub fn contains(&self, address: &ChannelAddress) -> bool {
        self.channels
            .read()
            .map(|channels| channels.contains_key(address))
            .unwrap_or(false)
    }

    pub fn doc(&self, address: &ChannelAddress) -> Option<ChannelDoc> {
        let channels = self.channels.read().ok()?;
        channels.get(address).map(|state| state.doc.clone())
    }

    /// 当前值（未登记或尚未读到时为 None）。
    pub fn value(&self, address: &ChannelAddress) -> Option<Value> {
        let channels = self.channels.read().ok()?;
        channels.get(address).and_then(|state| state.value.clone())
    }

    /// 写入当前值，按通道类型收敛；`None` 表示值未知。
    pub fn set_value(
        &self,
        address: &ChannelAddress,
        value: Option<Value>,
    ) -> Result<(), ChannelError> {
        let mut channels = self.channels.write().map_err(|_| ChannelError::Lock)?;
        let state = channels
            .get_mut(address)
            .ok_or_else(|| ChannelError::NotFound(address.to_string()))?;
        state.value = match value {
            Some(value) => Some(coerce(address, value, state.doc.value_type)?),
            None => None,
        };
        Ok(())
    }

    /// 暂存下一个写入值（单槽，后写覆盖先写）。
    pub fn set_next_write_value(
        &self,
        address: &ChannelAddress,
        value: Value,
    ) -> Result<(), ChannelError> {
        let mut channels = self.channels.write().map_err(|_| ChannelError::Lock)?;
        let state = channels
            .get_mut(address)
            .ok_or_else(|| ChannelError::NotFound(address.to_string()))?;
        if !state.doc.access.is_writable() {
            return Err(ChannelError::NotWritable(address.to_string()));
        }
        state.next_write_value = Some(coerce(address, value, state.doc.value_type)?);
        Ok(())
    }

    /// 批量暂存写入值；先全部校验并收敛，任一失败则一个也不暂存。
    pub fn set_next_write_values(
        &self,
        writes: impl IntoIterator<Item = (ChannelAddress, Value)>,
    ) -> Result<usize, ChannelError> {
        let mut channels = self.channels.write().map_err(|_| ChannelError::Lock)?;
        let mut staged = Vec::new();
        for (address, value) in writes {
            let state = channels
                .get(&address)
                .ok_or_else(|| ChannelError::NotFound(address.to_string()))?;
            if !state.doc.access.is_writable() {
                return Err(ChannelError::NotWritable(address.to_string()));
            }
            let value = coerce(&address, value, state.doc.value_type)?;
            staged.push((address, value));
        }
        let count = staged.len();
        for (address, value) in staged {
            if let Some(state) = channels.get_mut(&address) {
                state.next_write_value = Some(value);
            }
        }
        Ok(count)
    }

    pub fn next_write_value(&self, address: &ChannelAddress) -> Option<Value> {
        let channels = self.channels.read().ok()?;
        channels
            .get(address)
            .and_then(|state| state.next_write_value.clone())
    }

    /// 取出并清空下一个写入值。
    pub fn take_next_write_value(&self, address: &ChannelAddress) -> Option<Value> {
        let mut channels = self.channels.write().ok()?;
        channels
            .get_mut(address)
            .and_then(|state| state.next_write_value.take())
    }

    /// 某组件全部通道的当前值快照（按通道 ID 排序）。
    pub fn snapshot(&self, component_id: &str) -> Vec<(String, Option<Value>)> {
        let Ok(channels) = self.channels.read() else {
            return Vec::new();
        };
        let mut values: Vec<(String, Option<Value>)> = channels
            .iter()
            .filter(|(address, _)| address.component_id == component_id)
            .map(|(address, state)| (address.channel_id.clone(), state.value.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

fn coerce(
    address: &ChannelAddress,
    value: Value,
    value_type: ValueType,
) -> Result<Value, ChannelError> {
    value
        .coerce(value_type)
        .map_err(|source| ChannelError::Value {
            address: address.to_string(),
            source,
        })
}
