//! JSON 寄存器映射
//!
//! 设备驱动的声明式替代：一个文件描述若干桥，每个桥挂若干设备，
//! 每个设备声明自己的通道和读写任务。
//!
//! ```json
//! {
//!   "bridges": [{
//!     "id": "modbus0",
//!     "host": "192.168.1.50",
//!     "devices": [{
//!       "component_id": "meter0",
//!       "unit_id": 1,
//!       "channels": [{ "id": "ActivePower", "value_type": "integer", "unit": "W" }],
//!       "read_tasks": [{
//!         "function_code": 3,
//!         "start_address": 100,
//!         "priority": "high",
//!         "elements": [{ "type": "signed_doubleword", "address": 100, "channel": "ActivePower" }]
//!       }]
//!     }]
//!   }]
//! }
//! ```

use crate::converter::Converter;
use crate::element::{Element, ElementType};
use crate::error::ConfigurationError;
use crate::protocol::ModbusProtocol;
use crate::task::{ReadTask, WriteTask};
use crate::tcp::TcpTransportConfig;
use crate::types::{Priority, ReadFunction, WordOrder, WriteFunction};
use domain::ChannelDoc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMap {
    pub bridges: Vec<BridgeDefinition>,
}

impl RegisterMap {
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let map: RegisterMap =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        map.validate()?;
        Ok(map)
    }

    /// 桥 ID 与组件 ID 在整个文件内唯一
    fn validate(&self) -> Result<(), ConfigurationError> {
        let mut bridges = HashSet::new();
        let mut components = HashSet::new();
        for bridge in &self.bridges {
            if !bridges.insert(bridge.id.as_str()) {
                return Err(ConfigurationError::Parse(format!(
                    "duplicate bridge id: {}",
                    bridge.id
                )));
            }
            for device in &bridge.devices {
                if !components.insert(device.component_id.as_str()) {
                    return Err(ConfigurationError::DuplicateComponent(
                        device.component_id.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDefinition {
    pub id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 覆盖全局连接超时
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// 覆盖全局请求超时
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// 覆盖全局 LOW 预算
    #[serde(default)]
    pub low_priority_budget: Option<usize>,
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

fn default_port() -> u16 {
    502
}

impl BridgeDefinition {
    pub fn transport_config(&self, default_connect_timeout_ms: u64) -> TcpTransportConfig {
        TcpTransportConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or(default_connect_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub component_id: String,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub channels: Vec<ChannelDoc>,
    #[serde(default)]
    pub read_tasks: Vec<ReadTaskDefinition>,
    #[serde(default)]
    pub write_tasks: Vec<WriteTaskDefinition>,
}

fn default_unit_id() -> u8 {
    1
}

impl DeviceDefinition {
    /// 构建设备协议；任务布局错误在这里暴露
    pub fn build_protocol(&self) -> Result<ModbusProtocol, ConfigurationError> {
        let mut protocol = ModbusProtocol::new(self.component_id.clone(), self.unit_id);
        for task in &self.read_tasks {
            protocol.add_read_task(task.build()?)?;
        }
        for task in &self.write_tasks {
            protocol.add_write_task(task.build()?)?;
        }

        let declared: HashSet<&str> = self.channels.iter().map(|doc| doc.id.as_str()).collect();
        if let Some(missing) = protocol
            .channel_addresses()
            .into_iter()
            .find(|address| !declared.contains(address.channel_id.as_str()))
        {
            return Err(ConfigurationError::UnknownChannel(missing.to_string()));
        }
        Ok(protocol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTaskDefinition {
    #[serde(default)]
    pub function_code: ReadFunction,
    pub start_address: u16,
    #[serde(default)]
    pub priority: Priority,
    pub elements: Vec<ElementDefinition>,
}

impl ReadTaskDefinition {
    pub fn build(&self) -> Result<ReadTask, ConfigurationError> {
        let elements = self
            .elements
            .iter()
            .map(ElementDefinition::build)
            .collect::<Result<Vec<_>, _>>()?;
        ReadTask::new(self.function_code, self.start_address, self.priority, elements)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteTaskDefinition {
    #[serde(default)]
    pub function_code: WriteFunction,
    pub start_address: u16,
    pub elements: Vec<ElementDefinition>,
}

impl WriteTaskDefinition {
    pub fn build(&self) -> Result<WriteTask, ConfigurationError> {
        let elements = self
            .elements
            .iter()
            .map(ElementDefinition::build)
            .collect::<Result<Vec<_>, _>>()?;
        WriteTask::new(self.function_code, self.start_address, elements)
    }
}

/// 元素声明
///
/// 转换器按固定顺序组合：比例因子 → 偏移 → 取反 → 负值归零。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDefinition {
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub address: u16,
    /// string_word 的寄存器数，dummy 的寄存器数
    #[serde(default)]
    pub length: Option<u16>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub word_order: WordOrder,
    #[serde(default)]
    pub scale_factor: Option<i8>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub keep_positive: bool,
}

impl ElementDefinition {
    pub fn build(&self) -> Result<Element, ConfigurationError> {
        let address = self.address;
        let element = match self.element_type {
            ElementType::UnsignedWord => Element::unsigned_word(address),
            ElementType::SignedWord => Element::signed_word(address),
            ElementType::UnsignedDoubleword => Element::unsigned_doubleword(address),
            ElementType::SignedDoubleword => Element::signed_doubleword(address),
            ElementType::UnsignedQuadrupleword => Element::unsigned_quadrupleword(address),
            ElementType::SignedQuadrupleword => Element::signed_quadrupleword(address),
            ElementType::FloatDoubleword => Element::float_doubleword(address),
            ElementType::FloatQuadrupleword => Element::float_quadrupleword(address),
            ElementType::StringWord => Element::string_word(address, self.required_length()?),
            ElementType::Dummy => {
                let length = self.required_length()?;
                let to = u32::from(address) + u32::from(length) - 1;
                let to = u16::try_from(to).map_err(|_| ConfigurationError::AddressOverflow {
                    start_address: address,
                    length: u32::from(length),
                })?;
                Element::dummy(address, to)
            }
        };

        if element.is_dummy() && self.channel.is_some() {
            return Err(ConfigurationError::Parse(format!(
                "dummy element at {} cannot map a channel",
                address
            )));
        }

        let mut element = element.word_order(self.word_order).converter(self.converter());
        if let Some(channel) = &self.channel {
            element = element.channel(channel.clone());
        }
        Ok(element)
    }

    fn required_length(&self) -> Result<u16, ConfigurationError> {
        match self.length {
            Some(length) if length > 0 => Ok(length),
            _ => Err(ConfigurationError::InvalidWordCount {
                address: self.address,
                count: u32::from(self.length.unwrap_or(0)),
            }),
        }
    }

    fn converter(&self) -> Converter {
        let mut converter = Converter::direct();
        if let Some(factor) = self.scale_factor {
            converter = converter.then(Converter::scale_factor(factor));
        }
        if let Some(offset) = self.offset {
            converter = converter.then(Converter::offset(offset));
        }
        if self.invert {
            converter = converter.then(Converter::invert());
        }
        if self.keep_positive {
            converter = converter.then(Converter::keep_positive());
        }
        converter
    }
}
