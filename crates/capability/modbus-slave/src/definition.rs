//! JSON 从站映射
//!
//! 描述对外暴露的过程映像：元数据记录、各组件的特性表与记录。
//!
//! ```json
//! {
//!   "access": "read_write",
//!   "meta": [{ "name": "Meta", "length": 10, "records": [
//!     { "kind": "constant", "offset": 0, "name": "Version", "type": "uint16", "value": 1 }
//!   ]}],
//!   "components": [{
//!     "component_id": "ess0",
//!     "natures": [{ "name": "SymmetricEss", "length": 100, "records": [
//!       { "kind": "channel", "offset": 0, "channel": "Soc", "type": "uint16" },
//!       { "kind": "reserved", "offset": 1, "type": "uint16" },
//!       { "kind": "channel", "offset": 2, "channel": "SetActivePower", "type": "float32" }
//!     ]}]
//!   }]
//! }
//! ```

use crate::error::SlaveError;
use crate::process_image::{ModbusSlaveNatureTable, ModbusSlaveTable, ProcessImage};
use crate::record::{ModbusRecord, ModbusType};
use domain::{AccessMode, ChannelAddress, ChannelError, ChannelRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_meta_component_id() -> String {
    "_meta".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveMap {
    /// 只读映像拒绝所有写请求
    #[serde(default)]
    pub access: AccessMode,
    #[serde(default = "default_meta_component_id")]
    pub meta_component_id: String,
    #[serde(default)]
    pub meta: Vec<NatureDefinition>,
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
}

impl SlaveMap {
    pub fn from_json(json: &str) -> Result<Self, SlaveError> {
        let map: SlaveMap =
            serde_json::from_str(json).map_err(|e| SlaveError::Parse(e.to_string()))?;
        let mut seen = HashSet::new();
        for component in &map.components {
            if !seen.insert(component.component_id.as_str()) {
                return Err(SlaveError::Parse(format!(
                    "duplicate component id: {}",
                    component.component_id
                )));
            }
        }
        Ok(map)
    }

    /// 构建过程映像；通道记录引用的通道必须已登记
    pub fn build_image(&self, channels: &ChannelRegistry) -> Result<ProcessImage, SlaveError> {
        let meta = ModbusSlaveTable::new(self.meta.iter().map(NatureDefinition::build).collect());
        let mut image = ProcessImage::new(self.access, &self.meta_component_id, &meta)?;

        for component in &self.components {
            for channel_id in component.channel_ids() {
                let address = ChannelAddress::new(component.component_id.as_str(), channel_id);
                if !channels.contains(&address) {
                    return Err(ChannelError::NotFound(address.to_string()).into());
                }
            }
            image.add_component(&component.component_id, &component.build())?;
        }
        Ok(image)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub component_id: String,
    pub natures: Vec<NatureDefinition>,
}

impl ComponentDefinition {
    pub fn build(&self) -> ModbusSlaveTable {
        ModbusSlaveTable::new(self.natures.iter().map(NatureDefinition::build).collect())
    }

    fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.natures
            .iter()
            .flat_map(|nature| nature.records.iter())
            .filter_map(|record| match record {
                RecordDefinition::Channel { channel, .. } => Some(channel.as_str()),
                _ => None,
            })
    }
}

/// 特性表；`length` 包含表头两个寄存器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatureDefinition {
    pub name: String,
    pub length: u16,
    #[serde(default)]
    pub records: Vec<RecordDefinition>,
}

impl NatureDefinition {
    pub fn build(&self) -> ModbusSlaveNatureTable {
        self.records
            .iter()
            .fold(ModbusSlaveNatureTable::new(&self.name, self.length), |table, record| {
                table.record(record.build())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDefinition {
    Channel {
        offset: u16,
        channel: String,
        #[serde(rename = "type")]
        modbus_type: ModbusType,
    },
    Constant {
        offset: u16,
        name: String,
        #[serde(rename = "type")]
        modbus_type: ModbusType,
        value: ConstantValue,
    },
    Reserved {
        offset: u16,
        #[serde(rename = "type")]
        modbus_type: ModbusType,
    },
    Hash {
        offset: u16,
        text: String,
    },
    Text {
        offset: u16,
        name: String,
        text: String,
    },
}

impl RecordDefinition {
    pub fn build(&self) -> ModbusRecord {
        match self {
            RecordDefinition::Channel {
                offset,
                channel,
                modbus_type,
            } => ModbusRecord::channel(*offset, channel.as_str(), *modbus_type),
            RecordDefinition::Constant {
                offset,
                name,
                modbus_type,
                value,
            } => ModbusRecord::constant(*offset, name.as_str(), *modbus_type, value.to_value()),
            RecordDefinition::Reserved {
                offset,
                modbus_type,
            } => ModbusRecord::reserved(*offset, *modbus_type),
            RecordDefinition::Hash { offset, text } => {
                ModbusRecord::uint16_hash(*offset, text.as_str())
            }
            RecordDefinition::Text { offset, name, text } => {
                ModbusRecord::string16(*offset, name.as_str(), text.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstantValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConstantValue {
    fn to_value(&self) -> Value {
        match self {
            ConstantValue::Integer(v) => Value::I64(*v),
            ConstantValue::Float(v) => Value::F64(*v),
            ConstantValue::Text(v) => Value::String(v.clone()),
        }
    }
}
