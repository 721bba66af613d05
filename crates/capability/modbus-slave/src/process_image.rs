//! 从站过程映像
//!
//! 布局：
//!
//! ```text
//! 0                 Hash("OpenEMS")
//! 1                 元数据块：块长度 + 记录（相对 2 偏移）
//! start             组件块：String16 组件 ID（16 字）+ 块长度
//! start + 20        第一个特性表：特性哈希 + 特性长度 + 记录（相对 +2 偏移）
//! start + 20 + n    下一个特性表 ...
//! start + len       下一个组件
//! ```
//!
//! 块长度 = 20 + 各特性表长度之和；特性表长度包含表头两个寄存器。

use crate::error::SlaveError;
use crate::record::{ModbusRecord, RecordKind};
use domain::{AccessMode, ChannelAddress, ChannelRegistry, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// 映像首寄存器的标识文本
pub const IMAGE_HEADER: &str = "OpenEMS";
/// 组件头部（ID + 长度）保留的寄存器数
pub const COMPONENT_HEADER_WORDS: u16 = 20;
/// 单次读请求的最大寄存器数
pub const MAX_READ_REGISTERS: u16 = 125;

/// 一个特性（nature）的记录表
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusSlaveNatureTable {
    name: String,
    length: u16,
    records: Vec<ModbusRecord>,
}

impl ModbusSlaveNatureTable {
    pub fn new(name: impl Into<String>, length: u16) -> Self {
        Self {
            name: name.into(),
            length,
            records: Vec::new(),
        }
    }

    pub fn record(mut self, record: ModbusRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn records(&self) -> &[ModbusRecord] {
        &self.records
    }
}

/// 一个组件的全部特性表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModbusSlaveTable {
    nature_tables: Vec<ModbusSlaveNatureTable>,
}

impl ModbusSlaveTable {
    pub fn new(nature_tables: Vec<ModbusSlaveNatureTable>) -> Self {
        Self { nature_tables }
    }

    pub fn nature_tables(&self) -> &[ModbusSlaveNatureTable] {
        &self.nature_tables
    }

    pub fn length(&self) -> u32 {
        u32::from(COMPONENT_HEADER_WORDS)
            + self
                .nature_tables
                .iter()
                .map(|table| u32::from(table.length))
                .sum::<u32>()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    component_id: String,
    record: ModbusRecord,
}

/// 地址 → 记录
#[derive(Debug, Clone)]
pub struct ProcessImage {
    access: AccessMode,
    records: BTreeMap<u16, Entry>,
    components: BTreeMap<u16, String>,
    next_address: u32,
}

impl ProcessImage {
    /// 以元数据组件开始一张映像；`access` 为只读时拒绝所有写请求
    pub fn new(
        access: AccessMode,
        meta_component_id: &str,
        meta: &ModbusSlaveTable,
    ) -> Result<Self, SlaveError> {
        let mut image = Self {
            access,
            records: BTreeMap::new(),
            components: BTreeMap::new(),
            next_address: 0,
        };
        image.insert(0, "", ModbusRecord::uint16_hash(0, IMAGE_HEADER))?;

        let length = block_length(meta_component_id, meta.length())?;
        image.insert(
            1,
            meta_component_id,
            ModbusRecord::uint16_block_length(0, meta_component_id, length),
        )?;
        for table in meta.nature_tables() {
            for record in table.records() {
                image.insert(
                    2 + u32::from(record.offset()),
                    meta_component_id,
                    record.clone(),
                )?;
            }
        }
        image.components.insert(1, meta_component_id.to_string());
        image.next_address = 1 + u32::from(length);
        Ok(image)
    }

    /// 追加组件块，返回其起始地址
    pub fn add_component(
        &mut self,
        component_id: &str,
        table: &ModbusSlaveTable,
    ) -> Result<u16, SlaveError> {
        let start = self.next_address;
        let length = block_length(component_id, table.length())?;
        let start_address = address(start)?;

        let id_record = ModbusRecord::string16(0, "Component-ID", component_id);
        let id_words = u32::from(id_record.words());
        self.insert(start, component_id, id_record)?;
        self.insert(
            start + id_words,
            component_id,
            ModbusRecord::uint16_block_length(0, component_id, length),
        )?;

        let mut nature_start = start + u32::from(COMPONENT_HEADER_WORDS);
        for table in table.nature_tables() {
            self.add_nature_table(nature_start, component_id, table)?;
            nature_start += u32::from(table.length());
        }

        self.components
            .insert(start_address, component_id.to_string());
        self.next_address = start + u32::from(length);
        info!(
            target: "ems.modbus.slave",
            component_id = %component_id,
            start_address = start_address,
            length = length,
            "component added to process image"
        );
        Ok(start_address)
    }

    fn add_nature_table(
        &mut self,
        start: u32,
        component_id: &str,
        table: &ModbusSlaveNatureTable,
    ) -> Result<(), SlaveError> {
        self.insert(
            start,
            component_id,
            ModbusRecord::uint16_hash(0, table.name()),
        )?;
        self.insert(
            start + 1,
            component_id,
            ModbusRecord::uint16_block_length(0, table.name(), table.length()),
        )?;
        for record in table.records() {
            let end = 2 + u32::from(record.offset()) + u32::from(record.words());
            if end > u32::from(table.length()) {
                return Err(SlaveError::Layout(format!(
                    "record {} at offset {} exceeds nature table {} of length {}",
                    record.name(),
                    record.offset(),
                    table.name(),
                    table.length()
                )));
            }
            self.insert(
                start + 2 + u32::from(record.offset()),
                component_id,
                record.clone(),
            )?;
        }
        Ok(())
    }

    fn insert(
        &mut self,
        start: u32,
        component_id: &str,
        record: ModbusRecord,
    ) -> Result<(), SlaveError> {
        let start_address = address(start)?;
        let end = start + u32::from(record.words());
        if end > 0x1_0000 {
            return Err(SlaveError::Layout(format!(
                "record {} at {} exceeds the address space",
                record.name(),
                start
            )));
        }
        if let Some((previous, entry)) = self.records.range(..=start_address).next_back() {
            if u32::from(*previous) + u32::from(entry.record.words()) > start {
                return Err(SlaveError::Layout(format!(
                    "record {} at {} overlaps {} at {}",
                    record.name(),
                    start,
                    entry.record.name(),
                    previous
                )));
            }
        }
        if let Some((next, entry)) = self.records.range(start_address..).next() {
            if u32::from(*next) < end {
                return Err(SlaveError::Layout(format!(
                    "record {} at {} overlaps {} at {}",
                    record.name(),
                    start,
                    entry.record.name(),
                    next
                )));
            }
        }
        debug!(
            target: "ems.modbus.slave",
            address = start_address,
            component_id = %component_id,
            record = %record,
            "record mapped"
        );
        self.records.insert(
            start_address,
            Entry {
                component_id: component_id.to_string(),
                record,
            },
        );
        Ok(())
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// 下一个组件块的起始地址
    pub fn next_address(&self) -> u32 {
        self.next_address
    }

    /// 组件块起始地址 → 组件 ID
    pub fn components(&self) -> impl Iterator<Item = (u16, &str)> {
        self.components
            .iter()
            .map(|(address, id)| (*address, id.as_str()))
    }

    /// 全部记录：地址、组件 ID、记录
    pub fn records(&self) -> impl Iterator<Item = (u16, &str, &ModbusRecord)> {
        self.records
            .iter()
            .map(|(address, entry)| (*address, entry.component_id.as_str(), &entry.record))
    }

    pub fn record_at(&self, address: u16) -> Option<&ModbusRecord> {
        self.records.get(&address).map(|entry| &entry.record)
    }

    /// 功能码 3/4：读取 `[start, start + count)`
    ///
    /// 请求可以只覆盖记录的一部分，此时按完整记录编码后切片。
    pub fn read_registers(
        &self,
        start: u16,
        count: u16,
        channels: &ChannelRegistry,
    ) -> Result<Vec<u16>, SlaveError> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(SlaveError::IllegalValue(format!(
                "register count {} out of 1..={}",
                count, MAX_READ_REGISTERS
            )));
        }
        let end = u32::from(start) + u32::from(count);
        if end > 0x1_0000 {
            return Err(SlaveError::IllegalAddress(start));
        }

        let mut words = Vec::with_capacity(usize::from(count));
        let mut cursor = u32::from(start);
        while cursor < end {
            let address = cursor as u16;
            let (record_start, entry) = self
                .covering(address)
                .ok_or(SlaveError::IllegalAddress(address))?;
            let encoded = self.encode(entry, channels);
            let from = (cursor - u32::from(record_start)) as usize;
            let to = (end - u32::from(record_start)).min(encoded.len() as u32) as usize;
            words.extend_from_slice(&encoded[from..to]);
            cursor = u32::from(record_start) + to as u32;
        }
        Ok(words)
    }

    /// 功能码 6/16：解析写入负载
    ///
    /// 写请求必须覆盖完整记录，且所有记录都可写；任一条件不满足则整体拒绝。
    /// 写入未定义模式的记录被忽略。
    pub fn write_registers(
        &self,
        start: u16,
        words: &[u16],
        channels: &ChannelRegistry,
    ) -> Result<Vec<(ChannelAddress, Value)>, SlaveError> {
        if words.is_empty() {
            return Err(SlaveError::IllegalValue("empty write".to_string()));
        }
        let end = u32::from(start) + words.len() as u32;
        if end > 0x1_0000 {
            return Err(SlaveError::IllegalAddress(start));
        }

        let mut writes = Vec::new();
        let mut cursor = u32::from(start);
        while cursor < end {
            let address = cursor as u16;
            let entry = self
                .records
                .get(&address)
                .ok_or(SlaveError::IllegalAddress(address))?;
            let width = u32::from(entry.record.words());
            if cursor + width > end {
                return Err(SlaveError::IllegalAddress(address));
            }

            let channel_address = self.writable_channel(address, entry, channels)?;
            let offset = (cursor - u32::from(start)) as usize;
            let payload = words_to_bytes(&words[offset..offset + width as usize]);
            if let Some(value) = entry.record.modbus_type().from_byte_array(&payload)? {
                writes.push((channel_address, value));
            }
            cursor += width;
        }
        Ok(writes)
    }

    /// 解析写请求并把结果暂存为通道的下一个写入值，返回暂存数量
    ///
    /// 暂存是整体的：任一值无法收敛到通道类型时，不暂存任何值。
    pub fn stage_writes(
        &self,
        start: u16,
        words: &[u16],
        channels: &ChannelRegistry,
    ) -> Result<usize, SlaveError> {
        let writes = self.write_registers(start, words, channels)?;
        let staged = channels.set_next_write_values(writes.iter().cloned())?;
        for (address, value) in &writes {
            debug!(
                target: "ems.modbus.slave",
                channel = %address,
                value = %value,
                "write staged from slave request"
            );
        }
        Ok(staged)
    }

    fn covering(&self, address: u16) -> Option<(u16, &Entry)> {
        let (start, entry) = self.records.range(..=address).next_back()?;
        let end = u32::from(*start) + u32::from(entry.record.words());
        (u32::from(address) < end).then_some((*start, entry))
    }

    fn encode(&self, entry: &Entry, channels: &ChannelRegistry) -> Vec<u16> {
        let value = match entry.record.kind() {
            RecordKind::Channel { channel_id } => {
                channels.value(&ChannelAddress::new(entry.component_id.as_str(), channel_id.as_str()))
            }
            _ => None,
        };
        bytes_to_words(&entry.record.to_byte_array(value.as_ref()))
    }

    fn writable_channel(
        &self,
        address: u16,
        entry: &Entry,
        channels: &ChannelRegistry,
    ) -> Result<ChannelAddress, SlaveError> {
        if !self.access.is_writable() {
            return Err(SlaveError::ReadOnly(address));
        }
        let channel_id = entry
            .record
            .channel_id()
            .ok_or(SlaveError::ReadOnly(address))?;
        let channel_address = ChannelAddress::new(entry.component_id.as_str(), channel_id);
        match channels.doc(&channel_address) {
            Some(doc) if doc.access.is_writable() => Ok(channel_address),
            _ => Err(SlaveError::ReadOnly(address)),
        }
    }
}

fn address(value: u32) -> Result<u16, SlaveError> {
    u16::try_from(value)
        .map_err(|_| SlaveError::Layout(format!("address {} exceeds the address space", value)))
}

fn block_length(name: &str, length: u32) -> Result<u16, SlaveError> {
    u16::try_from(length)
        .map_err(|_| SlaveError::Layout(format!("block {} is {} registers long", name, length)))
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}
