//! 设备协议声明
//!
//! 一个 [`ModbusProtocol`] 对应一台设备（组件 ID + 从站 ID），
//! 包含该设备全部读写任务。驱动只负责声明寄存器地址，执行交给桥。

use crate::error::ConfigurationError;
use crate::task::{ReadTask, WriteTask};
use domain::{ChannelAddress, Value};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ModbusProtocol {
    component_id: String,
    unit_id: u8,
    read_tasks: Vec<ReadTask>,
    write_tasks: Vec<WriteTask>,
}

impl ModbusProtocol {
    pub fn new(component_id: impl Into<String>, unit_id: u8) -> Self {
        Self {
            component_id: component_id.into(),
            unit_id,
            read_tasks: Vec::new(),
            write_tasks: Vec::new(),
        }
    }

    /// 追加读任务；同一通道不能被两个读元素映射
    pub fn add_read_task(&mut self, mut task: ReadTask) -> Result<&mut Self, ConfigurationError> {
        let existing = self
            .read_tasks
            .iter()
            .flat_map(|task| task.elements())
            .filter_map(|element| element.channel_id());
        ensure_unique_channels(
            &self.component_id,
            existing,
            task.elements().iter().filter_map(|element| element.channel_id()),
        )?;
        task.set_unit_id(self.unit_id);
        self.read_tasks.push(task);
        Ok(self)
    }

    /// 追加写任务；同一通道不能被两个写元素映射
    pub fn add_write_task(
        &mut self,
        mut task: WriteTask,
    ) -> Result<&mut Self, ConfigurationError> {
        let existing = self
            .write_tasks
            .iter()
            .flat_map(|task| task.elements())
            .filter_map(|item| item.element().channel_id());
        ensure_unique_channels(
            &self.component_id,
            existing,
            task.elements()
                .iter()
                .filter_map(|item| item.element().channel_id()),
        )?;
        task.set_unit_id(self.unit_id);
        self.write_tasks.push(task);
        Ok(self)
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn read_tasks(&self) -> &[ReadTask] {
        &self.read_tasks
    }

    pub fn write_tasks(&self) -> &[WriteTask] {
        &self.write_tasks
    }

    pub(crate) fn write_task_mut(&mut self, index: usize) -> Option<&mut WriteTask> {
        self.write_tasks.get_mut(index)
    }

    pub fn channel_address(&self, channel_id: &str) -> ChannelAddress {
        ChannelAddress::new(self.component_id.clone(), channel_id)
    }

    /// 该协议映射到的全部通道地址（读写去重）
    pub fn channel_addresses(&self) -> Vec<ChannelAddress> {
        let mut seen = HashSet::new();
        let read = self
            .read_tasks
            .iter()
            .flat_map(|task| task.elements())
            .filter_map(|element| element.channel_id());
        let write = self
            .write_tasks
            .iter()
            .flat_map(|task| task.elements())
            .filter_map(|item| item.element().channel_id());
        read.chain(write)
            .filter(|channel_id| seen.insert(channel_id.to_string()))
            .map(|channel_id| self.channel_address(channel_id))
            .collect()
    }

    /// 写元素映射的通道 ID
    pub fn write_channel_ids(&self) -> Vec<String> {
        self.write_tasks
            .iter()
            .flat_map(|task| task.elements())
            .filter_map(|item| item.element().channel_id())
            .map(str::to_string)
            .collect()
    }

    /// 暂存待写值；返回 false 表示没有写元素映射此通道
    pub fn stage_write(&mut self, channel_id: &str, value: Value) -> bool {
        self.write_tasks
            .iter_mut()
            .any(|task| task.stage(channel_id, value.clone()))
    }

    pub fn pending_write(&self, channel_id: &str) -> Option<&Value> {
        self.write_tasks
            .iter()
            .find_map(|task| task.pending(channel_id))
    }
}

fn ensure_unique_channels<'a>(
    component_id: &str,
    existing: impl Iterator<Item = &'a str>,
    incoming: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigurationError> {
    let mut seen: HashSet<&str> = existing.collect();
    for channel_id in incoming {
        if !seen.insert(channel_id) {
            return Err(ConfigurationError::DuplicateChannel(format!(
                "{}/{}",
                component_id, channel_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::types::Priority;

    #[test]
    fn test_tasks_inherit_unit_id() {
        let mut protocol = ModbusProtocol::new("meter0", 7);
        protocol
            .add_read_task(
                ReadTask::fc3(0, Priority::High, vec![Element::unsigned_word(0).channel("A")])
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(protocol.read_tasks()[0].unit_id(), 7);
    }

    #[test]
    fn test_duplicate_read_channel_rejected() {
        let mut protocol = ModbusProtocol::new("meter0", 1);
        protocol
            .add_read_task(
                ReadTask::fc3(0, Priority::High, vec![Element::unsigned_word(0).channel("A")])
                    .unwrap(),
            )
            .unwrap();
        let err = protocol
            .add_read_task(
                ReadTask::fc3(10, Priority::Low, vec![Element::unsigned_word(10).channel("A")])
                    .unwrap(),
            )
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateChannel("meter0/A".to_string()));
    }

    #[test]
    fn test_stage_write_routes_to_owning_task() {
        let mut protocol = ModbusProtocol::new("ess0", 1);
        protocol
            .add_write_task(WriteTask::fc16(100, vec![Element::signed_word(100).channel("P")]).unwrap())
            .unwrap()
            .add_write_task(WriteTask::fc6(200, vec![Element::unsigned_word(200).channel("Q")]).unwrap())
            .unwrap();

        assert!(protocol.stage_write("Q", Value::I64(5)));
        assert!(!protocol.stage_write("Missing", Value::I64(5)));
        assert_eq!(protocol.pending_write("Q"), Some(&Value::I64(5)));
        assert_eq!(protocol.pending_write("P"), None);
        assert_eq!(protocol.write_channel_ids(), vec!["P".to_string(), "Q".to_string()]);
    }
}
