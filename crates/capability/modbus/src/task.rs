//! 读写任务
//!
//! 任务是一组地址连续、互不重叠、严格递增的元素，共享一个起始地址和一个从站 ID，
//! 每个周期对应一次请求。任务长度由元素推导，不能单独设置。
//!
//! 写任务的每个元素额外持有一个“待写值”单槽：应用逻辑暂存（后写覆盖先写），
//! 成功发送后清空，失败则保留到下个周期重试；未暂存的元素不会发送。

use crate::element::Element;
use crate::error::{ConfigurationError, DecodeError};
use crate::types::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS, Priority, ReadFunction, WriteFunction};
use domain::Value;
use std::ops::Range;

/// 校验元素布局并返回总长度
fn validate_layout(
    start_address: u16,
    elements: &[Element],
    max: u16,
) -> Result<u16, ConfigurationError> {
    if elements.is_empty() {
        return Err(ConfigurationError::EmptyTask { start_address });
    }

    let mut expected = u32::from(start_address);
    for element in elements {
        if element.is_empty() {
            return Err(ConfigurationError::InvalidWordCount {
                address: element.start_address(),
                count: 0,
            });
        }
        let address = u32::from(element.start_address());
        if address > expected {
            return Err(ConfigurationError::Gap {
                expected,
                found: element.start_address(),
            });
        }
        if address < expected {
            return Err(ConfigurationError::Overlap {
                address: element.start_address(),
                previous_end: expected,
            });
        }
        expected = element.end_address();
    }

    let length = expected - u32::from(start_address);
    if expected > 0x1_0000 {
        return Err(ConfigurationError::AddressOverflow {
            start_address,
            length,
        });
    }
    if length > u32::from(max) {
        return Err(ConfigurationError::TooManyRegisters {
            start_address,
            length,
            max,
        });
    }
    Ok(length as u16)
}

/// 读任务
#[derive(Debug, Clone)]
pub struct ReadTask {
    function: ReadFunction,
    unit_id: u8,
    start_address: u16,
    length: u16,
    priority: Priority,
    elements: Vec<Element>,
}

impl ReadTask {
    pub fn new(
        function: ReadFunction,
        start_address: u16,
        priority: Priority,
        elements: Vec<Element>,
    ) -> Result<Self, ConfigurationError> {
        let length = validate_layout(start_address, &elements, MAX_READ_REGISTERS)?;
        Ok(Self {
            function,
            unit_id: 0,
            start_address,
            length,
            priority,
            elements,
        })
    }

    /// 功能码 3：读保持寄存器
    pub fn fc3(
        start_address: u16,
        priority: Priority,
        elements: Vec<Element>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(ReadFunction::ReadHoldingRegisters, start_address, priority, elements)
    }

    /// 功能码 4：读输入寄存器
    pub fn fc4(
        start_address: u16,
        priority: Priority,
        elements: Vec<Element>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(ReadFunction::ReadInputRegisters, start_address, priority, elements)
    }

    /// 由所属协议在登记时设置
    pub(crate) fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    pub fn function(&self) -> ReadFunction {
        self.function
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }
}

/// 写任务中的元素及其待写值（通道域）
#[derive(Debug, Clone)]
pub struct WriteElement {
    element: Element,
    pending: Option<Value>,
}

impl WriteElement {
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn pending(&self) -> Option<&Value> {
        self.pending.as_ref()
    }
}

/// 一次写请求：起始地址 + 寄存器字，覆盖 `elements` 范围内的元素
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub start_address: u16,
    pub words: Vec<u16>,
    pub elements: Range<usize>,
}

/// 暂存值编码失败的元素
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedWrite {
    pub index: usize,
    pub channel_id: Option<String>,
    pub error: DecodeError,
}

/// 写任务
#[derive(Debug, Clone)]
pub struct WriteTask {
    function: WriteFunction,
    unit_id: u8,
    start_address: u16,
    length: u16,
    elements: Vec<WriteElement>,
}

impl WriteTask {
    pub fn new(
        function: WriteFunction,
        start_address: u16,
        elements: Vec<Element>,
    ) -> Result<Self, ConfigurationError> {
        let length = validate_layout(start_address, &elements, MAX_WRITE_REGISTERS)?;
        if function == WriteFunction::WriteSingleRegister {
            if let Some(wide) = elements.iter().find(|element| element.len() != 1) {
                return Err(ConfigurationError::InvalidWordCount {
                    address: wide.start_address(),
                    count: u32::from(wide.len()),
                });
            }
        }
        Ok(Self {
            function,
            unit_id: 0,
            start_address,
            length,
            elements: elements
                .into_iter()
                .map(|element| WriteElement {
                    element,
                    pending: None,
                })
                .collect(),
        })
    }

    /// 功能码 16：写多个寄存器
    pub fn fc16(start_address: u16, elements: Vec<Element>) -> Result<Self, ConfigurationError> {
        Self::new(WriteFunction::WriteMultipleRegisters, start_address, elements)
    }

    /// 功能码 6：写单个寄存器（每个元素必须恰好一个寄存器）
    pub fn fc6(start_address: u16, elements: Vec<Element>) -> Result<Self, ConfigurationError> {
        Self::new(WriteFunction::WriteSingleRegister, start_address, elements)
    }

    pub(crate) fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    pub fn function(&self) -> WriteFunction {
        self.function
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn elements(&self) -> &[WriteElement] {
        &self.elements
    }

    /// 元素位置（按通道 ID）
    pub fn position(&self, channel_id: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|item| item.element.channel_id() == Some(channel_id))
    }

    /// 暂存待写值；返回 false 表示该任务没有映射此通道
    pub fn stage(&mut self, channel_id: &str, value: Value) -> bool {
        match self.position(channel_id) {
            Some(index) => {
                self.elements[index].pending = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, channel_id: &str) -> Option<&Value> {
        self.position(channel_id)
            .and_then(|index| self.elements[index].pending.as_ref())
    }

    pub fn has_pending(&self) -> bool {
        self.elements.iter().any(|item| item.pending.is_some())
    }

    /// 把当前暂存值编码为写请求
    ///
    /// 功能码 16 时相邻的暂存元素合并为一次请求；功能码 6 时每个元素单独一次。
    /// 编码失败的元素（值永远无法写入）清空暂存并单独返回，不影响其他元素。
    pub fn prepare(&mut self) -> (Vec<WriteRequest>, Vec<RejectedWrite>) {
        let mut requests: Vec<WriteRequest> = Vec::new();
        let mut rejected = Vec::new();
        let merge = self.function == WriteFunction::WriteMultipleRegisters;

        for (index, item) in self.elements.iter_mut().enumerate() {
            let Some(value) = item.pending.as_ref() else {
                continue;
            };
            let words = match item.element.encode_from_channel(value) {
                Ok(words) => words,
                Err(error) => {
                    rejected.push(RejectedWrite {
                        index,
                        channel_id: item.element.channel_id().map(str::to_string),
                        error,
                    });
                    item.pending = None;
                    continue;
                }
            };
            match requests.last_mut() {
                Some(last) if merge && last.elements.end == index => {
                    last.words.extend(words);
                    last.elements.end = index + 1;
                }
                _ => requests.push(WriteRequest {
                    start_address: item.element.start_address(),
                    words,
                    elements: index..index + 1,
                }),
            }
        }
        (requests, rejected)
    }

    /// 请求发送成功后清空对应元素的暂存
    pub fn clear(&mut self, elements: Range<usize>) {
        for item in &mut self.elements[elements] {
            item.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Converter;

    #[test]
    fn test_length_is_sum_of_elements() {
        let task = ReadTask::fc3(
            100,
            Priority::High,
            vec![
                Element::unsigned_word(100),
                Element::signed_doubleword(101),
                Element::unsigned_word(103),
            ],
        )
        .unwrap();
        assert_eq!(task.length(), 4);
        assert_eq!(task.start_address(), 100);
    }

    #[test]
    fn test_gap_rejected() {
        let err = ReadTask::fc3(
            0,
            Priority::Low,
            vec![Element::unsigned_word(0), Element::unsigned_word(2)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::Gap {
                expected: 1,
                found: 2
            }
        );

        // 占位元素填充后可以构建
        let task = ReadTask::fc3(
            0,
            Priority::Low,
            vec![
                Element::unsigned_word(0),
                Element::dummy(1, 1),
                Element::unsigned_word(2),
            ],
        )
        .unwrap();
        assert_eq!(task.length(), 3);
    }

    #[test]
    fn test_overlap_rejected() {
        let err = ReadTask::fc3(
            0,
            Priority::Low,
            vec![Element::unsigned_doubleword(0), Element::unsigned_word(1)],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::Overlap { address: 1, .. }));
    }

    #[test]
    fn test_start_address_must_match_first_element() {
        let err = ReadTask::fc3(5, Priority::Low, vec![Element::unsigned_word(6)]).unwrap_err();
        assert!(matches!(err, ConfigurationError::Gap { .. }));
    }

    #[test]
    fn test_empty_and_oversized_rejected() {
        assert_eq!(
            ReadTask::fc3(7, Priority::Low, vec![]).unwrap_err(),
            ConfigurationError::EmptyTask { start_address: 7 }
        );
        assert!(matches!(
            ReadTask::fc3(0, Priority::Low, vec![Element::dummy(0, 125)]).unwrap_err(),
            ConfigurationError::TooManyRegisters { .. }
        ));
        assert!(matches!(
            ReadTask::fc3(0, Priority::Low, vec![Element::dummy(3, 2)]).unwrap_err(),
            ConfigurationError::InvalidWordCount { .. }
        ));
        assert!(matches!(
            ReadTask::fc3(0xFFFF, Priority::Low, vec![Element::unsigned_doubleword(0xFFFF)])
                .unwrap_err(),
            ConfigurationError::AddressOverflow { .. }
        ));
    }

    #[test]
    fn test_fc6_requires_single_registers() {
        let err = WriteTask::fc6(0, vec![Element::unsigned_doubleword(0)]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidWordCount { count: 2, .. }));
    }

    fn setpoint_task() -> WriteTask {
        WriteTask::fc16(
            200,
            vec![
                Element::signed_word(200).channel("SetActivePower"),
                Element::signed_word(201).channel("SetReactivePower"),
                Element::dummy(202, 202),
                Element::unsigned_word(203)
                    .channel("SetCurrent")
                    .converter(Converter::scale_factor(-1)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_stage_is_single_slot() {
        let mut task = setpoint_task();
        assert!(task.stage("SetActivePower", Value::I64(100)));
        assert!(task.stage("SetActivePower", Value::I64(-300)));
        assert_eq!(task.pending("SetActivePower"), Some(&Value::I64(-300)));
        assert!(!task.stage("Unknown", Value::I64(1)));
    }

    #[test]
    fn test_prepare_merges_adjacent_and_skips_unset() {
        let mut task = setpoint_task();
        task.stage("SetActivePower", Value::I64(-300));
        task.stage("SetReactivePower", Value::I64(50));
        task.stage("SetCurrent", Value::F64(1.5));

        let (requests, rejected) = task.prepare();
        assert!(rejected.is_empty());
        assert_eq!(
            requests,
            vec![
                WriteRequest {
                    start_address: 200,
                    words: vec![(-300i16) as u16, 50],
                    elements: 0..2,
                },
                WriteRequest {
                    start_address: 203,
                    words: vec![15],
                    elements: 3..4,
                },
            ]
        );

        task.clear(0..2);
        assert!(task.pending("SetActivePower").is_none());
        assert!(task.pending("SetCurrent").is_some());
    }

    #[test]
    fn test_prepare_sparse_write() {
        let mut task = setpoint_task();
        task.stage("SetReactivePower", Value::I64(7));
        let (requests, _) = task.prepare();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start_address, 201);
        assert_eq!(requests[0].words, vec![7]);
    }

    #[test]
    fn test_prepare_rejects_unencodable_value() {
        let mut task = setpoint_task();
        task.stage("SetActivePower", Value::I64(40_000));
        task.stage("SetReactivePower", Value::I64(1));
        let (requests, rejected) = task.prepare();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].channel_id.as_deref(), Some("SetActivePower"));
        assert!(task.pending("SetActivePower").is_none());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start_address, 201);
    }
}
