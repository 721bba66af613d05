//! 桥连接执行
//!
//! 一个 [`ModbusBridge`] 独占一条物理链路，按周期顺序执行任务：
//!
//! ```text
//! run_cycle()
//!   ├── on_before_process_image()   读阶段：调度器选任务 → 逐个请求 → 解码写入通道
//!   └── on_execute_write()          写阶段：通道待写值移入元素槽 → 编码 → 发送
//! ```
//!
//! 失败以任务为界：传输错误只影响当前任务（通道保留上次值），
//! 解码错误只影响当前元素；任何错误都不会中断同周期的其他任务，
//! 也不会向调度循环外抛出。恢复依赖下一个周期重新执行。

use crate::error::{ConfigurationError, DecodeError, ModbusError, TransportError};
use crate::protocol::ModbusProtocol;
use crate::scheduler::{CyclePlan, TaskRef, TaskScheduler};
use crate::task::ReadTask;
use crate::transport::ModbusTransport;
use crate::types::{ReadFunction, WriteFunction, now_epoch_ms};
use domain::{ChannelAddress, ChannelRegistry, Value};
use ems_telemetry::{
    record_cycle, record_cycle_duration_ms, record_decode_failure, record_read_task_failure,
    record_read_task_success, record_skipped_low_tasks, record_write_task_failure,
    record_write_task_success,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 桥配置
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub id: String,
    /// 单次请求超时；超时视为本周期该任务失败
    pub request_timeout: Duration,
    /// 每周期最多执行的 LOW 任务数
    pub low_priority_budget: usize,
    /// 以 info 级别输出周期摘要（默认 debug）
    pub log_cycle_summary: bool,
}

impl BridgeConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            request_timeout: Duration::from_millis(3000),
            low_priority_budget: 1,
            log_cycle_summary: false,
        }
    }
}

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Ok,
    Failed(String),
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskOutcome::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Read,
    Write,
}

/// 任务执行报告
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task: TaskRef,
    pub kind: TaskKind,
    pub component_id: String,
    pub unit_id: u8,
    pub start_address: u16,
    pub outcome: TaskOutcome,
    /// 元素级失败数（解码失败或待写值无法编码）
    pub element_failures: usize,
}

/// 周期报告
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub reads: Vec<TaskReport>,
    pub writes: Vec<TaskReport>,
    /// 本周期未入选的 LOW 任务数
    pub skipped: usize,
    pub duration: Duration,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .filter(|report| !report.outcome.is_ok())
            .count()
    }
}

/// 桥健康计数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeHealth {
    pub cycles: u64,
    pub read_ok: u64,
    pub read_failed: u64,
    pub write_ok: u64,
    pub write_failed: u64,
    pub element_failures: u64,
    /// 连续“所有已执行任务均失败”的周期数（链路级故障）
    pub consecutive_failed_cycles: u64,
    pub last_error: Option<String>,
    pub last_success_at_ms: Option<i64>,
    failed_components: BTreeSet<String>,
}

impl BridgeHealth {
    /// 该组件最近一个周期是否有任务失败
    pub fn is_communication_failed(&self, component_id: &str) -> bool {
        self.failed_components.contains(component_id)
    }

    pub fn failed_components(&self) -> impl Iterator<Item = &str> {
        self.failed_components.iter().map(String::as_str)
    }

    fn record(&mut self, report: &TaskReport) {
        self.element_failures += report.element_failures as u64;
        match (&report.kind, &report.outcome) {
            (TaskKind::Read, TaskOutcome::Ok) => self.read_ok += 1,
            (TaskKind::Read, TaskOutcome::Failed(_)) => self.read_failed += 1,
            (TaskKind::Write, TaskOutcome::Ok) => self.write_ok += 1,
            (TaskKind::Write, TaskOutcome::Failed(_)) => self.write_failed += 1,
        }
        match &report.outcome {
            TaskOutcome::Ok => self.last_success_at_ms = Some(now_epoch_ms()),
            TaskOutcome::Failed(reason) => self.last_error = Some(reason.clone()),
        }
    }

    /// 用一个周期内全部报告刷新组件通信状态
    fn settle_cycle<'a>(&mut self, reports: impl Iterator<Item = &'a TaskReport>) {
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut touched = BTreeSet::new();
        let mut failing = BTreeSet::new();
        for report in reports {
            executed += 1;
            touched.insert(report.component_id.clone());
            if !report.outcome.is_ok() {
                failed += 1;
                failing.insert(report.component_id.clone());
            }
        }
        // 只刷新本周期执行过任务的组件
        self.failed_components
            .retain(|component| !touched.contains(component));
        self.failed_components.extend(failing);

        if executed > 0 && failed == executed {
            self.consecutive_failed_cycles += 1;
        } else if executed > 0 {
            self.consecutive_failed_cycles = 0;
        }
    }
}

/// Modbus 桥
pub struct ModbusBridge {
    config: BridgeConfig,
    transport: Box<dyn ModbusTransport>,
    channels: Arc<ChannelRegistry>,
    protocols: Vec<ModbusProtocol>,
    scheduler: TaskScheduler,
    health: BridgeHealth,
    last_plan: Option<CyclePlan>,
}

impl ModbusBridge {
    pub fn new(
        config: BridgeConfig,
        transport: Box<dyn ModbusTransport>,
        channels: Arc<ChannelRegistry>,
    ) -> Self {
        let scheduler = TaskScheduler::new(config.low_priority_budget);
        Self {
            config,
            transport,
            channels,
            protocols: Vec::new(),
            scheduler,
            health: BridgeHealth::default(),
            last_plan: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn health(&self) -> &BridgeHealth {
        &self.health
    }

    pub fn protocols(&self) -> &[ModbusProtocol] {
        &self.protocols
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// 最近一个周期的调度计划（含各读任务状态）
    pub fn last_plan(&self) -> Option<&CyclePlan> {
        self.last_plan.as_ref()
    }

    /// 挂载设备协议；映射的通道必须已在登记表中
    pub fn add_protocol(&mut self, protocol: ModbusProtocol) -> Result<(), ConfigurationError> {
        if self
            .protocols
            .iter()
            .any(|existing| existing.component_id() == protocol.component_id())
        {
            return Err(ConfigurationError::DuplicateComponent(
                protocol.component_id().to_string(),
            ));
        }
        if let Some(missing) = protocol
            .channel_addresses()
            .into_iter()
            .find(|address| !self.channels.contains(address))
        {
            return Err(ConfigurationError::UnknownChannel(missing.to_string()));
        }

        info!(
            target: "ems.modbus",
            bridge_id = %self.config.id,
            component_id = %protocol.component_id(),
            unit_id = protocol.unit_id(),
            read_tasks = protocol.read_tasks().len(),
            write_tasks = protocol.write_tasks().len(),
            "protocol_added"
        );
        self.protocols.push(protocol);
        self.rebuild_scheduler();
        Ok(())
    }

    pub fn remove_protocol(&mut self, component_id: &str) -> Option<ModbusProtocol> {
        let index = self
            .protocols
            .iter()
            .position(|protocol| protocol.component_id() == component_id)?;
        let protocol = self.protocols.remove(index);
        self.health.failed_components.remove(component_id);
        self.rebuild_scheduler();
        info!(
            target: "ems.modbus",
            bridge_id = %self.config.id,
            component_id = %component_id,
            "protocol_removed"
        );
        Some(protocol)
    }

    /// 直接暂存待写值（在写阶段之前调用）
    pub fn stage_write(&mut self, address: &ChannelAddress, value: Value) -> Result<(), ModbusError> {
        let protocol = self
            .protocols
            .iter_mut()
            .find(|protocol| protocol.component_id() == address.component_id)
            .ok_or_else(|| ModbusError::NoWriteElement(address.to_string()))?;
        if protocol.stage_write(&address.channel_id, value) {
            Ok(())
        } else {
            Err(ModbusError::NoWriteElement(address.to_string()))
        }
    }

    /// 读阶段：按调度计划执行读任务并解码
    pub async fn on_before_process_image(&mut self) -> Vec<TaskReport> {
        let mut plan = self.scheduler.plan_cycle();
        let skipped = plan.skipped();
        if skipped > 0 {
            record_skipped_low_tasks(skipped as u64);
        }

        let mut reports = Vec::with_capacity(plan.reads.len());
        for task in plan.reads.clone() {
            let report = self.read(task).await;
            plan.mark_executed(&task);
            reports.push(report);
        }
        self.last_plan = Some(plan);
        reports
    }

    /// 写阶段：把通道待写值移入元素槽，再发送所有有待写值的写任务
    pub async fn on_execute_write(&mut self) -> Vec<TaskReport> {
        self.collect_channel_writes();

        let writes: Vec<TaskRef> = self
            .scheduler
            .write_tasks()
            .iter()
            .copied()
            .filter(|task| {
                self.protocols
                    .get(task.protocol)
                    .and_then(|protocol| protocol.write_tasks().get(task.task))
                    .is_some_and(|write| write.has_pending())
            })
            .collect();

        let mut reports = Vec::with_capacity(writes.len());
        for task in writes {
            reports.push(self.write(task).await);
        }
        reports
    }

    /// 完整周期：读阶段 + 写阶段
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started_at = Instant::now();
        let reads = self.on_before_process_image().await;
        let writes = self.on_execute_write().await;
        let duration = started_at.elapsed();

        self.health.cycles += 1;
        self.health.settle_cycle(reads.iter().chain(writes.iter()));
        record_cycle();
        record_cycle_duration_ms(duration.as_millis() as u64);

        let report = CycleReport {
            cycle: self.last_plan.as_ref().map(|plan| plan.cycle).unwrap_or_default(),
            skipped: self.last_plan.as_ref().map(CyclePlan::skipped).unwrap_or_default(),
            reads,
            writes,
            duration,
        };
        if self.config.log_cycle_summary {
            info!(
                target: "ems.modbus",
                bridge_id = %self.config.id,
                cycle = report.cycle,
                reads = report.reads.len(),
                writes = report.writes.len(),
                skipped = report.skipped,
                failed = report.failed(),
                duration_ms = duration.as_millis() as u64,
                "cycle_finished"
            );
        } else {
            debug!(
                target: "ems.modbus",
                bridge_id = %self.config.id,
                cycle = report.cycle,
                reads = report.reads.len(),
                writes = report.writes.len(),
                skipped = report.skipped,
                failed = report.failed(),
                duration_ms = duration.as_millis() as u64,
                "cycle_finished"
            );
        }
        report
    }

    /// 执行单个读任务
    pub async fn execute_query(&mut self, task: TaskRef) -> TaskOutcome {
        self.read(task).await.outcome
    }

    /// 发送单个写任务中的待写值
    pub async fn execute_write(&mut self, task: TaskRef) -> TaskOutcome {
        self.write(task).await.outcome
    }

    async fn read(&mut self, task_ref: TaskRef) -> TaskReport {
        let Some(protocol) = self.protocols.get(task_ref.protocol) else {
            return missing_task(task_ref, TaskKind::Read);
        };
        let Some(task) = protocol.read_tasks().get(task_ref.task) else {
            return missing_task(task_ref, TaskKind::Read);
        };
        let component_id = protocol.component_id();

        let (outcome, element_failures) =
            match request_read(self.transport.as_mut(), self.config.request_timeout, task).await {
                Ok(words) => {
                    let failures =
                        apply_read(&self.config.id, component_id, task, &words, &self.channels);
                    (TaskOutcome::Ok, failures)
                }
                Err(err) => {
                    warn!(
                        target: "ems.modbus",
                        bridge_id = %self.config.id,
                        component_id = %component_id,
                        unit_id = task.unit_id(),
                        function_code = task.function().code(),
                        start_address = task.start_address(),
                        length = task.length(),
                        error = %err,
                        "read task failed"
                    );
                    (TaskOutcome::Failed(err.to_string()), 0)
                }
            };

        let report = TaskReport {
            task: task_ref,
            kind: TaskKind::Read,
            component_id: component_id.to_string(),
            unit_id: task.unit_id(),
            start_address: task.start_address(),
            outcome,
            element_failures,
        };
        if report.outcome.is_ok() {
            record_read_task_success();
        } else {
            record_read_task_failure();
        }
        self.health.record(&report);
        report
    }

    async fn write(&mut self, task_ref: TaskRef) -> TaskReport {
        let Some(protocol) = self.protocols.get_mut(task_ref.protocol) else {
            return missing_task(task_ref, TaskKind::Write);
        };
        let component_id = protocol.component_id().to_string();
        let Some(task) = protocol.write_task_mut(task_ref.task) else {
            return missing_task(task_ref, TaskKind::Write);
        };

        let (requests, rejected) = task.prepare();
        for rejection in &rejected {
            record_decode_failure();
            warn!(
                target: "ems.modbus",
                bridge_id = %self.config.id,
                component_id = %component_id,
                channel_id = ?rejection.channel_id,
                error = %rejection.error,
                "pending write value rejected"
            );
        }

        let mut outcome = TaskOutcome::Ok;
        for request in requests {
            let result = request_write(
                self.transport.as_mut(),
                self.config.request_timeout,
                task.function(),
                task.unit_id(),
                request.start_address,
                &request.words,
            )
            .await;
            match result {
                Ok(()) => task.clear(request.elements),
                Err(err) => {
                    warn!(
                        target: "ems.modbus",
                        bridge_id = %self.config.id,
                        component_id = %component_id,
                        unit_id = task.unit_id(),
                        function_code = task.function().code(),
                        start_address = request.start_address,
                        length = request.words.len(),
                        error = %err,
                        "write task failed"
                    );
                    if outcome.is_ok() {
                        outcome = TaskOutcome::Failed(err.to_string());
                    }
                }
            }
        }
        // 合并后的多个请求只计一次任务结果
        if outcome.is_ok() {
            record_write_task_success();
        } else {
            record_write_task_failure();
        }

        let report = TaskReport {
            task: task_ref,
            kind: TaskKind::Write,
            component_id,
            unit_id: task.unit_id(),
            start_address: task.start_address(),
            outcome,
            element_failures: rejected.len(),
        };
        self.health.record(&report);
        report
    }

    /// 通道登记表中的待写值移入元素槽（后写覆盖先写）
    fn collect_channel_writes(&mut self) {
        for protocol in &mut self.protocols {
            for channel_id in protocol.write_channel_ids() {
                let address = protocol.channel_address(&channel_id);
                if let Some(value) = self.channels.take_next_write_value(&address) {
                    protocol.stage_write(&channel_id, value);
                }
            }
        }
    }

    fn rebuild_scheduler(&mut self) {
        let reads: Vec<_> = self
            .protocols
            .iter()
            .enumerate()
            .flat_map(|(p, protocol)| {
                protocol
                    .read_tasks()
                    .iter()
                    .enumerate()
                    .map(move |(t, task)| (TaskRef::new(p, t), task.priority()))
            })
            .collect();
        let writes: Vec<_> = self
            .protocols
            .iter()
            .enumerate()
            .flat_map(|(p, protocol)| {
                (0..protocol.write_tasks().len()).map(move |t| TaskRef::new(p, t))
            })
            .collect();
        self.scheduler.rebuild(reads, writes);
    }
}

fn missing_task(task: TaskRef, kind: TaskKind) -> TaskReport {
    TaskReport {
        task,
        kind,
        component_id: String::new(),
        unit_id: 0,
        start_address: 0,
        outcome: TaskOutcome::Failed(format!(
            "no task at protocol {} index {}",
            task.protocol, task.task
        )),
        element_failures: 0,
    }
}

/// 发出读请求；超时会重置传输，避免残留应答串到下一个请求
async fn request_read(
    transport: &mut dyn ModbusTransport,
    timeout: Duration,
    task: &ReadTask,
) -> Result<Vec<u16>, TransportError> {
    let call = match task.function() {
        ReadFunction::ReadHoldingRegisters => {
            transport.read_holding_registers(task.unit_id(), task.start_address(), task.length())
        }
        ReadFunction::ReadInputRegisters => {
            transport.read_input_registers(task.unit_id(), task.start_address(), task.length())
        }
    };
    let result = tokio::time::timeout(timeout, call).await;
    let words = match result {
        Ok(result) => result?,
        Err(_) => {
            transport.reset().await;
            return Err(TransportError::Timeout(timeout.as_millis() as u64));
        }
    };
    if words.len() != usize::from(task.length()) {
        return Err(TransportError::Malformed(format!(
            "expected {} registers, got {}",
            task.length(),
            words.len()
        )));
    }
    Ok(words)
}

async fn request_write(
    transport: &mut dyn ModbusTransport,
    timeout: Duration,
    function: WriteFunction,
    unit_id: u8,
    start_address: u16,
    words: &[u16],
) -> Result<(), TransportError> {
    let call = match (function, words) {
        (WriteFunction::WriteSingleRegister, [word]) => {
            transport.write_single_register(unit_id, start_address, *word)
        }
        _ => transport.write_multiple_registers(unit_id, start_address, words),
    };
    let result = tokio::time::timeout(timeout, call).await;
    match result {
        Ok(result) => result,
        Err(_) => {
            transport.reset().await;
            Err(TransportError::Timeout(timeout.as_millis() as u64))
        }
    }
}

/// 按地址顺序逐元素解码并写入通道，返回元素级失败数
fn apply_read(
    bridge_id: &str,
    component_id: &str,
    task: &ReadTask,
    words: &[u16],
    channels: &ChannelRegistry,
) -> usize {
    let mut failures = 0;
    let mut cursor = 0usize;
    for element in task.elements() {
        let width = usize::from(element.len());
        let slice = &words[cursor..cursor + width];
        cursor += width;

        let Some(channel_id) = element.channel_id() else {
            continue;
        };
        let address = ChannelAddress::new(component_id, channel_id);
        let result = element
            .decode_to_channel(slice)
            .and_then(|value| match value {
                Some(value) => channels
                    .set_value(&address, Some(value))
                    .map_err(DecodeError::from),
                None => Ok(()),
            });
        if let Err(err) = result {
            failures += 1;
            record_decode_failure();
            warn!(
                target: "ems.modbus",
                bridge_id = %bridge_id,
                channel = %address,
                element = element.kind().name(),
                address = element.start_address(),
                error = %err,
                "element decode failed"
            );
        }
    }
    failures
}
