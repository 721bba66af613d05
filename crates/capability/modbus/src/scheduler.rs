//! 周期任务调度
//!
//! 每个桥一个调度器，每个周期决定哪些读任务执行：
//! - HIGH：全部执行
//! - LOW：从轮转游标开始取 `low_budget` 个
//!
//! 设 LOW 任务数为 L、预算为 b，任一 LOW 任务在连续 `ceil(L/b)` 个周期内至少执行一次。
//! 写任务不分优先级，写阶段按 [`TaskScheduler::write_tasks`] 的顺序逐个评估，
//! 是否真正发送取决于是否有待写值。
//! 调度器只决定整个任务是否执行，从不调整任务内元素顺序。

use crate::types::Priority;
use std::collections::HashMap;

/// 任务引用：协议下标 + 任务下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskRef {
    pub protocol: usize,
    pub task: usize,
}

impl TaskRef {
    pub fn new(protocol: usize, task: usize) -> Self {
        Self { protocol, task }
    }
}

/// 单个周期内读任务的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// 本周期入选，等待执行
    Eligible,
    Executed,
    /// 本周期未入选
    Skipped,
}

/// 一个周期的执行计划
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub cycle: u64,
    /// 按执行顺序：先 HIGH 后本周期入选的 LOW
    pub reads: Vec<TaskRef>,
    states: HashMap<TaskRef, TaskState>,
}

impl CyclePlan {
    pub fn state(&self, task: &TaskRef) -> Option<TaskState> {
        self.states.get(task).copied()
    }

    pub fn mark_executed(&mut self, task: &TaskRef) {
        if let Some(state) = self.states.get_mut(task) {
            if *state == TaskState::Eligible {
                *state = TaskState::Executed;
            }
        }
    }

    pub fn skipped(&self) -> usize {
        self.states
            .values()
            .filter(|state| **state == TaskState::Skipped)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct TaskScheduler {
    low_budget: usize,
    high: Vec<TaskRef>,
    low: Vec<TaskRef>,
    writes: Vec<TaskRef>,
    cursor: usize,
    cycle: u64,
}

impl TaskScheduler {
    /// `low_budget` 为 0 时按 1 处理，否则 LOW 任务永远得不到执行
    pub fn new(low_budget: usize) -> Self {
        Self {
            low_budget: low_budget.max(1),
            high: Vec::new(),
            low: Vec::new(),
            writes: Vec::new(),
            cursor: 0,
            cycle: 0,
        }
    }

    /// 重建优先级分层（协议增删后调用）
    ///
    /// 游标尽量保持指向原先下一个要执行的 LOW 任务；该任务已不存在时按长度取模。
    pub fn rebuild(
        &mut self,
        reads: impl IntoIterator<Item = (TaskRef, Priority)>,
        writes: impl IntoIterator<Item = TaskRef>,
    ) {
        let next_low = self.low.get(self.cursor).copied();
        self.high.clear();
        self.low.clear();
        for (task, priority) in reads {
            match priority {
                Priority::High => self.high.push(task),
                Priority::Low => self.low.push(task),
            }
        }
        self.writes = writes.into_iter().collect();

        self.cursor = match next_low.and_then(|task| self.low.iter().position(|t| *t == task)) {
            Some(position) => position,
            None if self.low.is_empty() => 0,
            None => self.cursor % self.low.len(),
        };
    }

    /// 生成下一个周期的计划并推进游标
    pub fn plan_cycle(&mut self) -> CyclePlan {
        self.cycle += 1;
        let mut states = HashMap::new();
        let mut reads = self.high.clone();

        let take = self.low_budget.min(self.low.len());
        for offset in 0..take {
            reads.push(self.low[(self.cursor + offset) % self.low.len()]);
        }
        if !self.low.is_empty() {
            self.cursor = (self.cursor + take) % self.low.len();
        }

        for task in self.high.iter().chain(self.low.iter()) {
            states.insert(*task, TaskState::Skipped);
        }
        for task in &reads {
            states.insert(*task, TaskState::Eligible);
        }

        CyclePlan {
            cycle: self.cycle,
            reads,
            states,
        }
    }

    pub fn low_budget(&self) -> usize {
        self.low_budget
    }

    pub fn high_tasks(&self) -> &[TaskRef] {
        &self.high
    }

    pub fn low_tasks(&self) -> &[TaskRef] {
        &self.low
    }

    /// 写阶段评估顺序
    pub fn write_tasks(&self) -> &[TaskRef] {
        &self.writes
    }

    /// LOW 任务最长等待周期数：`ceil(L/b)`
    pub fn low_rotation_cycles(&self) -> usize {
        self.low.len().div_ceil(self.low_budget)
    }
}
