//! 追踪初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub read_task_success: u64,
    pub read_task_failure: u64,
    pub write_task_success: u64,
    pub write_task_failure: u64,
    pub decode_failure: u64,
    pub skipped_low_tasks: u64,
    pub cycle_duration_ms_total: u64,
    pub cycle_duration_ms_count: u64,
}

/// 基础指标（所有桥共享）。
pub struct TelemetryMetrics {
    cycles: AtomicU64,
    read_task_success: AtomicU64,
    read_task_failure: AtomicU64,
    write_task_success: AtomicU64,
    write_task_failure: AtomicU64,
    decode_failure: AtomicU64,
    skipped_low_tasks: AtomicU64,
    cycle_duration_ms_total: AtomicU64,
    cycle_duration_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            read_task_success: AtomicU64::new(0),
            read_task_failure: AtomicU64::new(0),
            write_task_success: AtomicU64::new(0),
            write_task_failure: AtomicU64::new(0),
            decode_failure: AtomicU64::new(0),
            skipped_low_tasks: AtomicU64::new(0),
            cycle_duration_ms_total: AtomicU64::new(0),
            cycle_duration_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            read_task_success: self.read_task_success.load(Ordering::Relaxed),
            read_task_failure: self.read_task_failure.load(Ordering::Relaxed),
            write_task_success: self.write_task_success.load(Ordering::Relaxed),
            write_task_failure: self.write_task_failure.load(Ordering::Relaxed),
            decode_failure: self.decode_failure.load(Ordering::Relaxed),
            skipped_low_tasks: self.skipped_low_tasks.load(Ordering::Relaxed),
            cycle_duration_ms_total: self.cycle_duration_ms_total.load(Ordering::Relaxed),
            cycle_duration_ms_count: self.cycle_duration_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录完成的周期数。
pub fn record_cycle() {
    metrics().cycles.fetch_add(1, Ordering::Relaxed);
}

/// 记录读任务成功次数。
pub fn record_read_task_success() {
    metrics().read_task_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录读任务失败次数（传输错误、超时、应答异常）。
pub fn record_read_task_failure() {
    metrics().read_task_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录写任务成功次数（一个任务的多个写请求只计一次）。
pub fn record_write_task_success() {
    metrics().write_task_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录写任务失败次数（任一写请求失败即计一次）。
pub fn record_write_task_failure() {
    metrics().write_task_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录元素解码/编码失败次数。
pub fn record_decode_failure() {
    metrics().decode_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录本周期未入选的 LOW 任务数。
pub fn record_skipped_low_tasks(count: u64) {
    metrics()
        .skipped_low_tasks
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录周期耗时（毫秒）。
pub fn record_cycle_duration_ms(duration_ms: u64) {
    let metrics = metrics();
    metrics
        .cycle_duration_ms_total
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .cycle_duration_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
