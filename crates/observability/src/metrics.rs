//! Bridge 指标收集模块
//!
//! Prometheus 记录函数 (`park_iot_*`) 与内存中的读数统计聚合器。

use std::collections::HashMap;

use contracts::{ConnectionState, Severity};
use metrics::{counter, gauge, histogram};

/// 记录从 broker 收到的消息
pub fn record_message_received() {
    counter!("park_iot_messages_received_total").increment(1);
}

/// 记录被丢弃的畸形消息
///
/// `kind` 为 `ErrorKind::as_str()` (`malformed_topic` / `malformed_payload`)
pub fn record_message_malformed(kind: &str) {
    counter!(
        "park_iot_messages_malformed_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录成功写入的读数
pub fn record_reading_persisted(sensor_type: &str) {
    counter!(
        "park_iot_readings_persisted_total",
        "sensor_type" => sensor_type.to_string()
    )
    .increment(1);
}

/// 记录幂等写入命中 (reading_id 已存在)
pub fn record_reading_duplicate() {
    counter!("park_iot_readings_duplicate_total").increment(1);
}

/// 记录一次存储重试
pub fn record_store_retry() {
    counter!("park_iot_store_retries_total").increment(1);
}

pub fn record_dead_lettered() {
    counter!("park_iot_readings_dead_lettered_total").increment(1);
}

/// Dead letter sink itself failed; the reading is lost.
pub fn record_dead_letter_failure() {
    counter!("park_iot_dead_letter_failures_total").increment(1);
}

/// 当前并发写入数
pub fn record_inflight_writes(count: usize) {
    gauge!("park_iot_inflight_writes").set(count as f64);
}

/// 一条读数最终耗费的写入尝试次数
pub fn record_write_attempts(attempts: u32) {
    histogram!("park_iot_write_attempts").record(attempts as f64);
}

/// Broker 会话状态 (编码见 `ConnectionState::as_gauge`)
pub fn record_broker_state(state: ConnectionState) {
    gauge!("park_iot_broker_state").set(state.as_gauge());
}

pub fn record_broker_reconnect() {
    counter!("park_iot_broker_reconnects_total").increment(1);
}

/// 记录阈值告警
pub fn record_threshold_breach(sensor_type: &str, severity: Severity) {
    counter!(
        "park_iot_threshold_breaches_total",
        "sensor_type" => sensor_type.to_string(),
        "severity" => severity.as_str().to_string()
    )
    .increment(1);
}

/// 读数统计聚合器
///
/// 在内存中按传感器类型聚合读数，便于关闭时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct ReadingStatsAggregator {
    /// 解码成功的读数总数
    pub total_readings: u64,

    /// 各传感器类型的数值统计
    pub value_stats: HashMap<String, RunningStats>,

    /// 各传感器类型的阈值告警次数
    pub breach_counts: HashMap<String, u64>,
}

impl ReadingStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, sensor_type: &str, value: f64) {
        self.total_readings += 1;
        self.value_stats
            .entry(sensor_type.to_string())
            .or_default()
            .push(value);
    }

    pub fn record_breach(&mut self, sensor_type: &str) {
        *self.breach_counts.entry(sensor_type.to_string()).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> ReadingSummary {
        let mut sensors: Vec<(String, StatsSummary)> = self
            .value_stats
            .iter()
            .map(|(sensor_type, stats)| (sensor_type.clone(), StatsSummary::from(stats)))
            .collect();
        sensors.sort_by(|a, b| a.0.cmp(&b.0));

        ReadingSummary {
            total_readings: self.total_readings,
            total_breaches: self.breach_counts.values().sum(),
            sensors,
            breach_counts: self.breach_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 读数摘要
#[derive(Debug, Clone, Default)]
pub struct ReadingSummary {
    pub total_readings: u64,
    pub total_breaches: u64,
    /// Sorted by sensor type
    pub sensors: Vec<(String, StatsSummary)>,
    pub breach_counts: HashMap<String, u64>,
}

impl std::fmt::Display for ReadingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Reading Summary ===")?;
        writeln!(f, "Total readings: {}", self.total_readings)?;
        writeln!(f, "Threshold breaches: {}", self.total_breaches)?;

        for (sensor_type, stats) in &self.sensors {
            let breaches = self.breach_counts.get(sensor_type).copied().unwrap_or(0);
            writeln!(f, "  {sensor_type}: {stats} breaches={breaches}")?;
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.2}, max={:.2}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
