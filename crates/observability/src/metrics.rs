//! 路由引擎指标
//!
//! 基于 `metrics` facade 的辅助函数，以及用于运行结束汇总的内存聚合器。

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// 记录交给消费者队列的测量值
pub fn record_measurements_routed(count: usize) {
    counter!("router_measurements_routed_total").increment(count as u64);
}

/// 记录回退到全局快照的本地路由缓存未命中
pub fn record_route_cache_misses(count: usize) {
    counter!("router_route_cache_misses_total").increment(count as u64);
}

/// 记录当前快照版本
pub fn record_snapshot_version(version: u64) {
    gauge!("router_snapshot_version").set(version as f64);
}

/// 记录一次路由表计算
pub fn record_route_calculation(elapsed: Duration, routes: usize, destinations: usize) {
    histogram!("router_route_calculation_seconds").record(elapsed.as_secs_f64());
    gauge!("router_routes").set(routes as f64);
    gauge!("router_destinations").set(destinations as f64);
}

/// 记录被消费者拒绝的批次
pub fn record_ingest_failure(adapter: &str) {
    counter!(
        "router_consumer_ingest_failures_total",
        "adapter" => adapter.to_string()
    )
    .increment(1);
}

/// 记录一次依赖门控投递
///
/// `outcome` 为 `satisfied` 或 `timeout`。
pub fn record_dependency_delivered(outcome: &'static str, waited: Duration) {
    counter!("router_dependency_delivered_total", "outcome" => outcome).increment(1);
    histogram!("router_dependency_wait_seconds", "outcome" => outcome).record(waited.as_secs_f64());
}

/// 记录按需管理的适配器中已启用的数量
pub fn record_demand_adapters_enabled(count: usize) {
    gauge!("router_demand_adapters_enabled").set(count as f64);
}

/// 路由指标聚合器
///
/// 在内存中聚合，用于生成汇总。
#[derive(Debug, Clone, Default)]
pub struct RoutingMetricsAggregator {
    /// 已执行的路由表计算次数
    pub calculations: u64,

    /// 计算耗时 (ms)
    pub calculation_stats: RunningStats,

    /// 由完成通知释放的门控投递
    pub dependency_satisfied: u64,

    /// 因超时释放的门控投递
    pub dependency_timed_out: u64,

    /// 门控测量值的等待时间 (ms)
    pub dependency_wait_stats: RunningStats,
}

impl RoutingMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_calculation(&mut self, elapsed: Duration) {
        self.calculations += 1;
        self.calculation_stats.push(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_dependency(&mut self, satisfied: bool, waited: Duration) {
        if satisfied {
            self.dependency_satisfied += 1;
        } else {
            self.dependency_timed_out += 1;
        }
        self.dependency_wait_stats.push(waited.as_secs_f64() * 1000.0);
    }

    /// 生成汇总报告
    pub fn summary(&self) -> MetricsSummary {
        let gated = self.dependency_satisfied + self.dependency_timed_out;
        MetricsSummary {
            calculations: self.calculations,
            dependency_satisfied: self.dependency_satisfied,
            dependency_timed_out: self.dependency_timed_out,
            timeout_rate: if gated > 0 {
                self.dependency_timed_out as f64 / gated as f64 * 100.0
            } else {
                0.0
            },
            calculation_ms: StatsSummary::from(&self.calculation_stats),
            dependency_wait_ms: StatsSummary::from(&self.dependency_wait_stats),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标汇总
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub calculations: u64,
    pub dependency_satisfied: u64,
    pub dependency_timed_out: u64,
    pub timeout_rate: f64,
    pub calculation_ms: StatsSummary,
    pub dependency_wait_ms: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Routing Metrics Summary ===")?;
        writeln!(f, "Route calculations: {}", self.calculations)?;
        writeln!(f, "Calculation time (ms): {}", self.calculation_ms)?;
        writeln!(
            f,
            "Gated deliveries: {} satisfied, {} timed out ({:.2}%)",
            self.dependency_satisfied, self.dependency_timed_out, self.timeout_rate
        )?;
        writeln!(f, "Dependency wait (ms): {}", self.dependency_wait_ms)?;
        Ok(())
    }
}

/// 统计汇总
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
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计 (Welford 算法)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
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
