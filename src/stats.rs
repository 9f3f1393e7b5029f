//! Latency and throughput statistics over a run's samples.
//! 基于运行样本的延迟与吞吐量统计。

use std::fmt;

/// Summary statistics over a set of round-trip times, in milliseconds.
///
/// The standard deviation is the population one (divides by `n`).
///
/// 一组往返时间（毫秒）的汇总统计。标准差为总体标准差（除以 `n`）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

impl Stats {
    /// Computes the summary of `values`, or `None` when there are none.
    ///
    /// 计算 `values` 的汇总；若为空则返回 `None`。
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            min,
            max,
            mean,
            stddev: variance.sqrt(),
        })
    }
}

/// Sustained data rate over a bulk run.
///
/// 批量运行期间的持续数据速率。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    megabytes_per_sec: f64,
}

impl Throughput {
    /// `payload_kib * count / duration_ms / 1024 * 1000`.
    ///
    /// Returns `None` for a non-positive duration.
    pub fn compute(payload_kib: f64, count: u64, duration_ms: f64) -> Option<Self> {
        if duration_ms <= 0.0 {
            return None;
        }
        let megabytes_per_sec = payload_kib * count as f64 / duration_ms / 1024.0 * 1000.0;
        Some(Self { megabytes_per_sec })
    }

    pub fn megabytes_per_sec(&self) -> f64 {
        self.megabytes_per_sec
    }

    pub fn megabits_per_sec(&self) -> f64 {
        self.megabytes_per_sec * 8.0
    }
}

/// A statistics snapshot, recomputed from the sample sequence each time it
/// is triggered.
///
/// 统计快照，每次触发时根据样本序列重新计算。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    /// Number of samples the snapshot was computed from.
    /// 计算快照所用的样本数。
    pub count: usize,
    pub stats: Stats,
    /// Present in bulk mode only.
    /// 仅在批量模式下存在。
    pub throughput: Option<Throughput>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Stats {
            min,
            max,
            mean,
            stddev,
        } = self.stats;
        writeln!(f, "---- statistics ----")?;
        write!(f, "min/avg/max/sd = {min:.2}/{mean:.2}/{max:.2}/{stddev:.2} ms")?;
        if let Some(throughput) = &self.throughput {
            write!(
                f,
                "\nthroughput = {:.2} MB/s ({:.2} Mbps)",
                throughput.megabytes_per_sec(),
                throughput.megabits_per_sec()
            )?;
        }
        Ok(())
    }
}
