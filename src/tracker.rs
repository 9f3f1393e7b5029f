//! Correlates echoed data points with their send times.
//! 将回显的数据点与其发送时间关联起来。

use crate::error::{Error, Result};
use crate::event::{EventSink, RunEvent};
use crate::protocol::{Chunk, Downstream};
use crate::session::{Session, signed_millis};
use crate::stats::{Report, Stats, Throughput};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// One round-trip measurement.
///
/// 一次往返测量。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// `base_time + elapsed_time` of the echoed point.
    /// 回显数据点的 `base_time + elapsed_time`。
    pub tx_time: Instant,
    /// Local clock when the point was observed.
    /// 观察到数据点时的本地时钟。
    pub rx_time: Instant,
    /// `rx_time - tx_time`, in milliseconds.
    pub rtt_ms: f64,
}

/// Condition under which the tracker computes statistics.
///
/// 追踪器计算统计数据的条件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once, when the sample count reaches the target. Also requests the
    /// downstream to close and adds throughput to the report.
    ///
    /// 当样本数达到目标时触发一次。同时请求关闭下行流，并在报告中加入吞吐量。
    SampleCount,
    /// Every time a chunk arrives whose sequence number equals the target.
    ///
    /// 每当到达的数据块序列号等于目标值时触发。
    SequenceNumber,
}

/// What a single chunk did to the tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// Data points turned into samples.
    pub accepted: usize,
    pub report: Option<Report>,
    /// Set exactly once per run, on the chunk that completed a bulk run.
    pub close_downstream: bool,
}

/// Consumes inbound chunks of one session and accumulates samples.
///
/// The tracker is the sole writer of the sample sequence. Chunks from any
/// other session are ignored without effect.
///
/// 消费某一会话的入站数据块并累积样本。
///
/// 追踪器是样本序列的唯一写入者。来自其他会话的数据块会被忽略，且不产生任何影响。
#[derive(Debug)]
pub struct CorrelationTracker {
    session: Session,
    session_id: String,
    target: u64,
    trigger: Trigger,
    payload_kib: f64,
    samples: Vec<Sample>,
    completed: bool,
    close_requested: bool,
    last_report: Option<Report>,
    events: EventSink,
}

impl CorrelationTracker {
    pub fn new(
        session: Session,
        target: u64,
        trigger: Trigger,
        payload_kib: f64,
        events: EventSink,
    ) -> Self {
        let session_id = session.id_string();
        Self {
            session,
            session_id,
            target,
            trigger,
            payload_kib,
            samples: Vec::new(),
            completed: false,
            close_requested: false,
            last_report: None,
            events,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Whether the trigger has fired at least once.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }

    /// Processes one chunk, timestamping each point with the current clock.
    ///
    /// 处理一个数据块，并用当前时钟为每个数据点打时间戳。
    pub fn observe(&mut self, chunk: &Chunk) -> Observation {
        self.observe_with(chunk, Instant::now)
    }

    /// Processes one chunk, reading the receive instant of every data point
    /// from `now`.
    ///
    /// 处理一个数据块，从 `now` 读取每个数据点的接收时刻。
    pub fn observe_with(
        &mut self,
        chunk: &Chunk,
        mut now: impl FnMut() -> Instant,
    ) -> Observation {
        if chunk.source_session_id != self.session_id {
            trace!(
                source = %chunk.source_session_id,
                seq = chunk.sequence_number,
                "ignoring chunk from another session"
            );
            return Observation::default();
        }

        let mut observation = Observation::default();
        for point in chunk.data_points() {
            let tx_time = self.session.instant_at(point.elapsed_time);
            let rx_time = now();
            let rtt_ms = signed_millis(rx_time, tx_time);
            self.samples.push(Sample {
                tx_time,
                rx_time,
                rtt_ms,
            });
            observation.accepted += 1;

            self.events.emit(RunEvent::Sample {
                index: self.samples.len(),
                sequence_number: chunk.sequence_number,
                rtt_ms,
            });
        }

        let fire = match self.trigger {
            Trigger::SampleCount => !self.completed && self.samples.len() as u64 == self.target,
            Trigger::SequenceNumber => u64::from(chunk.sequence_number) == self.target,
        };
        if fire {
            self.completed = true;
            observation.report = self.report();
            if let Some(report) = &observation.report {
                info!(session = %self.session_id, count = report.count, "statistics computed");
                self.events.emit(RunEvent::Report(*report));
                self.last_report = Some(*report);
            }
            if self.trigger == Trigger::SampleCount && !self.close_requested {
                self.close_requested = true;
                observation.close_downstream = true;
            }
        }
        observation
    }

    /// Recomputes the statistics snapshot from the whole sample sequence.
    ///
    /// 根据整个样本序列重新计算统计快照。
    pub fn report(&self) -> Option<Report> {
        let rtts: Vec<f64> = self.samples.iter().map(|s| s.rtt_ms).collect();
        let stats = Stats::from_values(&rtts)?;
        let throughput = match (self.trigger, self.samples.first(), self.samples.last()) {
            (Trigger::SampleCount, Some(first), Some(last)) => {
                let duration_ms = signed_millis(last.rx_time, first.tx_time);
                Throughput::compute(self.payload_kib, self.target, duration_ms)
            }
            _ => None,
        };
        Some(Report {
            count: self.samples.len(),
            stats,
            throughput,
        })
    }

    /// Drains `downstream` until it ends, raising `completed` when the
    /// trigger fires and closing the downstream when asked to.
    ///
    /// Fails with [`Error::StreamClosed`] if the downstream ends before the
    /// trigger ever fired.
    ///
    /// 持续读取 `downstream` 直到其结束；触发时设置 `completed`，并在需要时关闭下行流。
    pub async fn run<D>(
        &mut self,
        downstream: &mut D,
        completed: &watch::Sender<bool>,
    ) -> Result<()>
    where
        D: Downstream + ?Sized,
    {
        while let Some(chunk) = downstream.next_chunk().await {
            let observation = self.observe(&chunk);
            if observation.report.is_some() {
                completed.send_replace(true);
            }
            if observation.close_downstream {
                debug!(session = %self.session_id, "target reached, closing downstream");
                downstream.close().await?;
            }
        }

        if self.completed {
            Ok(())
        } else {
            Err(Error::StreamClosed)
        }
    }
}
