//! The output event stream of a run.
//!
//! A run never writes to a shared log buffer. It emits [`RunEvent`]s that a
//! presentation layer subscribes to; the `Display` form of each event is the
//! operator-facing log line.
//!
//! 运行的输出事件流。
//!
//! 运行从不写入共享的日志缓冲区，而是发出 [`RunEvent`]，由展示层订阅；
//! 每个事件的 `Display` 形式即面向操作员的日志行。

use crate::controller::RunState;
use crate::stats::Report;
use std::fmt;
use tokio::sync::mpsc;

/// An event emitted while a run progresses.
///
/// 运行过程中发出的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The busy indicator was raised or cleared.
    /// 忙碌指示被设置或清除。
    Busy(bool),
    /// The run moved to a new state.
    /// 运行进入了新状态。
    State(RunState),
    /// One round-trip sample was recorded.
    /// 记录了一个往返样本。
    Sample {
        /// Running count of samples, starting at 1.
        /// 样本的累计计数，从1开始。
        index: usize,
        sequence_number: u32,
        rtt_ms: f64,
    },
    /// A statistics snapshot was computed.
    /// 计算了一个统计快照。
    Report(Report),
    /// The run failed. The cause is not distinguished here.
    /// 运行失败。此处不区分原因。
    Failed,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::Busy(true) => write!(f, "running..."),
            RunEvent::Busy(false) => write!(f, "idle"),
            RunEvent::State(state) => write!(f, "state: {}", state.name()),
            RunEvent::Sample {
                index,
                sequence_number,
                rtt_ms,
            } => write!(f, "{index}: chunk={sequence_number}, rtt={rtt_ms:.2} ms"),
            RunEvent::Report(report) => write!(f, "{report}"),
            RunEvent::Failed => write!(f, "Unexpected Error"),
        }
    }
}

impl RunEvent {
    /// Whether this event belongs in the operator log, as opposed to status
    /// updates such as the busy indicator.
    pub fn is_log_line(&self) -> bool {
        matches!(
            self,
            RunEvent::Sample { .. } | RunEvent::Report(_) | RunEvent::Failed
        )
    }
}

/// The sending half of a run's event stream.
///
/// Emission never blocks, so the receive path can report samples without
/// suspending. Events are dropped silently once the subscriber is gone.
///
/// 运行事件流的发送端。
///
/// 发送从不阻塞，因此接收路径可以在不挂起的情况下报告样本。订阅者离开后，事件将被静默丢弃。
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

/// The receiving half of a run's event stream.
pub type EventStream = mpsc::UnboundedReceiver<RunEvent>;

impl EventSink {
    /// Creates a connected sink and stream pair.
    ///
    /// 创建一对相连的发送端与事件流。
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink nobody listens to.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
