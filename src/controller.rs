//! Orchestrates one end-to-end measurement run.
//!
//! The controller obtains a ticket, connects, opens one upstream and one
//! downstream, then drives the transmission scheduler and the correlation
//! tracker concurrently on the current task until the run completes or
//! fails. Every failure collapses into a single `Failed` outcome.
//!
//! 编排一次端到端的测量运行。
//!
//! 控制器获取票据并建立连接，打开一个上行流和一个下行流，然后在当前任务上并发驱动
//! 发送调度器与关联追踪器，直到运行完成或失败。所有失败都会归并为单一的 `Failed` 结果。

use crate::config::{Mode, RunConfig};
use crate::error::{Error, Result};
use crate::event::{EventSink, RunEvent};
use crate::protocol::{ConnectParams, Connection, Connector, DownstreamFilter, Qos, UpstreamConfig};
use crate::scheduler::TransmissionScheduler;
use crate::session::Session;
use crate::stats::Report;
use crate::ticket::TicketSource;
use crate::tracker::CorrelationTracker;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};


/// Lifecycle state of a run.
///
/// 运行的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Fetching the ticket and establishing the connection.
    /// 正在获取票据并建立连接。
    Connecting,
    /// Streams are open and the scheduler and tracker are running.
    /// 流已打开，调度器和追踪器正在运行。
    Streaming,
    Completed,
    Failed,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Connecting => "Connecting",
            RunState::Streaming => "Streaming",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }

    /// Whether no further transition can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Validates run state transitions.
///
/// 运行状态转换的验证器。
pub struct StateValidator;

impl StateValidator {
    /// 验证状态转换是否合法
    /// Validate if state transition is legal
    pub fn is_valid_transition(current: RunState, next: RunState) -> bool {
        use RunState::*;

        match (current, next) {
            (Idle, Connecting) => true,
            (Connecting, Streaming) => true,
            (Streaming, Completed) => true,
            // Any live state may fail.
            // 任何未结束的状态都可以失败。
            (Idle | Connecting | Streaming, Failed) => true,
            _ => false,
        }
    }
}

/// Result of a finished run.
///
/// 一次已结束运行的结果。
#[derive(Debug)]
pub struct RunOutcome {
    /// `Completed` or `Failed`.
    pub state: RunState,
    /// The final statistics snapshot of a completed run.
    /// 已完成运行的最终统计快照。
    pub report: Option<Report>,
    /// The concrete cause of a failed run. Operators only ever see the
    /// generic failure line.
    ///
    /// 失败运行的具体原因。操作员只会看到通用的失败行。
    pub error: Option<Error>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Drives a single run over a connector and a ticket source.
///
/// 通过连接器和票据来源驱动单次运行。
pub struct RunController<C, T> {
    config: RunConfig,
    connector: C,
    tickets: T,
    events: EventSink,
    state: RunState,
}

impl<C, T> RunController<C, T>
where
    C: Connector,
    T: TicketSource,
{
    pub fn new(config: RunConfig, connector: C, tickets: T, events: EventSink) -> Self {
        Self {
            config,
            connector,
            tickets,
            events,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs to completion or failure.
    ///
    /// `Busy(true)` is always the first event and `Busy(false)` always the
    /// last, whichever step fails.
    ///
    /// 运行直至完成或失败。
    /// 无论哪一步失败，`Busy(true)` 总是第一个事件，`Busy(false)` 总是最后一个事件。
    pub async fn run(mut self) -> RunOutcome {
        self.events.emit(RunEvent::Busy(true));

        let outcome = match self.execute().await {
            Ok(report) => RunOutcome {
                state: self.state,
                report,
                error: None,
            },
            Err(e) => {
                error!(error = %e, state = self.state.name(), "run failed");
                if let Err(invalid) = self.transition(RunState::Failed) {
                    warn!(error = %invalid, "could not record failure state");
                    self.state = RunState::Failed;
                }
                self.events.emit(RunEvent::Failed);
                RunOutcome {
                    state: RunState::Failed,
                    report: None,
                    error: Some(e),
                }
            }
        };

        self.events.emit(RunEvent::Busy(false));
        outcome
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        if !StateValidator::is_valid_transition(self.state, next) {
            return Err(Error::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        info!(from = self.state.name(), to = next.name(), "run state changed");
        self.state = next;
        self.events.emit(RunEvent::State(next));
        Ok(())
    }

    async fn execute(&mut self) -> Result<Option<Report>> {
        self.transition(RunState::Connecting)?;

        let ticket = self.tickets.fetch_ticket().await?;
        let endpoint = self.config.endpoint()?;
        let mut conn = self
            .connector
            .connect(ConnectParams {
                address: endpoint.address,
                port: endpoint.port,
                enable_tls: endpoint.enable_tls,
                node_id: self.config.node_id.clone(),
                ticket,
            })
            .await?;

        match self.stream(&mut conn).await {
            Ok(report) => {
                conn.close().await?;
                self.transition(RunState::Completed)?;
                Ok(report)
            }
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "closing connection after failure also failed");
                }
                Err(e)
            }
        }
    }

    async fn stream(&mut self, conn: &mut C::Connection) -> Result<Option<Report>> {
        let session = Session::start(self.config.node_id.clone());
        let mut upstream = conn
            .open_upstream(UpstreamConfig {
                session_id: session.id_string(),
                qos: Qos::Unreliable,
                flush_policy: self.config.upstream_flush_policy(),
                persist: false,
                close_session: true,
            })
            .await?;
        let mut downstream = conn
            .open_downstream(DownstreamFilter::AllFor(self.config.node_id.clone()))
            .await?;
        self.transition(RunState::Streaming)?;
        debug!(session = %session.id(), node_id = %self.config.node_id, "streams opened");

        let scheduler = TransmissionScheduler::new(
            self.config.data_id.clone(),
            self.config.payload_size,
            self.config.target_count,
            self.config.pacing(),
        );
        let mut tracker = CorrelationTracker::new(
            session.clone(),
            self.config.target_count,
            self.config.trigger(),
            self.config.payload_size_kib(),
            self.events.clone(),
        );
        let (completed_tx, mut completed_rx) = watch::channel(false);

        match self.config.mode {
            Mode::Bulk { .. } => {
                // The tracker only returns Ok once it closed the downstream.
                let (sent, ()) = tokio::try_join!(
                    scheduler.run(&session, &mut upstream),
                    tracker.run(&mut downstream, &completed_tx),
                )?;
                debug!(sent, "bulk run drained");
            }
            Mode::PingPong { .. } => {
                tokio::select! {
                    sent = async {
                        let sent = scheduler.run(&session, &mut upstream).await?;
                        completed_rx
                            .wait_for(|done| *done)
                            .await
                            .map_err(|_| Error::ChannelClosed)?;
                        Ok::<_, Error>(sent)
                    } => {
                        let sent = sent?;
                        debug!(sent, "ping/pong run finished");
                    }
                    received = tracker.run(&mut downstream, &completed_tx) => received?,
                }
            }
        }

        Ok(tracker.last_report().copied())
    }
}
