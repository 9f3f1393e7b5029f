//! Paces outgoing data points onto an upstream.
//!
//! Two disciplines are supported. Bulk pacing targets a send frequency and
//! carries late remainders forward so that drift never accumulates beyond
//! one interval. Ping/pong pacing waits a fixed interval before every send.
//!
//! 将发出的数据点按节奏写入上行流。
//!
//! 支持两种节奏控制方式。批量模式以发送频率为目标，并将迟到的余量结转，
//! 使漂移的累积不超过一个间隔。乒乓模式在每次发送前等待固定间隔。

use crate::error::Result;
use crate::protocol::{DataId, DataPoint, Upstream};
use crate::session::Session;
use bytes::Bytes;
use rand::RngCore;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

#[cfg(test)]
mod tests;

/// Remainders shorter than this are carried instead of slept.
const MIN_SLEEP_MS: f64 = 1.0;

/// How the scheduler spaces its sends.
///
/// 调度器如何安排发送间隔。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Drift-compensated pacing at `1000 / frequency_hz` ms per send.
    /// 以每次发送 `1000 / frequency_hz` 毫秒进行漂移补偿的节奏控制。
    Bulk { frequency_hz: f64 },
    /// Suspend for `interval` before every send.
    /// 每次发送前挂起 `interval`。
    PingPong { interval: Duration },
}

/// Carry-over state of the bulk pacing loop.
///
/// After each send, `wait = interval - spent + deficit`. A wait of at least
/// one millisecond is slept and resets the deficit; anything shorter is not
/// slept and becomes the new deficit.
///
/// 批量节奏循环的结转状态。
///
/// 每次发送后，`wait = interval - spent + deficit`。至少一毫秒的等待会被执行并清零结转量；
/// 更短的等待不执行，而是成为新的结转量。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCompensator {
    interval_ms: f64,
    deficit_ms: f64,
}

impl DriftCompensator {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            interval_ms: 1000.0 / frequency_hz,
            deficit_ms: 0.0,
        }
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// The remainder currently carried, zero or negative when behind schedule.
    pub fn deficit_ms(&self) -> f64 {
        self.deficit_ms
    }

    /// Returns how long to sleep after a send that took `spent`.
    ///
    /// 返回耗时 `spent` 的发送之后应睡眠的时长。
    pub fn next_wait(&mut self, spent: Duration) -> Option<Duration> {
        let wait_ms = self.interval_ms - spent.as_secs_f64() * 1000.0 + self.deficit_ms;
        if wait_ms >= MIN_SLEEP_MS {
            self.deficit_ms = 0.0;
            // Clamped when beyond the range of `Duration`.
            Some(Duration::try_from_secs_f64(wait_ms / 1000.0).unwrap_or(Duration::MAX))
        } else {
            self.deficit_ms = wait_ms;
            None
        }
    }
}

/// Produces exactly `count` data points at the configured cadence.
///
/// 按配置的节奏生成恰好 `count` 个数据点。
#[derive(Debug, Clone)]
pub struct TransmissionScheduler {
    data_id: DataId,
    payload_size: usize,
    count: u64,
    pacing: Pacing,
}

impl TransmissionScheduler {
    pub fn new(data_id: DataId, payload_size: usize, count: u64, pacing: Pacing) -> Self {
        Self {
            data_id,
            payload_size,
            count,
            pacing,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Runs the send loop to completion and returns the number of writes.
    ///
    /// In bulk mode the upstream is flushed and closed afterwards. In
    /// ping/pong mode it is left open.
    ///
    /// 运行发送循环直至完成，并返回写入次数。
    /// 批量模式下随后会刷新并关闭上行流；乒乓模式下保持打开。
    pub async fn run<U>(&self, session: &Session, upstream: &mut U) -> Result<u64>
    where
        U: Upstream + ?Sized,
    {
        match self.pacing {
            Pacing::Bulk { frequency_hz } => self.run_bulk(session, upstream, frequency_hz).await,
            Pacing::PingPong { interval } => self.run_ping_pong(session, upstream, interval).await,
        }
    }

    async fn run_bulk<U>(
        &self,
        session: &Session,
        upstream: &mut U,
        frequency_hz: f64,
    ) -> Result<u64>
    where
        U: Upstream + ?Sized,
    {
        let mut compensator = DriftCompensator::new(frequency_hz);
        let mut sent = 0;

        for _ in 0..self.count {
            let t0 = Instant::now();
            self.send_one(session, upstream, t0).await?;
            sent += 1;

            let spent = t0.elapsed();
            match compensator.next_wait(spent) {
                Some(wait) => sleep(wait).await,
                None => trace!(
                    deficit_ms = compensator.deficit_ms(),
                    "behind schedule, not sleeping"
                ),
            }
        }

        upstream.flush().await?;
        upstream.close().await?;
        debug!(sent, "bulk transmission finished");
        Ok(sent)
    }

    async fn run_ping_pong<U>(
        &self,
        session: &Session,
        upstream: &mut U,
        interval: Duration,
    ) -> Result<u64>
    where
        U: Upstream + ?Sized,
    {
        let mut sent = 0;
        for _ in 0..self.count {
            sleep(interval).await;
            self.send_one(session, upstream, Instant::now()).await?;
            sent += 1;
        }
        debug!(sent, "ping/pong transmission finished");
        Ok(sent)
    }

    async fn send_one<U>(
        &self,
        session: &Session,
        upstream: &mut U,
        departure: Instant,
    ) -> Result<()>
    where
        U: Upstream + ?Sized,
    {
        let point = DataPoint {
            elapsed_time: session.elapsed(departure),
            payload: random_payload(self.payload_size),
        };
        upstream.write_data_points(&self.data_id, vec![point]).await
    }
}

/// Returns `len` freshly generated random bytes.
pub fn random_payload(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}
