//! An in-process echo broker implementing the protocol traits.
//!
//! Every flushed upstream batch becomes one [`Chunk`], stamped with the next
//! sequence number of that upstream and delivered, after a fixed latency,
//! to the downstream whose filter matches the writer's node id.
//!
//! 实现协议 trait 的进程内回显代理。
//!
//! 每个被刷新的上行批次都会成为一个 [`Chunk`]，带上该上行流的下一个序列号，
//! 并在固定延迟后投递给过滤条件匹配写入方节点ID的下行流。

use super::{
    Chunk, ConnectParams, Connection, Connector, DataId, DataPoint, DataPointGroup, Downstream,
    DownstreamFilter, FlushPolicy, Upstream, UpstreamConfig,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior, sleep_until};
use tracing::{debug, trace};

/// Capacity of the broker's delivery queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of each upstream's command queue.
const UPSTREAM_COMMAND_CAPACITY: usize = 64;

/// A chunk in flight inside the broker.
#[derive(Debug)]
struct Delivery {
    deliver_at: Instant,
    node_id: String,
    chunk: Chunk,
}

/// Connector for the loopback broker. Accepts exactly one connection.
///
/// 回环代理的连接器。只接受一个连接。
#[derive(Debug)]
pub struct LoopbackConnector {
    latency: Duration,
    tx: mpsc::Sender<Delivery>,
    rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
}

impl LoopbackConnector {
    /// Creates a broker that delivers every chunk `latency` after it is flushed.
    ///
    /// 创建一个在刷新后经过 `latency` 投递每个数据块的代理。
    pub fn new(latency: Duration) -> Self {
        Self::with_capacity(latency, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(latency: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            latency,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Returns a handle that pushes arbitrary chunks into the broker.
    ///
    /// 返回一个可向代理推送任意数据块的句柄。
    pub fn injector(&self) -> LoopbackInjector {
        LoopbackInjector {
            tx: self.tx.clone(),
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Connection = LoopbackConnection;

    async fn connect(&self, params: ConnectParams) -> Result<LoopbackConnection> {
        if params.ticket.is_empty() {
            return Err(Error::Protocol("loopback broker refused an empty ticket".into()));
        }
        let rx = self
            .rx
            .lock()
            .map_err(|_| Error::Protocol("loopback broker state is poisoned".into()))?
            .take()
            .ok_or_else(|| Error::Protocol("loopback broker is already connected".into()))?;

        debug!(
            address = %params.address,
            node_id = %params.node_id,
            tls = params.enable_tls,
            "loopback connection established"
        );
        Ok(LoopbackConnection {
            node_id: params.node_id,
            latency: self.latency,
            tx: self.tx.clone(),
            rx: Some(rx),
            closed: false,
        })
    }
}

/// Pushes chunks straight into a loopback broker.
#[derive(Debug, Clone)]
pub struct LoopbackInjector {
    tx: mpsc::Sender<Delivery>,
}

impl LoopbackInjector {
    /// Queues `chunk` for immediate delivery to downstreams of `node_id`.
    ///
    /// 将 `chunk` 排队，立即投递给 `node_id` 的下行流。
    pub async fn inject(&self, node_id: &str, chunk: Chunk) -> Result<()> {
        let delivery = Delivery {
            deliver_at: Instant::now(),
            node_id: node_id.to_owned(),
            chunk,
        };
        self.tx.send(delivery).await.map_err(|_| Error::ChannelClosed)
    }
}

/// A connection to the loopback broker.
#[derive(Debug)]
pub struct LoopbackConnection {
    node_id: String,
    latency: Duration,
    tx: mpsc::Sender<Delivery>,
    rx: Option<mpsc::Receiver<Delivery>>,
    closed: bool,
}

#[async_trait]
impl Connection for LoopbackConnection {
    type Upstream = LoopbackUpstream;
    type Downstream = LoopbackDownstream;

    async fn open_upstream(&mut self, config: UpstreamConfig) -> Result<LoopbackUpstream> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        debug!(
            session = %config.session_id,
            flush = ?config.flush_policy,
            "loopback upstream opened"
        );
        let packer = BatchPacker {
            session_id: config.session_id,
            node_id: self.node_id.clone(),
            latency: self.latency,
            tx: self.tx.clone(),
            buffer: Vec::new(),
            next_sequence: 1,
        };
        let (commands, rx) = mpsc::channel(UPSTREAM_COMMAND_CAPACITY);
        tokio::spawn(run_flusher(packer, config.flush_policy, rx));
        Ok(LoopbackUpstream {
            commands: Some(commands),
        })
    }

    async fn open_downstream(&mut self, filter: DownstreamFilter) -> Result<LoopbackDownstream> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let rx = self
            .rx
            .take()
            .ok_or_else(|| Error::Protocol("loopback supports a single downstream".into()))?;
        Ok(LoopbackDownstream {
            filter,
            rx,
            closed: false,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A request from an upstream handle to its flusher task.
#[derive(Debug)]
enum UpstreamCommand {
    Write {
        data_id: DataId,
        points: Vec<DataPoint>,
        ack: oneshot::Sender<()>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Buffers points and packs them into sequenced chunks.
#[derive(Debug)]
struct BatchPacker {
    session_id: String,
    node_id: String,
    latency: Duration,
    tx: mpsc::Sender<Delivery>,
    buffer: Vec<(DataId, DataPoint)>,
    next_sequence: u32,
}

impl BatchPacker {
    fn push(&mut self, data_id: DataId, points: Vec<DataPoint>) {
        self.buffer
            .extend(points.into_iter().map(|point| (data_id.clone(), point)));
    }

    /// Packs the buffer into one chunk and hands it to the broker.
    async fn release(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut groups: Vec<DataPointGroup> = Vec::new();
        for (data_id, point) in self.buffer.drain(..) {
            match groups.last_mut() {
                Some(group) if group.data_id == data_id => group.data_points.push(point),
                _ => groups.push(DataPointGroup {
                    data_id,
                    data_points: vec![point],
                }),
            }
        }

        let sequence_number = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let delivery = Delivery {
            deliver_at: Instant::now() + self.latency,
            node_id: self.node_id.clone(),
            chunk: Chunk {
                source_session_id: self.session_id.clone(),
                sequence_number,
                groups,
            },
        };
        trace!(seq = sequence_number, "loopback chunk released");

        // The echo side may already be gone; the writer does not notice.
        if self.tx.send(delivery).await.is_err() {
            debug!(seq = sequence_number, "loopback chunk dropped, no downstream");
        }
    }
}

/// Owns one upstream's buffer. An interval policy releases it on every
/// tick of a period started when the upstream opened, whether or not
/// further writes arrive. The task ends once every handle is gone,
/// releasing what is left.
///
/// 持有一个上行流的缓冲区。间隔策略在上行流打开时开始的周期的每个节拍释放缓冲区，
/// 无论之后是否还有写入。所有句柄消失后任务结束，并释放剩余数据。
async fn run_flusher(
    mut packer: BatchPacker,
    policy: FlushPolicy,
    mut commands: mpsc::Receiver<UpstreamCommand>,
) {
    let mut ticker = match policy {
        FlushPolicy::Interval(period) if !period.is_zero() => {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        _ => None,
    };
    let immediate = ticker.is_none();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(UpstreamCommand::Write { data_id, points, ack }) => {
                    packer.push(data_id, points);
                    if immediate {
                        packer.release().await;
                    }
                    let _ = ack.send(());
                }
                Some(UpstreamCommand::Flush { ack }) => {
                    packer.release().await;
                    let _ = ack.send(());
                }
                None => {
                    packer.release().await;
                    break;
                }
            },
            _ = next_tick(&mut ticker) => packer.release().await,
        }
    }
    trace!(session = %packer.session_id, "loopback flusher stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Upstream side of the loopback broker.
#[derive(Debug)]
pub struct LoopbackUpstream {
    commands: Option<mpsc::Sender<UpstreamCommand>>,
}

impl LoopbackUpstream {
    /// Hands a command to the flusher and waits until it was applied.
    async fn request<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<()>) -> UpstreamCommand,
    {
        let commands = self.commands.as_ref().ok_or(Error::StreamClosed)?;
        let (ack, done) = oneshot::channel();
        commands
            .send(command(ack))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        done.await.map_err(|_| Error::ChannelClosed)
    }
}

#[async_trait]
impl Upstream for LoopbackUpstream {
    async fn write_data_points(&mut self, data_id: &DataId, points: Vec<DataPoint>) -> Result<()> {
        let data_id = data_id.clone();
        self.request(|ack| UpstreamCommand::Write {
            data_id,
            points,
            ack,
        })
        .await
    }

    async fn flush(&mut self) -> Result<()> {
        self.request(|ack| UpstreamCommand::Flush { ack }).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.commands.is_some() {
            self.request(|ack| UpstreamCommand::Flush { ack }).await?;
            self.commands = None;
        }
        Ok(())
    }
}

/// Downstream side of the loopback broker.
#[derive(Debug)]
pub struct LoopbackDownstream {
    filter: DownstreamFilter,
    rx: mpsc::Receiver<Delivery>,
    closed: bool,
}

#[async_trait]
impl Downstream for LoopbackDownstream {
    async fn next_chunk(&mut self) -> Option<Chunk> {
        loop {
            if self.closed {
                return None;
            }
            let delivery = self.rx.recv().await?;
            sleep_until(delivery.deliver_at).await;
            if self.filter.matches(&delivery.node_id) {
                return Some(delivery.chunk);
            }
            trace!(node_id = %delivery.node_id, "loopback chunk filtered out");
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.rx.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Qos;
    use bytes::Bytes;

    fn params(ticket: &str) -> ConnectParams {
        ConnectParams {
            address: "loopback".into(),
            port: None,
            enable_tls: false,
            node_id: "node-a".into(),
            ticket: ticket.into(),
        }
    }

    fn upstream_config(flush_policy: FlushPolicy) -> UpstreamConfig {
        UpstreamConfig {
            session_id: "session-1".into(),
            qos: Qos::Unreliable,
            flush_policy,
            persist: false,
            close_session: true,
        }
    }

    fn point(elapsed_time: i64) -> DataPoint {
        DataPoint {
            elapsed_time,
            payload: Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn test_empty_ticket_is_refused() {
        let connector = LoopbackConnector::new(Duration::ZERO);
        assert!(matches!(
            connector.connect(params("")).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_single_connection_only() {
        let connector = LoopbackConnector::new(Duration::ZERO);
        let _conn = connector.connect(params("t")).await.unwrap();
        assert!(connector.connect(params("t")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_flush_echoes_each_write_after_latency() {
        let connector = LoopbackConnector::new(Duration::from_millis(5));
        let mut conn = connector.connect(params("t")).await.unwrap();
        let mut up = conn
            .open_upstream(upstream_config(FlushPolicy::Immediate))
            .await
            .unwrap();
        let mut down = conn
            .open_downstream(DownstreamFilter::AllFor("node-a".into()))
            .await
            .unwrap();
        let id = DataId::new("d", "bytes");

        let start = Instant::now();
        up.write_data_points(&id, vec![point(1)]).await.unwrap();
        up.write_data_points(&id, vec![point(2)]).await.unwrap();

        let first = down.next_chunk().await.unwrap();
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(5) && waited < Duration::from_millis(7));
        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.source_session_id, "session-1");
        assert_eq!(first.data_points().map(|p| p.elapsed_time).collect::<Vec<_>>(), vec![1]);

        let second = down.next_chunk().await.unwrap();
        assert_eq!(second.sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_batches_until_flushed() {
        let connector = LoopbackConnector::new(Duration::ZERO);
        let mut conn = connector.connect(params("t")).await.unwrap();
        let mut up = conn
            .open_upstream(upstream_config(FlushPolicy::Interval(Duration::from_secs(60))))
            .await
            .unwrap();
        let mut down = conn
            .open_downstream(DownstreamFilter::AllFor("node-a".into()))
            .await
            .unwrap();
        let id = DataId::new("d", "bytes");

        for i in 0..3 {
            up.write_data_points(&id, vec![point(i)]).await.unwrap();
        }
        up.close().await.unwrap();

        let chunk = down.next_chunk().await.unwrap();
        assert_eq!(chunk.sequence_number, 1);
        assert_eq!(chunk.groups.len(), 1);
        assert_eq!(chunk.data_points().count(), 3);

        assert!(matches!(
            up.write_data_points(&id, vec![point(9)]).await,
            Err(Error::StreamClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_releases_on_tick_without_further_writes() {
        let connector = LoopbackConnector::new(Duration::from_millis(5));
        let mut conn = connector.connect(params("t")).await.unwrap();
        let mut up = conn
            .open_upstream(upstream_config(FlushPolicy::Interval(Duration::from_millis(10))))
            .await
            .unwrap();
        let mut down = conn
            .open_downstream(DownstreamFilter::AllFor("node-a".into()))
            .await
            .unwrap();
        let id = DataId::new("d", "bytes");

        let start = Instant::now();
        up.write_data_points(&id, vec![point(1)]).await.unwrap();

        // Released on the first 10 ms tick, then 5 ms on the link.
        let chunk = down.next_chunk().await.unwrap();
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(15) && waited < Duration::from_millis(17));
        assert_eq!(chunk.sequence_number, 1);

        // An empty tick sends nothing; the next point gets the next sequence number.
        tokio::time::sleep(Duration::from_millis(30)).await;
        up.write_data_points(&id, vec![point(2)]).await.unwrap();
        assert_eq!(down.next_chunk().await.unwrap().sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downstream_filters_by_node() {
        let connector = LoopbackConnector::new(Duration::ZERO);
        let injector = connector.injector();
        let mut conn = connector.connect(params("t")).await.unwrap();
        let mut down = conn
            .open_downstream(DownstreamFilter::AllFor("node-a".into()))
            .await
            .unwrap();

        let chunk = |seq| Chunk {
            source_session_id: "other".into(),
            sequence_number: seq,
            groups: Vec::new(),
        };
        injector.inject("node-b", chunk(1)).await.unwrap();
        injector.inject("node-a", chunk(2)).await.unwrap();

        assert_eq!(down.next_chunk().await.unwrap().sequence_number, 2);
    }

    #[tokio::test]
    async fn test_closed_downstream_yields_none() {
        let connector = LoopbackConnector::new(Duration::ZERO);
        let mut conn = connector.connect(params("t")).await.unwrap();
        let mut down = conn
            .open_downstream(DownstreamFilter::AllFor("node-a".into()))
            .await
            .unwrap();
        down.close().await.unwrap();
        down.close().await.unwrap();
        assert!(down.next_chunk().await.is_none());
    }
}
