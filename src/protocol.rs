//! Abstractions over the streaming protocol client.
//!
//! The harness never speaks the wire protocol itself. It drives a connection
//! through the traits in this module, so the real client, the in-process
//! [`loopback`] broker and test doubles are interchangeable.
//!
//! 流协议客户端的抽象。
//!
//! 测量框架本身从不处理线路协议。它通过本模块中的 trait 驱动连接，
//! 因此真实客户端、进程内的 [`loopback`] 代理和测试替身可以互换。

pub mod loopback;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Identifies a data stream by name and type.
///
/// 通过名称和类型标识一个数据流。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataId {
    pub name: String,
    pub data_type: String,
}

impl DataId {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A single timestamped data point.
///
/// 单个带时间戳的数据点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPoint {
    /// Offset from the session's base time, in nanoseconds.
    /// 相对于会话基准时间的偏移量（纳秒）。
    pub elapsed_time: i64,
    pub payload: Bytes,
}

/// Data points of one data id delivered together.
///
/// 同一数据ID下一起投递的数据点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointGroup {
    pub data_id: DataId,
    pub data_points: Vec<DataPoint>,
}

/// A batch of data points received on a downstream.
///
/// 在下行流上接收到的一批数据点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Session id of the upstream that produced the data.
    /// 产生数据的上行流的会话ID。
    pub source_session_id: String,
    /// Sequence number assigned by the peer, starting at 1.
    /// 对端分配的序列号，从1开始。
    pub sequence_number: u32,
    pub groups: Vec<DataPointGroup>,
}

impl Chunk {
    /// Iterates over every data point of every group, in arrival order.
    pub fn data_points(&self) -> impl Iterator<Item = &DataPoint> {
        self.groups.iter().flat_map(|group| group.data_points.iter())
    }
}

/// Delivery guarantee of an upstream.
///
/// 上行流的投递保证。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    Reliable,
    /// No delivery guarantee, lowest latency overhead.
    /// 无投递保证，延迟开销最低。
    Unreliable,
}

/// When buffered upstream data is released to the transport.
///
/// 上行缓冲数据何时释放到传输层。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Every write is flushed on its own.
    /// 每次写入都单独刷新。
    Immediate,
    /// Buffered data is flushed once the interval has elapsed.
    /// 间隔时间到达后刷新缓冲数据。
    Interval(std::time::Duration),
}

/// Parameters for opening an upstream.
///
/// 打开上行流的参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub session_id: String,
    pub qos: Qos,
    pub flush_policy: FlushPolicy,
    pub persist: bool,
    /// Close the session on the server when the upstream closes.
    /// 上行流关闭时在服务器上关闭会话。
    pub close_session: bool,
}

/// Selects which traffic a downstream receives.
///
/// 选择下行流接收哪些流量。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamFilter {
    /// All data addressed to the given node id.
    /// 发往给定节点ID的所有数据。
    AllFor(String),
}

impl DownstreamFilter {
    pub fn matches(&self, node_id: &str) -> bool {
        match self {
            DownstreamFilter::AllFor(id) => id == node_id,
        }
    }
}

/// Parameters for establishing a protocol connection.
///
/// 建立协议连接的参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub address: String,
    pub port: Option<u16>,
    pub enable_tls: bool,
    pub node_id: String,
    /// Short-lived credential obtained from the ticket exchange.
    /// 从票据交换获取的短期凭据。
    pub ticket: String,
}

/// Establishes protocol connections.
///
/// 建立协议连接。
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, params: ConnectParams) -> Result<Self::Connection>;
}

/// An established protocol connection.
///
/// 已建立的协议连接。
#[async_trait]
pub trait Connection: Send {
    type Upstream: Upstream;
    type Downstream: Downstream;

    async fn open_upstream(&mut self, config: UpstreamConfig) -> Result<Self::Upstream>;

    async fn open_downstream(&mut self, filter: DownstreamFilter) -> Result<Self::Downstream>;

    async fn close(&mut self) -> Result<()>;
}

/// An outgoing directional channel.
///
/// 出站方向的通道。
#[async_trait]
pub trait Upstream: Send {
    /// Writes data points under a data id. Completes once the write is accepted.
    ///
    /// 在数据ID下写入数据点。写入被接受后完成。
    async fn write_data_points(&mut self, data_id: &DataId, points: Vec<DataPoint>) -> Result<()>;

    /// Releases all buffered data to the transport.
    async fn flush(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An incoming directional channel.
///
/// 入站方向的通道。
#[async_trait]
pub trait Downstream: Send {
    /// Waits for the next chunk. Returns `None` once the downstream is closed.
    ///
    /// 等待下一个数据块。下行流关闭后返回 `None`。
    async fn next_chunk(&mut self) -> Option<Chunk>;

    /// Closes the downstream. Closing an already closed downstream is a no-op.
    ///
    /// 关闭下行流。关闭已关闭的下行流不执行任何操作。
    async fn close(&mut self) -> Result<()>;
}
