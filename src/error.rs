//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the probe library.
/// 探测库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured server URL could not be parsed.
    /// 配置的服务器URL无法解析。
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server URL parsed but carries no host name.
    /// 服务器URL可以解析，但没有主机名。
    #[error("server URL has no host")]
    MissingHost,

    /// A configuration field held a value that cannot be used.
    /// 配置字段的值无法使用。
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// The HTTP client failed before a response was received.
    /// HTTP客户端在收到响应前失败。
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The ticket endpoint answered with a non-success status.
    /// 票据端点返回了非成功状态。
    #[error("ticket request rejected with status {status}")]
    TicketRejected { status: u16 },

    /// Persisted fields could not be encoded or decoded.
    /// 持久化字段无法编码或解码。
    #[error("field store error: {0}")]
    Persist(#[from] serde_json::Error),

    /// A failure reported by the streaming protocol client.
    /// 流协议客户端报告的失败。
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A stream was used after it was closed, or ended before the run finished.
    /// 流在关闭后被使用，或在运行结束前终止。
    #[error("stream is closed")]
    StreamClosed,

    /// The protocol connection was closed.
    /// 协议连接已关闭。
    #[error("connection is closed")]
    ConnectionClosed,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("Internal channel is broken")]
    ChannelClosed,

    /// The run controller was asked to make an illegal state transition.
    /// 运行控制器被要求进行非法的状态转换。
    #[error("illegal run state transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::InvalidUrl(e) => std::io::Error::new(ErrorKind::InvalidInput, e),
            Error::MissingHost => ErrorKind::InvalidInput.into(),
            Error::InvalidField { .. } => ErrorKind::InvalidInput.into(),
            Error::Http(e) => std::io::Error::other(e),
            Error::TicketRejected { .. } => ErrorKind::PermissionDenied.into(),
            Error::Persist(e) => std::io::Error::new(ErrorKind::InvalidData, e),
            Error::Protocol(msg) => std::io::Error::other(msg),
            Error::StreamClosed => ErrorKind::BrokenPipe.into(),
            Error::ConnectionClosed => ErrorKind::ConnectionReset.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
            Error::InvalidTransition { .. } => ErrorKind::Other.into(),
        }
    }
}
