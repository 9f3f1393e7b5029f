//! 定义了单次测量运行的可配置参数。
//! Defines the configurable parameters of a single measurement run.

pub mod fields;
pub mod store;

use crate::error::{Error, Result};
use crate::protocol::{DataId, FlushPolicy};
use crate::scheduler::Pacing;
use crate::tracker::Trigger;
use std::time::Duration;
use url::Url;

pub use fields::Fields;
pub use store::FieldStore;

/// Path of the ticket exchange endpoint, relative to the server URL.
pub const TICKET_PATH: &str = "/api/iscp/tickets";

/// Largest accepted payload, in KiB.
pub const MAX_PAYLOAD_KIB: f64 = 1024.0 * 1024.0;

/// A structure containing all parameters of one run. Immutable once the
/// run has started.
///
/// 包含单次运行所有参数的结构体。运行开始后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Base URL of the server; its scheme decides transport security.
    /// 服务器的基础URL；其协议方案决定是否启用传输安全。
    pub server_url: String,
    /// Pre-shared token presented to the ticket exchange.
    /// 提交给票据交换的预共享令牌。
    pub access_token: String,
    /// Node identity used for the connection and the downstream filter.
    /// 用于连接和下行过滤的节点标识。
    pub node_id: String,
    pub data_id: DataId,
    /// Size of every outgoing payload, in bytes.
    /// 每个发出载荷的大小（字节）。
    pub payload_size: usize,
    /// Number of data points to send.
    /// 要发送的数据点数量。
    pub target_count: u64,
    pub mode: Mode,
}

/// Operating mode with its pacing parameters.
///
/// 运行模式及其节奏参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Sustained transfer at a target frequency.
    /// 以目标频率持续传输。
    Bulk {
        frequency_hz: f64,
        /// Zero selects immediate flushing.
        /// 为零时选择立即刷新。
        flush_interval: Duration,
    },
    /// A fixed wait before every send.
    /// 每次发送前固定等待。
    PingPong { interval: Duration },
}

/// Where and how to connect, derived from the server URL.
///
/// 从服务器URL派生出的连接目标与方式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: Option<u16>,
    pub enable_tls: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            server_url: "https://example.intdash.jp".to_owned(),
            access_token: String::new(),
            node_id: String::new(),
            data_id: DataId::new("data_name", "bytes"),
            payload_size: 10 * 1024,
            target_count: 1000,
            mode: Mode::default(),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Bulk {
            frequency_hz: 1000.0,
            flush_interval: Duration::from_millis(10),
        }
    }
}

impl RunConfig {
    /// Builds a run configuration from raw field values. Missing keys take
    /// their defaults.
    ///
    /// 从原始字段值构建运行配置。缺失的键取默认值。
    pub fn from_fields(raw: &Fields) -> Result<Self> {
        let value = |key: &'static str| field_value(raw, key);

        let server_url = value(fields::URL).trim().to_owned();
        Url::parse(&server_url)?;

        let payload_kib = parse_non_negative(fields::PAYLOAD_SIZE, value(fields::PAYLOAD_SIZE))?;
        if payload_kib > MAX_PAYLOAD_KIB {
            return Err(invalid(
                fields::PAYLOAD_SIZE,
                format!("must not exceed {MAX_PAYLOAD_KIB} KiB"),
            ));
        }
        let target_count: u64 = value(fields::LIMIT)
            .trim()
            .parse()
            .map_err(|e| invalid(fields::LIMIT, e))?;
        if target_count == 0 {
            return Err(invalid(fields::LIMIT, "must be at least 1"));
        }

        let mode = match value(fields::MODE).trim().to_ascii_lowercase().as_str() {
            "bulk" => {
                let frequency_hz =
                    parse_non_negative(fields::FREQUENCY, value(fields::FREQUENCY))?;
                if frequency_hz == 0.0 {
                    return Err(invalid(fields::FREQUENCY, "must be greater than zero"));
                }
                // The send period must itself be a representable duration.
                Duration::try_from_secs_f64(1.0 / frequency_hz)
                    .map_err(|_| invalid(fields::FREQUENCY, "send period is out of range"))?;
                let flush_interval =
                    parse_millis(fields::FLUSH_INTERVAL, value(fields::FLUSH_INTERVAL))?;
                Mode::Bulk {
                    frequency_hz,
                    flush_interval,
                }
            }
            "pingpong" | "ping-pong" | "ping_pong" => {
                Mode::PingPong {
                    interval: parse_millis(fields::INTERVAL, value(fields::INTERVAL))?,
                }
            }
            other => return Err(invalid(fields::MODE, format!("unknown mode `{other}`"))),
        };

        Ok(Self {
            server_url,
            access_token: value(fields::TOKEN).to_owned(),
            node_id: value(fields::NODE_ID).to_owned(),
            data_id: DataId::new(value(fields::DATA_NAME), value(fields::DATA_TYPE)),
            payload_size: (payload_kib * 1024.0).round() as usize,
            target_count,
            mode,
        })
    }

    pub fn payload_size_kib(&self) -> f64 {
        self.payload_size as f64 / 1024.0
    }

    /// Immediate for ping/pong and for a zero bulk flush interval.
    ///
    /// 乒乓模式或批量刷新间隔为零时为立即刷新。
    pub fn upstream_flush_policy(&self) -> FlushPolicy {
        match self.mode {
            Mode::Bulk { flush_interval, .. } if !flush_interval.is_zero() => {
                FlushPolicy::Interval(flush_interval)
            }
            _ => FlushPolicy::Immediate,
        }
    }

    pub fn pacing(&self) -> Pacing {
        match self.mode {
            Mode::Bulk { frequency_hz, .. } => Pacing::Bulk { frequency_hz },
            Mode::PingPong { interval } => Pacing::PingPong { interval },
        }
    }

    pub fn trigger(&self) -> Trigger {
        match self.mode {
            Mode::Bulk { .. } => Trigger::SampleCount,
            Mode::PingPong { .. } => Trigger::SequenceNumber,
        }
    }

    /// Splits the server URL into a connection target. Transport security
    /// is enabled iff the scheme is `https` or `wss`.
    ///
    /// 将服务器URL拆分为连接目标。当且仅当协议方案为 `https` 或 `wss` 时启用传输安全。
    pub fn endpoint(&self) -> Result<Endpoint> {
        let url = Url::parse(&self.server_url)?;
        let address = url.host_str().ok_or(Error::MissingHost)?.to_owned();
        Ok(Endpoint {
            address,
            port: url.port(),
            enable_tls: matches!(url.scheme(), "https" | "wss"),
        })
    }

    pub fn ticket_url(&self) -> Result<Url> {
        let base = self.server_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{TICKET_PATH}"))?)
    }

    /// Encodes this configuration back into named fields.
    ///
    /// 将此配置重新编码为命名字段。
    pub fn to_fields(&self) -> Fields {
        let mut out = Fields::defaults();
        let mut put = |key: &str, value: String| {
            // Every key used here is a known key.
            let _ = out.set(key, value);
        };
        put(fields::URL, self.server_url.clone());
        put(fields::TOKEN, self.access_token.clone());
        put(fields::NODE_ID, self.node_id.clone());
        put(fields::DATA_NAME, self.data_id.name.clone());
        put(fields::DATA_TYPE, self.data_id.data_type.clone());
        put(fields::PAYLOAD_SIZE, format_number(self.payload_size_kib()));
        put(fields::LIMIT, self.target_count.to_string());
        match self.mode {
            Mode::Bulk {
                frequency_hz,
                flush_interval,
            } => {
                put(fields::MODE, "bulk".to_owned());
                put(fields::FREQUENCY, format_number(frequency_hz));
                put(fields::FLUSH_INTERVAL, format_number(flush_interval.as_secs_f64() * 1000.0));
            }
            Mode::PingPong { interval } => {
                put(fields::MODE, "pingpong".to_owned());
                put(fields::INTERVAL, format_number(interval.as_secs_f64() * 1000.0));
            }
        }
        out
    }
}

fn field_value<'a>(raw: &'a Fields, key: &'static str) -> &'a str {
    raw.get(key)
        .or_else(|| fields::default_value(key))
        .unwrap_or_default()
}

fn invalid(field: &'static str, reason: impl ToString) -> Error {
    Error::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

fn parse_non_negative(field: &'static str, raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse().map_err(|e| invalid(field, e))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be a non-negative number"));
    }
    Ok(value)
}

/// Parses a non-negative millisecond count into a duration.
fn parse_millis(field: &'static str, raw: &str) -> Result<Duration> {
    let ms = parse_non_negative(field, raw)?;
    Duration::try_from_secs_f64(ms / 1000.0).map_err(|e| invalid(field, e))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as u64)
    } else {
        value.to_string()
    }
}
