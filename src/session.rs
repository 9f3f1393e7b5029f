//! The identity and time origin of a single measurement run.
//! 单次测量运行的标识与时间原点。

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// A single run's identity: a unique session id and a fixed base time.
///
/// Every outgoing data point is stamped with its offset from `base_time`,
/// and every echoed data point is mapped back to its send instant through
/// the same origin. The session is immutable once started.
///
/// 单次运行的标识：唯一的会话ID与固定的基准时间。
///
/// 每个发出的数据点都以其相对 `base_time` 的偏移量打上时间戳，每个回显的数据点
/// 也通过同一原点映射回其发送时刻。会话启动后不可变。
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    base_time: Instant,
    target_node_id: String,
}

impl Session {
    /// Starts a new session, capturing the base time exactly once.
    ///
    /// 启动一个新会话，仅捕获一次基准时间。
    pub fn start(target_node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            base_time: Instant::now(),
            target_node_id: target_node_id.into(),
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the session identifier in the form carried on the wire.
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }

    /// Returns the monotonic instant all elapsed times are measured from.
    pub fn base_time(&self) -> Instant {
        self.base_time
    }

    pub fn target_node_id(&self) -> &str {
        &self.target_node_id
    }

    /// Returns `now - base_time` in signed nanoseconds.
    ///
    /// 返回 `now - base_time`，单位为有符号纳秒。
    pub fn elapsed(&self, now: Instant) -> i64 {
        if now >= self.base_time {
            saturating_nanos(now - self.base_time)
        } else {
            -saturating_nanos(self.base_time - now)
        }
    }

    /// Reconstructs the send instant of a data point from its elapsed time.
    ///
    /// 根据数据点的经过时间重建其发送时刻。
    pub fn instant_at(&self, elapsed_nanos: i64) -> Instant {
        let offset = Duration::from_nanos(elapsed_nanos.unsigned_abs());
        let shifted = if elapsed_nanos >= 0 {
            self.base_time.checked_add(offset)
        } else {
            self.base_time.checked_sub(offset)
        };
        shifted.unwrap_or(self.base_time)
    }
}

fn saturating_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Returns `later - earlier` in fractional milliseconds, negative when
/// `later` precedes `earlier`.
///
/// 返回 `later - earlier` 的毫秒数（小数），当 `later` 早于 `earlier` 时为负。
pub fn signed_millis(later: Instant, earlier: Instant) -> f64 {
    if later >= earlier {
        (later - earlier).as_secs_f64() * 1_000.0
    } else {
        -((earlier - later).as_secs_f64() * 1_000.0)
    }
}
