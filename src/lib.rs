#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the streaming round-trip probe library.
//! 流式往返探测库的根。
//!
//! A run sends a paced series of data points to its own node over an
//! upstream, observes them echoed back on a downstream, and reports
//! round-trip latency statistics and, in bulk mode, throughput.
//!
//! 一次运行通过上行流向自身节点按节奏发送一系列数据点，在下行流上观察其回显，
//! 并报告往返延迟统计，批量模式下还会报告吞吐量。

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod ticket;
pub mod tracker;
