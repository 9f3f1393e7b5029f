//! Tests for the transmission scheduler.
//! 发送调度器的测试。

use super::*;
use crate::error::Error;
use async_trait::async_trait;

const TOLERANCE_MS: f64 = 1.0 + 1e-6;

fn ms_between(later: Instant, earlier: Instant) -> f64 {
    crate::session::signed_millis(later, earlier)
}

fn assert_wait(wait: Option<Duration>, expected_ms: f64) {
    let wait = wait.expect("expected the compensator to sleep");
    assert!((wait.as_secs_f64() * 1000.0 - expected_ms).abs() < 1e-6, "waited {wait:?}");
}

fn assert_near(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= TOLERANCE_MS,
        "expected ~{expected} ms, got {actual} ms"
    );
}

/// An upstream that records every write and spends a scripted amount of
/// time on each one.
#[derive(Default)]
struct RecordingUpstream {
    costs: Vec<Duration>,
    writes: Vec<(Instant, DataPoint)>,
    flushed: bool,
    closed: bool,
    fail_after: Option<usize>,
}

impl RecordingUpstream {
    fn with_costs(costs_ms: &[u64]) -> Self {
        Self {
            costs: costs_ms.iter().map(|&ms| Duration::from_millis(ms)).collect(),
            ..Default::default()
        }
    }

    fn departures(&self) -> Vec<Instant> {
        self.writes.iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn write_data_points(&mut self, data_id: &DataId, points: Vec<DataPoint>) -> Result<()> {
        assert_eq!(data_id, &DataId::new("probe", "bytes"));
        assert_eq!(points.len(), 1);
        if self.fail_after == Some(self.writes.len()) {
            return Err(Error::Protocol("write rejected".into()));
        }
        let index = self.writes.len();
        for point in points {
            self.writes.push((Instant::now(), point));
        }
        let cost = self.costs.get(index).or(self.costs.last()).copied().unwrap_or_default();
        if !cost.is_zero() {
            sleep(cost).await;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushed = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn scheduler(count: u64, pacing: Pacing) -> TransmissionScheduler {
    TransmissionScheduler::new(DataId::new("probe", "bytes"), 64, count, pacing)
}

#[test]
fn test_compensator_sleeps_the_remainder_of_the_interval() {
    let mut compensator = DriftCompensator::new(100.0);
    assert_eq!(compensator.interval_ms(), 10.0);

    assert_wait(compensator.next_wait(Duration::from_millis(2)), 8.0);
    assert_eq!(compensator.deficit_ms(), 0.0);
}

#[test]
fn test_compensator_carries_late_remainder_into_next_wait() {
    let mut compensator = DriftCompensator::new(100.0);

    assert!(compensator.next_wait(Duration::from_millis(15)).is_none());
    assert!((compensator.deficit_ms() + 5.0).abs() < 1e-9);

    // 10 - 1 - 5 = 4 ms, deficit paid back.
    assert_wait(compensator.next_wait(Duration::from_millis(1)), 4.0);
    assert_eq!(compensator.deficit_ms(), 0.0);
}

#[test]
fn test_compensator_carries_sub_millisecond_remainder() {
    let mut compensator = DriftCompensator::new(100.0);

    // 10 - 9.5 = 0.5 ms is too short to sleep, so it is carried.
    assert!(compensator.next_wait(Duration::from_micros(9_500)).is_none());
    assert!((compensator.deficit_ms() - 0.5).abs() < 1e-9);

    assert_wait(compensator.next_wait(Duration::ZERO), 10.5);
}

#[test]
fn test_compensator_clamps_waits_beyond_duration_range() {
    let mut compensator = DriftCompensator::new(1e-300);
    assert_eq!(compensator.next_wait(Duration::ZERO), Some(Duration::MAX));
    assert_eq!(compensator.deficit_ms(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_issues_exactly_count_writes_then_flushes_and_closes() {
    let session = Session::start("node");
    let mut upstream = RecordingUpstream::default();

    let sent = scheduler(50, Pacing::Bulk { frequency_hz: 100.0 })
        .run(&session, &mut upstream)
        .await
        .unwrap();

    assert_eq!(sent, 50);
    assert_eq!(upstream.writes.len(), 50);
    assert!(upstream.flushed);
    assert!(upstream.closed);

    let base = upstream.writes[0].0;
    for (k, at) in upstream.departures().into_iter().enumerate() {
        assert_near(ms_between(at, base), k as f64 * 10.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_bulk_drift_stays_within_one_interval_after_slow_sends() {
    let session = Session::start("node");
    // Two sends slower than the 10 ms interval, then fast sends.
    let mut upstream = RecordingUpstream::with_costs(&[15, 15, 1]);

    scheduler(12, Pacing::Bulk { frequency_hz: 100.0 })
        .run(&session, &mut upstream)
        .await
        .unwrap();

    let departures = upstream.departures();
    let base = departures[0];
    for (k, at) in departures.iter().enumerate() {
        let lag = ms_between(*at, base) - k as f64 * 10.0;
        assert!(lag <= 10.0 + TOLERANCE_MS, "send {k} lagged {lag} ms");
    }

    // Schedule: 0, 15, 30, 31 (back-to-back while behind), then back on the grid.
    assert_near(ms_between(departures[1], base), 15.0);
    assert_near(ms_between(departures[2], base), 30.0);
    assert_near(ms_between(departures[3], base), 31.0);
    for (k, at) in departures.iter().enumerate().skip(4) {
        assert_near(ms_between(*at, base), k as f64 * 10.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_bulk_tags_points_with_offset_from_base_time() {
    let session = Session::start("node");
    tokio::time::advance(Duration::from_millis(3)).await;
    let mut upstream = RecordingUpstream::default();

    scheduler(3, Pacing::Bulk { frequency_hz: 50.0 })
        .run(&session, &mut upstream)
        .await
        .unwrap();

    for (at, point) in &upstream.writes {
        assert_eq!(point.elapsed_time, session.elapsed(*at));
        assert_eq!(point.payload.len(), 64);
    }
    assert!(upstream.writes[0].1.elapsed_time >= 3_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_ping_pong_waits_at_least_the_interval_between_sends() {
    let session = Session::start("node");
    let mut upstream = RecordingUpstream::with_costs(&[3]);
    let start = Instant::now();

    let sent = scheduler(
        5,
        Pacing::PingPong {
            interval: Duration::from_millis(20),
        },
    )
    .run(&session, &mut upstream)
    .await
    .unwrap();

    assert_eq!(sent, 5);
    let departures = upstream.departures();
    assert!(ms_between(departures[0], start) >= 20.0);
    for pair in departures.windows(2) {
        assert!(ms_between(pair[1], pair[0]) >= 20.0);
    }

    let elapsed: Vec<i64> = upstream.writes.iter().map(|(_, p)| p.elapsed_time).collect();
    assert!(elapsed.windows(2).all(|w| w[0] < w[1]));

    // Ping/pong leaves the upstream open.
    assert!(!upstream.flushed);
    assert!(!upstream.closed);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_aborts_the_loop() {
    let session = Session::start("node");
    let mut upstream = RecordingUpstream {
        fail_after: Some(2),
        ..Default::default()
    };

    let result = scheduler(10, Pacing::Bulk { frequency_hz: 1000.0 })
        .run(&session, &mut upstream)
        .await;

    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(upstream.writes.len(), 2);
    assert!(!upstream.closed);
}

#[test]
fn test_random_payload_has_requested_length() {
    assert_eq!(random_payload(0).len(), 0);
    assert_eq!(random_payload(10 * 1024).len(), 10 * 1024);
    assert_ne!(random_payload(64), random_payload(64));
}
