//! tests/common/harness.rs
use iscp_probe::config::{Fields, RunConfig, fields};
use iscp_probe::controller::{RunController, RunOutcome};
use iscp_probe::event::{EventSink, RunEvent};
use iscp_probe::protocol::loopback::{LoopbackConnector, LoopbackInjector};
use iscp_probe::ticket::TicketSource;
use std::sync::Once;
use std::time::Duration;

pub const NODE_ID: &str = "probe-node";

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "iscp_probe=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Builds a run configuration from field overrides on top of the defaults.
pub fn config(overrides: &[(&str, &str)]) -> RunConfig {
    let mut raw = Fields::defaults();
    raw.set(fields::NODE_ID, NODE_ID).unwrap();
    raw.set(fields::TOKEN, "test-token").unwrap();
    for (key, value) in overrides {
        raw.set(key, *value).unwrap();
    }
    RunConfig::from_fields(&raw).unwrap()
}

/// A loopback broker plus the events of the run driven over it.
pub struct RunHarness {
    pub connector: LoopbackConnector,
}

impl RunHarness {
    pub fn new(latency: Duration) -> Self {
        init_tracing();
        Self {
            connector: LoopbackConnector::new(latency),
        }
    }

    pub fn injector(&self) -> LoopbackInjector {
        self.connector.injector()
    }

    /// Runs to the end and returns the outcome with every emitted event.
    pub async fn run<T: TicketSource>(
        self,
        config: RunConfig,
        tickets: T,
    ) -> (RunOutcome, Vec<RunEvent>) {
        let (events, mut stream) = EventSink::channel();
        let outcome = RunController::new(config, self.connector, tickets, events)
            .run()
            .await;
        let mut emitted = Vec::new();
        while let Some(event) = stream.recv().await {
            emitted.push(event);
        }
        (outcome, emitted)
    }
}

pub fn rtts(events: &[RunEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Sample { rtt_ms, .. } => Some(*rtt_ms),
            _ => None,
        })
        .collect()
}

pub fn assert_busy_brackets(events: &[RunEvent]) {
    assert_eq!(events.first(), Some(&RunEvent::Busy(true)));
    assert_eq!(events.last(), Some(&RunEvent::Busy(false)));
}
