//! Entry point for `iscp-probe`.
//!
//! Resolves the run fields from a shareable link, the persisted store and the
//! defaults, then runs one measurement against the in-process loopback broker
//! and prints the operator log. `main.rs` owns only process setup; all run
//! logic lives in the library.
//!
//! `iscp-probe` 的入口。
//!
//! 从分享链接、持久化存储和默认值解析运行字段，然后针对进程内回环代理执行一次测量并打印操作日志。

use clap::Parser;
use iscp_probe::config::{FieldStore, Fields, RunConfig};
use iscp_probe::controller::{RunController, RunOutcome};
use iscp_probe::error::Error;
use iscp_probe::event::{EventSink, EventStream};
use iscp_probe::protocol::loopback::LoopbackConnector;
use iscp_probe::ticket::{HttpTicketSource, StaticTicket, TicketSource};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Ticket presented to the loopback broker when no token is configured.
const LOOPBACK_TICKET: &str = "loopback";

/// Base of the shareable link printed after a field change when no
/// `--share-base` is given.
const DEFAULT_SHARE_BASE: &str = "https://example.intdash.jp/iscp-probe/";

/// Round-trip latency and throughput probe for a streaming node.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Shareable link whose query parameters override stored fields.
    #[arg(long)]
    link: Option<Url>,

    /// JSON file the field values are persisted in.
    #[arg(long, default_value = ".iscp-probe.json")]
    store: PathBuf,

    /// Persist a field before running, as `key=value`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Print a shareable link for the resolved fields under this base URL.
    /// A link is also printed after any `--set`, under a default base.
    #[arg(long)]
    share_base: Option<Url>,

    /// One-way delivery latency of the loopback broker, in milliseconds.
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// Exchange the access token for a ticket over HTTP instead of using it
    /// as the ticket directly.
    #[arg(long)]
    exchange_ticket: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iscp_probe=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) if outcome.is_completed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "could not start run");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome, Error> {
    let store = FieldStore::new(&cli.store);
    let mut persisted = store.load()?;
    for assignment in &cli.set {
        let (key, value) = assignment.split_once('=').ok_or_else(|| Error::InvalidField {
            field: "set",
            reason: format!("expected KEY=VALUE, got `{assignment}`"),
        })?;
        persisted = store.set(key.trim(), value)?;
    }

    let link = cli.link.as_ref().map(Fields::from_link).unwrap_or_default();
    let resolved = Fields::resolve(&link, &persisted);
    if let Some(link) = share_link(cli.share_base.as_ref(), !cli.set.is_empty(), &resolved)? {
        println!("{link}");
    }

    let config = RunConfig::from_fields(&resolved)?;
    let connector = LoopbackConnector::new(Duration::from_millis(cli.latency_ms));

    let outcome = if cli.exchange_ticket {
        let tickets = HttpTicketSource::from_config(&config)?;
        run_with(config, connector, tickets).await
    } else {
        let ticket = if config.access_token.is_empty() {
            LOOPBACK_TICKET.to_owned()
        } else {
            config.access_token.clone()
        };
        run_with(config, connector, StaticTicket(ticket)).await
    };
    Ok(outcome)
}

/// The link to print, if any: always under an explicit base, and under the
/// default base whenever a field was changed.
fn share_link(base: Option<&Url>, changed: bool, resolved: &Fields) -> Result<Option<Url>, Error> {
    match base {
        Some(base) => Ok(Some(resolved.to_link(base))),
        None if changed => Ok(Some(resolved.to_link(&Url::parse(DEFAULT_SHARE_BASE)?))),
        None => Ok(None),
    }
}

async fn run_with<T>(config: RunConfig, connector: LoopbackConnector, tickets: T) -> RunOutcome
where
    T: TicketSource,
{
    let (events, stream) = EventSink::channel();
    let controller = RunController::new(config, connector, tickets, events);
    let (outcome, ()) = tokio::join!(controller.run(), print_events(stream));
    outcome
}

/// Prints operator log lines until every event sink is gone.
async fn print_events(mut stream: EventStream) {
    while let Some(event) = stream.recv().await {
        if event.is_log_line() {
            println!("{event}");
        } else {
            debug!(%event, "run status");
        }
    }
}
