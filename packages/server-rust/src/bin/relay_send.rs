//! Dry-run driver for the send pipeline.
//!
//! Loads receivers and pending reports from a JSON fixture into the in-memory
//! collaborators, runs one send event per receiver through a background
//! [`SendWorker`], and prints the resulting action history as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::TimeDelta;
use clap::{Parser, ValueEnum};
use relay_core::{
    BodyFormat, ClockSource, Event, EventAction, Receiver, ReportHeader, RetryPolicy, SystemClock,
};
use relay_server::service::{
    BackgroundWorker, DispatchConfig, SendDispatcher, SendWorker, TransportSettings,
    DEFAULT_MAX_FILES_PER_SESSION,
};
use relay_server::storage::{
    InMemoryActionHistory, InMemoryEventQueue, InMemoryWorkflowStore, StaticReceiverCatalog,
};
use relay_server::transport::{SshAuth, SshCredentials};
use relay_server::TransportRegistry;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Deliver fixture reports through the configured transports.
#[derive(Debug, Parser)]
#[command(name = "relay-send", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON fixture with `receivers` and `reports`
    fixture: PathBuf,

    /// User that logs in to SFTP drop servers
    #[arg(long, env = "RELAY_SFTP_USER")]
    sftp_user: Option<String>,

    #[arg(long, env = "RELAY_SFTP_PASSWORD", hide_env_values = true, conflicts_with = "sftp_key")]
    sftp_password: Option<String>,

    /// Private key used instead of a password
    #[arg(long, env = "RELAY_SFTP_KEY")]
    sftp_key: Option<PathBuf>,

    #[arg(long, env = "RELAY_SFTP_KEY_PASSPHRASE", hide_env_values = true)]
    sftp_key_passphrase: Option<String>,

    /// known_hosts file that drop server keys must appear in
    #[arg(long, env = "RELAY_KNOWN_HOSTS")]
    known_hosts: Option<PathBuf>,

    /// Directory that stands in for SFTP servers when no SFTP login is given
    #[arg(long, env = "RELAY_DROP_DIR")]
    drop_dir: Option<PathBuf>,

    /// Send endpoint of the HTTP mail API
    #[arg(long, env = "RELAY_EMAIL_API_URL")]
    email_api_url: Option<String>,

    #[arg(long, env = "RELAY_EMAIL_API_KEY", hide_env_values = true)]
    email_api_key: Option<String>,

    /// Partner API base URL
    #[arg(long, env = "RELAY_REDOX_BASE_URL")]
    redox_base_url: Option<String>,

    #[arg(long, env = "RELAY_REDOX_SECRET", hide_env_values = true)]
    redox_secret: Option<String>,

    /// Reports handed to a transport per send event
    #[arg(long, default_value_t = DEFAULT_MAX_FILES_PER_SESSION)]
    max_files: usize,

    /// Interval at which the worker polls for due retries
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    /// Schedule retries seconds apart instead of minutes
    #[arg(long)]
    fast_retries: bool,

    /// Keep running until every scheduled retry has been handled
    #[arg(long)]
    follow_retries: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    receivers: Vec<Receiver>,
    #[serde(default)]
    reports: Vec<FixtureReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureReport {
    receiver_name: String,
    body_format: BodyFormat,
    body: String,
    #[serde(default)]
    schema_name: Option<String>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn sftp_credentials(cli: &Cli) -> Result<Option<SshCredentials>> {
    let Some(user) = &cli.sftp_user else {
        return Ok(None);
    };
    let auth = match (&cli.sftp_password, &cli.sftp_key) {
        (Some(password), _) => SshAuth::Password(password.clone()),
        (None, Some(path)) => SshAuth::PrivateKey {
            path: path.clone(),
            passphrase: cli.sftp_key_passphrase.clone(),
        },
        (None, None) => bail!("--sftp-user needs --sftp-password or --sftp-key"),
    };
    Ok(Some(SshCredentials {
        user: user.clone(),
        auth,
        known_hosts: cli.known_hosts.clone(),
    }))
}

fn retry_policy(fast: bool) -> RetryPolicy {
    if !fast {
        return RetryPolicy::default();
    }
    RetryPolicy::new(
        (1..=5).map(|count| (count, TimeDelta::seconds(i64::from(count)))),
        TimeDelta::seconds(5),
    )
    .with_jitter(TimeDelta::zero())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let text = tokio::fs::read_to_string(&cli.fixture)
        .await
        .with_context(|| format!("reading fixture {}", cli.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&text).context("parsing fixture")?;

    let mut settings = TransportSettings {
        sftp_credentials: sftp_credentials(&cli)?,
        file_drop_root: cli.drop_dir.clone(),
        email_api_url: cli.email_api_url.clone(),
        email_api_key: cli.email_api_key.clone(),
        redox_secret: cli.redox_secret.clone(),
        ..TransportSettings::default()
    };
    if let Some(url) = &cli.redox_base_url {
        settings.redox_base_url.clone_from(url);
    }
    let registry = TransportRegistry::from_settings(&settings)?;

    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryWorkflowStore::with_clock(clock.clone()));
    let queue = Arc::new(InMemoryEventQueue::new());
    let history = Arc::new(InMemoryActionHistory::new());
    let catalog = Arc::new(StaticReceiverCatalog::new(fixture.receivers));

    for report in fixture.reports {
        let mut header = ReportHeader::new(report.receiver_name, report.body_format, report.body);
        if let Some(schema) = report.schema_name {
            header = header.with_schema_name(schema);
        }
        store.insert(header)?;
    }

    let dispatcher = Arc::new(
        SendDispatcher::new(store.clone(), queue.clone(), history.clone(), catalog, registry)
            .with_config(DispatchConfig {
                max_files_per_session: cli.max_files,
                retry: retry_policy(cli.fast_retries),
            })
            .with_clock(clock.clone()),
    );
    let runnable = SendWorker::new(dispatcher, queue.clone(), clock.clone());
    let stats = runnable.stats();
    let mut worker = BackgroundWorker::start(runnable, cli.tick_ms);

    let receivers = store.pending_receivers();
    info!(receivers = receivers.len(), "submitting send events");
    for name in &receivers {
        let message = Event::receiver(EventAction::Send, name).to_queue_message()?;
        worker.submit(message).await?;
    }
    let submitted = receivers.len() as u64;

    let tick = Duration::from_millis(cli.tick_ms.max(1));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.timeout_secs);
    // The queue and busy flag are read separately, so idleness must hold
    // across two consecutive polls. Capped batches schedule their follow-up
    // events due at once, so a due message means the worker still has work.
    let mut idle_polls = 0;
    while idle_polls < 2 {
        if tokio::time::Instant::now() >= deadline {
            warn!(queued = queue.len(), "timed out waiting for the worker");
            break;
        }
        tokio::time::sleep(tick).await;
        let idle = stats.handled() >= submitted
            && !stats.is_busy()
            && queue.next_due().is_none_or(|at| at > clock.now())
            && (!cli.follow_retries || queue.is_empty());
        idle_polls = if idle { idle_polls + 1 } else { 0 };
    }
    worker.stop().await;

    let due = store.due_receivers();
    if !due.is_empty() {
        warn!(receivers = ?due, "reports left undelivered");
    }
    let scheduled = store.pending_receivers();
    if !scheduled.is_empty() {
        info!(receivers = ?scheduled, "reports still pending");
    }

    info!(
        handled = stats.handled(),
        records = history.len(),
        scheduled = queue.len(),
        "send run finished"
    );
    println!("{}", serde_json::to_string_pretty(&history.records())?);
    Ok(())
}
