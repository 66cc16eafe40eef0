//! Process supervisor: spawns and monitors the worker binary, gates
//! startup on internet connectivity, writes an atomic heartbeat file, and
//! deduplicates noisy child log lines.

use crate::errors::SupervisorError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// The notification channel the supervisor reports worker-lifecycle
/// events to. Treated as a write-only external sink: this process never
/// reads anything back from it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Default `NotificationSink`: logs the notification at warn level rather
/// than delivering it anywhere. Used whenever no real notification
/// channel is configured.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, message: &str) {
        warn!(notification = %message, "supervisor notification");
    }
}

/// Posts the notification body to a configured webhook URL, falling back
/// to a tracing warning if delivery fails. Never propagates an error —
/// a broken notification channel must not affect supervision itself.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, message: &str) {
        let body = serde_json::json!({ "text": message });
        if let Err(e) = self.client.post(&self.url).json(&body).send().await {
            warn!(notification = %message, error = %e, "notification webhook delivery failed");
        }
    }
}

pub struct SupervisorConfig {
    pub worker_binary: PathBuf,
    pub worker_args: Vec<String>,
    pub heartbeat_path: PathBuf,
    pub heartbeat_interval: Duration,
    pub internet_check_interval: Duration,
    pub restart_delay: Duration,
    pub error_msg_interval: Duration,
    pub graceful_shutdown_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct Heartbeat {
    supervisor_pid: u32,
    start_time: u64,
    restart_count: u32,
    internet_online: bool,
    child_running: bool,
    child_exit_code: Option<i32>,
    supervisor_running: bool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Writes the heartbeat atomically: write to a temp file in the same
/// directory, then rename over the target, so a reader never observes a
/// half-written file.
fn write_heartbeat_atomic(path: &Path, heartbeat: &Heartbeat) -> Result<(), SupervisorError> {
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string(heartbeat).expect("heartbeat is always serializable");
    std::fs::write(&tmp_path, json).map_err(SupervisorError::HeartbeatWriteFailed)?;
    std::fs::rename(&tmp_path, path).map_err(SupervisorError::HeartbeatWriteFailed)?;
    Ok(())
}

/// Probes internet availability via a raw DNS-port TCP connect to a
/// well-known resolver, falling back to an HTTPS HEAD request if the
/// connect fails (e.g. in environments that block 53/tcp egress but
/// permit 443).
async fn probe_internet_once() -> bool {
    let dns_probe = tokio::task::spawn_blocking(|| {
        "8.8.8.8:53"
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| std::net::TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if dns_probe {
        return true;
    }

    reqwest::Client::new()
        .head("https://www.google.com")
        .timeout(Duration::from_secs(3))
        .send()
        .await
        .map(|resp| resp.status().is_success() || resp.status().is_redirection())
        .unwrap_or(false)
}

/// Requires `consecutive` successive successful probes before declaring
/// the connection stable, avoiding a flapping link starting the child
/// only to lose connectivity seconds later.
async fn wait_for_stable_internet(consecutive: u32, poll_interval: Duration) {
    let mut streak = 0u32;
    while streak < consecutive {
        if probe_internet_once().await {
            streak += 1;
        } else {
            streak = 0;
        }
        if streak < consecutive {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Trigram-based similarity used to collapse near-identical log lines
/// before they're surfaced in the periodic error digest. No fuzzy-match
/// crate is pulled in for this; the comparison only needs to decide
/// "basically the same line repeated", which a small local Jaccard-over-
/// trigrams check handles without new dependencies.
fn trigram_similarity(a: &str, b: &str) -> f64 {
    fn trigrams(s: &str) -> std::collections::HashSet<[char; 3]> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 3 {
            return std::collections::HashSet::new();
        }
        chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
    }

    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

const LOG_DIGEST_SIMILARITY_THRESHOLD: f64 = 0.90;
const LOG_DIGEST_CAPACITY: usize = 200;

/// Bounded queue of recently-seen child log lines, classified and
/// deduplicated by trigram similarity, emitted as a digest on a timer.
struct LogDigest {
    lines: VecDeque<(String, &'static str)>,
}

impl LogDigest {
    fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(LOG_DIGEST_CAPACITY),
        }
    }

    fn classify(line: &str) -> &'static str {
        let upper = line.to_uppercase();
        if upper.contains("ERROR") {
            "ERROR"
        } else if upper.contains("WARN") {
            "WARNING"
        } else {
            "INFO"
        }
    }

    fn push(&mut self, line: String) {
        let level = Self::classify(&line);
        let is_duplicate = self
            .lines
            .iter()
            .any(|(existing, _)| trigram_similarity(existing, &line) >= LOG_DIGEST_SIMILARITY_THRESHOLD);
        if is_duplicate {
            return;
        }
        if self.lines.len() == LOG_DIGEST_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back((line, level));
    }

    fn flush_errors(&mut self) -> Vec<String> {
        let errors: Vec<String> = self
            .lines
            .iter()
            .filter(|(_, level)| *level == "ERROR" || *level == "WARNING")
            .map(|(line, _)| line.clone())
            .collect();
        self.lines.clear();
        errors
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    notifier: Arc<dyn NotificationSink>,
    start_time: u64,
    restart_count: u32,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_notifier(config, Arc::new(TracingNotificationSink))
    }

    pub fn with_notifier(config: SupervisorConfig, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            config,
            notifier,
            start_time: unix_now(),
            restart_count: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("supervisor received SIGTERM, shutting down");
                    self.write_shutdown_heartbeat(false, None)?;
                    return Ok(());
                }
                _ = sigint.recv() => {
                    info!("supervisor received SIGINT, shutting down");
                    self.write_shutdown_heartbeat(false, None)?;
                    return Ok(());
                }
                result = self.supervise_one_child(&mut sigterm, &mut sigint) => {
                    match result {
                        Ok(Some(())) => return Ok(()),
                        Ok(None) => {
                            self.restart_count += 1;
                            warn!(restart_count = self.restart_count, "worker exited, restarting after delay");
                            tokio::time::sleep(self.config.restart_delay).await;
                        }
                        Err(e) => {
                            error!("supervisor error: {e}");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Runs one child lifecycle: wait for stable connectivity, spawn,
    /// stream its stderr into a log digest, and return once the child
    /// exits (`Ok(None)`, triggering a restart) or the supervisor is asked
    /// to shut down (`Ok(Some(()))`).
    async fn supervise_one_child(
        &mut self,
        sigterm: &mut tokio::signal::unix::Signal,
        sigint: &mut tokio::signal::unix::Signal,
    ) -> Result<Option<()>, SupervisorError> {
        wait_for_stable_internet(3, Duration::from_secs(2)).await;
        self.write_heartbeat(true, false, None)?;

        let mut child = self.spawn_child()?;
        let stderr = child.stderr.take().expect("child stderr was piped");
        let (tx, mut rx) = mpsc::channel::<String>(256);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        let mut digest = LogDigest::new();
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval);
        let mut internet_tick = tokio::time::interval(self.config.internet_check_interval);
        let mut error_tick = tokio::time::interval(self.config.error_msg_interval);

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    self.terminate_child(&mut child).await;
                    self.write_shutdown_heartbeat(false, None)?;
                    return Ok(Some(()));
                }
                _ = sigint.recv() => {
                    self.terminate_child(&mut child).await;
                    self.write_shutdown_heartbeat(false, None)?;
                    return Ok(Some(()));
                }
                line = rx.recv() => {
                    match line {
                        Some(line) => digest.push(line),
                        None => {} // child's stderr closed; keep waiting on exit status
                    }
                }
                _ = heartbeat_tick.tick() => {
                    self.write_heartbeat(true, true, None)?;
                }
                _ = internet_tick.tick() => {
                    if !probe_internet_once().await {
                        warn!("lost internet connectivity, terminating worker");
                        self.terminate_child(&mut child).await;
                        self.write_heartbeat(false, false, None)?;
                        self.notifier.notify("Internet connectivity lost, worker terminated").await;
                        return Ok(None);
                    }
                }
                _ = error_tick.tick() => {
                    for line in digest.flush_errors() {
                        warn!(child_log = %line, "worker error digest");
                    }
                }
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    warn!(exit_code = ?code, "worker process exited");
                    self.write_heartbeat(true, false, code)?;
                    match code {
                        Some(c) => self.notifier.notify(&format!("Worker exited. Exit code {c}")).await,
                        None => self.notifier.notify("Worker exited without an exit code").await,
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn spawn_child(&self) -> Result<Child, SupervisorError> {
        Command::new(&self.config.worker_binary)
            .args(&self.config.worker_args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::SpawnFailed)
    }

    async fn terminate_child(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if result != 0 {
                warn!("SIGTERM delivery failed: {}", io::Error::last_os_error());
            }
        }
        let timeout = tokio::time::timeout(self.config.graceful_shutdown_timeout, child.wait()).await;
        if timeout.is_err() {
            warn!("worker did not exit within grace period, killing");
            let _ = child.kill().await;
        }
    }

    fn write_heartbeat(
        &self,
        internet_online: bool,
        child_running: bool,
        child_exit_code: Option<i32>,
    ) -> Result<(), SupervisorError> {
        write_heartbeat_atomic(
            &self.config.heartbeat_path,
            &Heartbeat {
                supervisor_pid: std::process::id(),
                start_time: self.start_time,
                restart_count: self.restart_count,
                internet_online,
                child_running,
                child_exit_code,
                supervisor_running: true,
            },
        )
    }

    fn write_shutdown_heartbeat(
        &self,
        internet_online: bool,
        child_exit_code: Option<i32>,
    ) -> Result<(), SupervisorError> {
        write_heartbeat_atomic(
            &self.config.heartbeat_path,
            &Heartbeat {
                supervisor_pid: std::process::id(),
                start_time: self.start_time,
                restart_count: self.restart_count,
                internet_online,
                child_running: false,
                child_exit_code,
                supervisor_running: false,
            },
        )
    }
}
