use bse_pipeline::config::Config;
use bse_pipeline::supervisor::{Supervisor, SupervisorConfig, TracingNotificationSink, WebhookNotificationSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = Config::from_env()?;

    let worker_binary = std::env::current_exe()?
        .parent()
        .map(|dir| dir.join("worker"))
        .unwrap_or_else(|| PathBuf::from("worker"));

    let supervisor_config = SupervisorConfig {
        worker_binary,
        worker_args: Vec::new(),
        heartbeat_path: PathBuf::from(&config.heartbeat_file_path),
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_sec),
        internet_check_interval: Duration::from_secs(config.internet_check_interval_sec),
        restart_delay: Duration::from_secs(config.restart_delay_sec),
        error_msg_interval: Duration::from_secs(config.error_msg_interval_sec),
        graceful_shutdown_timeout: Duration::from_secs(10),
    };

    let notifier: Arc<dyn bse_pipeline::supervisor::NotificationSink> = match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookNotificationSink::new(url.clone())),
        None => Arc::new(TracingNotificationSink),
    };

    let supervisor = Supervisor::with_notifier(supervisor_config, notifier);
    supervisor.run().await?;
    Ok(())
}
