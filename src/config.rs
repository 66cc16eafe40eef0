//! Process configuration, loaded from the environment. Every timing and
//! threshold constant is overridable here with a sensible default.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // --- data store ---
    pub mongo_uri: String,
    pub db_name: String,
    pub odin_db: String,
    pub sqlite_path: String,
    pub journal_dir: String,

    // --- upstream API ---
    pub announcements_url: String,
    pub company_master_url: String,
    pub company_master_cache_path: String,
    pub live_params_template: serde_json::Value,
    pub hist_params_template: serde_json::Value,
    pub historical_min_date: chrono::NaiveDate,
    pub historical_max_date: chrono::NaiveDate,

    // --- fetcher ---
    pub concurrency_limit: usize,
    pub timeout_sec: u64,
    pub retry_count: u32,
    pub retry_delay_sec: u64,
    pub live_days: i64,

    // --- categorizer / divider ---
    pub len_pandas_min_docs: usize,
    pub insert_batch: usize,

    // --- dashboard dedup ---
    pub no_of_days_check: i64,
    pub dashboard_dedup_threshold: f32,
    pub embedding_text_threshold: f32,

    // --- orchestrator ---
    pub run_interval_min: u64,
    pub connectivity_backoff_min: u64,

    // --- supervisor ---
    pub heartbeat_interval_sec: u64,
    pub freeze_timeout_sec: u64,
    pub restart_delay_sec: u64,
    pub internet_check_interval_sec: u64,
    pub error_msg_interval_sec: u64,
    pub heartbeat_file_path: String,
    pub notification_webhook_url: Option<String>,

    // --- logging ---
    pub log_retention_days: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_json_or(key: &str, default: serde_json::Value) -> serde_json::Value {
    std::env::var(key)
        .ok()
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            mongo_uri: env_or_string("MONGO_URI", "mongodb://localhost:27017"),
            db_name: env_or_string("DB_NAME", "bse_announcements"),
            odin_db: env_or_string("ODIN_DB", "odin"),
            sqlite_path: env_or_string("SQLITE_PATH", "./bse_pipeline.db"),
            journal_dir: env_or_string("JOURNAL_DIR", "./journal"),

            announcements_url: env_or_string(
                "BSE_INDIRA_API_URL",
                "https://api.bseindia.com/BseIndiaAPI/api/AnnGetData/w",
            ),
            company_master_url: env_or_string(
                "COMPANY_MASTER_URL",
                "https://api.bseindia.com/BseIndiaAPI/api/ListOfScripData/w",
            ),
            company_master_cache_path: env_or_string(
                "COMPANY_MASTER_CACHE_PATH",
                "./company_master_cache.json",
            ),
            live_params_template: env_json_or("BSE_INDIRA_API_PARAMS_LIVE", serde_json::json!({})),
            hist_params_template: env_json_or("BSE_INDIRA_API_PARAMS_HIST", serde_json::json!({})),
            historical_min_date: chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            historical_max_date: chrono::Utc::now().date_naive(),

            concurrency_limit: env_or("CONCURRENCY_LIMIT", 20),
            timeout_sec: env_or("TIMEOUT_SEC", 50),
            retry_count: env_or("RETRY_COUNT", 3),
            retry_delay_sec: env_or("RETRY_DELAY_SEC", 1),
            live_days: env_or("LIVE_DAYS", 3),

            len_pandas_min_docs: env_or("LEN_PANDAS_MIN_DOCS", 10),
            insert_batch: env_or("INSERT_BATCH", 1000),

            no_of_days_check: env_or("NO_OF_DAYS_CHECK", 7),
            dashboard_dedup_threshold: env_or("DASHBOARD_DEDUP_THRESHOLD", 0.80),
            embedding_text_threshold: env_or("EMBEDDING_TEXT_THRESHOLD", 0.70),

            run_interval_min: env_or("RUN_INTERVAL_TIME_MIN", 5),
            connectivity_backoff_min: env_or("CONNECTIVITY_BACKOFF_MIN", 15),

            heartbeat_interval_sec: env_or("HEARTBEAT_INTERVAL", 15),
            freeze_timeout_sec: env_or("FREEZE_TIMEOUT", 120),
            restart_delay_sec: env_or("RESTART_DELAY", 10),
            internet_check_interval_sec: env_or("INTERNET_CHECK_INTERVAL", 10),
            error_msg_interval_sec: env_or("ERROR_MSG_INTERVAL", 60),
            heartbeat_file_path: env_or_string("HEARTBEAT_FILE_PATH", "./heartbeat.status"),
            notification_webhook_url: std::env::var("SUPERVISOR_NOTIFICATION_WEBHOOK_URL").ok(),

            log_retention_days: env_or("LOG_RETENTION_DAYS", 14),
        })
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_min * 60)
    }

    pub fn connectivity_backoff(&self) -> Duration {
        Duration::from_secs(self.connectivity_backoff_min * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("RETRY_COUNT");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.concurrency_limit, 20);
        assert_eq!(cfg.dashboard_dedup_threshold, 0.80);
    }
}
