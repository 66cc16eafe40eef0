//! Per-trading-day windowed retrieval from the upstream announcements API.
//!
//! Retries each day's request with exponential backoff, bounded by a
//! semaphore so at most `CONCURRENCY_LIMIT` requests are in flight.

use crate::config::Config;
use crate::errors::FetchError;
use crate::models::RawAnnouncement;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// One day's fetch result: the trading day requested and whatever records
/// came back (empty on any unrecoverable failure for that day).
#[derive(Debug, Clone)]
pub struct DayResult {
    pub tradedt: NaiveDate,
    pub records: Vec<RawAnnouncement>,
}

pub struct Fetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    retry_count: u32,
    retry_delay: Duration,
    url: String,
    live_template: Value,
    hist_template: Value,
    live_days: i64,
    hist_min: NaiveDate,
    hist_max: NaiveDate,
}

impl Fetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("failed to build shared HTTP client"),
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit)),
            timeout: Duration::from_secs(config.timeout_sec),
            retry_count: config.retry_count,
            retry_delay: Duration::from_secs(config.retry_delay_sec),
            url: config.announcements_url.clone(),
            live_template: config.live_params_template.clone(),
            hist_template: config.hist_params_template.clone(),
            live_days: config.live_days,
            hist_min: config.historical_min_date,
            hist_max: config.historical_max_date,
        }
    }

    /// Fetches all trading days in `[from, to]` inclusive, clamped to the
    /// configured historical range. Swaps `from`/`to` if `from > to`.
    pub async fn fetch_historical(&self, from: NaiveDate, to: NaiveDate) -> Vec<DayResult> {
        let (mut from, mut to) = (from, to);
        if from > to {
            std::mem::swap(&mut from, &mut to);
        }
        let from = from.max(self.hist_min);
        let to = to.min(self.hist_max);
        if from > to {
            return Vec::new();
        }

        let days: Vec<NaiveDate> = from.iter_days().take_while(|d| *d <= to).collect();
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        self.fetch_days(days, midnight, &self.hist_template).await
    }

    /// Fetches the rolling live window `[today - (LIVE_DAYS-1), today]`. If
    /// `last_seen` falls within that window, starts from `last_seen`'s day
    /// instead; if `last_seen == today`, issues a single-day request.
    pub async fn fetch_live(&self, last_seen: Option<NaiveDateTime>) -> Vec<DayResult> {
        let today = Utc::now().date_naive();
        let window_start = today - chrono::Duration::days(self.live_days - 1);

        let start_day = match last_seen {
            Some(ts) if ts.date() >= window_start && ts.date() <= today => ts.date(),
            _ => window_start,
        };

        let days: Vec<NaiveDate> = if start_day == today {
            vec![today]
        } else {
            start_day.iter_days().take_while(|d| *d <= today).collect()
        };

        let now = Utc::now().naive_utc().time();
        self.fetch_days(days, now, &self.live_template).await
    }

    async fn fetch_days(
        &self,
        days: Vec<NaiveDate>,
        reference_time: NaiveTime,
        template: &Value,
    ) -> Vec<DayResult> {
        let mut tasks = Vec::with_capacity(days.len());
        for day in days {
            let semaphore = self.semaphore.clone();
            let client = self.client.clone();
            let url = self.url.clone();
            let payload = build_payload(template, day, reference_time);
            let timeout_dur = self.timeout;
            let retry_count = self.retry_count;
            let retry_delay = self.retry_delay;

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let records = fetch_one_day_with_retry(
                    &client,
                    &url,
                    &payload,
                    timeout_dur,
                    retry_count,
                    retry_delay,
                )
                .await;
                DayResult {
                    tradedt: day,
                    records,
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(day_result) => results.push(day_result),
                Err(e) => warn!("fetch task panicked: {e}"),
            }
        }
        results
    }
}

fn build_payload(template: &Value, day: NaiveDate, reference_time: NaiveTime) -> Value {
    let mut payload = template.clone();
    let obj = payload
        .as_object_mut()
        .expect("parameter template must be a JSON object");
    obj.insert("tradedt".into(), Value::String(day.format("%Y%m%d").to_string()));
    obj.insert(
        "hr".into(),
        Value::String(format!("{:02}", reference_time.hour())),
    );
    obj.insert(
        "min".into(),
        Value::String(format!("{:02}", reference_time.minute())),
    );
    obj.insert(
        "sec".into(),
        Value::String(format!("{:02}", reference_time.second())),
    );
    payload
}

/// Executes one day's request with exponential backoff retry, collapsing
/// every failure mode to an empty result after retry exhaustion.
async fn fetch_one_day_with_retry(
    client: &Client,
    url: &str,
    payload: &Value,
    timeout_dur: Duration,
    retry_count: u32,
    mut backoff: Duration,
) -> Vec<RawAnnouncement> {
    for attempt in 0..=retry_count {
        match timeout(timeout_dur, client.post(url).json(payload).send()).await {
            Ok(Ok(response)) => match parse_response(response).await {
                Ok(records) => return records,
                Err(FetchError::Anomaly(msg)) => {
                    warn!("anomalous response on attempt {}: {msg}", attempt + 1);
                }
                Err(other) => warn!("response error on attempt {}: {other}", attempt + 1),
            },
            Ok(Err(e)) => warn!("transport error on attempt {}: {e}", attempt + 1),
            Err(_) => warn!("request timed out on attempt {}", attempt + 1),
        }

        if attempt < retry_count {
            debug!("retrying in {:?}", backoff);
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    warn!("retries exhausted for {url}, returning empty day");
    Vec::new()
}

/// Parses the response body with content-type tolerance. An object body
/// with `Error_Msg == "No Record found"` is a normal empty result, not an
/// error; any other object shape is an anomaly.
async fn parse_response(response: reqwest::Response) -> Result<Vec<RawAnnouncement>, FetchError> {
    if !response.status().is_success() {
        return Err(FetchError::Anomaly(format!(
            "non-2xx status {}",
            response.status()
        )));
    }
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }

    let body: Value = response.json().await?;
    match body {
        Value::Array(_) => {
            let records: Vec<RawAnnouncement> = serde_json::from_value(body)
                .map_err(|e| FetchError::Anomaly(format!("array parse failure: {e}")))?;
            Ok(records)
        }
        Value::Object(ref obj) => {
            if obj.get("Error_Msg").and_then(Value::as_str) == Some("No Record found") {
                Ok(Vec::new())
            } else {
                Err(FetchError::Anomaly("unexpected object shape".into()))
            }
        }
        other => Err(FetchError::Anomaly(format!("unexpected JSON shape: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_payload_zero_pads_live_reference_time() {
        let template = serde_json::json!({"scripcode": ""});
        let day = NaiveDate::from_ymd_opt(2025, 4, 5).unwrap();
        let time = NaiveTime::from_hms_opt(9, 5, 3).unwrap();
        let payload = build_payload(&template, day, time);
        assert_eq!(payload["tradedt"], "20250405");
        assert_eq!(payload["hr"], "09");
        assert_eq!(payload["min"], "05");
        assert_eq!(payload["sec"], "03");
    }

    #[test]
    fn build_payload_historical_uses_midnight() {
        let template = serde_json::json!({});
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let payload = build_payload(&template, day, midnight);
        assert_eq!(payload["hr"], "00");
        assert_eq!(payload["min"], "00");
        assert_eq!(payload["sec"], "00");
    }
}
