//! Wires fetcher, journal, categorizer, divider, embedder, and dashboard
//! dedup together into the pipeline's run modes: historical (one-shot pass
//! over a date range), live (polling loop), backfill (re-fetch a trailing
//! window), and recheck (re-divide already-categorized announcements
//! with no report row).

use crate::categorizer::Categorizer;
use crate::dashboard::{DashboardDeduplicator, Formatter, LivesquackDeduplicator};
use crate::divider::ReportDivider;
use crate::embedder::{embed_all, EmbedderExecution, TextEmbedder};
use crate::fetcher::Fetcher;
use crate::journal::{DataType, FetchType, Journal};
use crate::models::{CanonicalAnnouncement, RawAnnouncement, ReferenceMap};
use crate::store::SqliteStore;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct Pipeline {
    pub fetcher: Fetcher,
    pub reference: ReferenceMap,
    pub store: SqliteStore,
    pub journal: Journal,
    pub embedder: Arc<dyn TextEmbedder>,
    pub execution: EmbedderExecution,
    pub insert_batch: usize,
    pub dashboard_dedup_threshold: f32,
    pub livesquack_threshold: f32,
    pub run_interval: Duration,
    pub connectivity_backoff: Duration,
}

impl Pipeline {
    /// Waits until the upstream is reachable, checking every
    /// `connectivity_backoff` interval. This never returns `Err` — it
    /// blocks until connectivity is restored, matching the worker's
    /// "never crash on transient network loss" contract.
    pub async fn connectivity_gate(&self) {
        loop {
            match reqwest::get(&self.fetcher_probe_url()).await {
                Ok(resp) if resp.status().is_success() || resp.status().is_client_error() => return,
                _ => {
                    warn!(
                        "connectivity check failed, retrying in {:?}",
                        self.connectivity_backoff
                    );
                    sleep(self.connectivity_backoff).await;
                }
            }
        }
    }

    fn fetcher_probe_url(&self) -> String {
        "https://www.google.com".to_string()
    }

    /// Runs one full categorize+divide+dashboard pass over a fetched
    /// batch, returning the set of companies (by `CanonicalAnnouncement`
    /// `company` key) touched, so the caller can run dedup only where
    /// something actually changed. Journals both the raw batch as received
    /// and the categorized batch that survived filtering, keyed so re-runs
    /// over the same window don't duplicate journal entries.
    pub async fn process_batch(
        &self,
        raw_records: Vec<RawAnnouncement>,
        fetch_type: FetchType,
        seen_news_ids: &mut HashSet<String>,
        existing_report_news_ids: &mut HashSet<String>,
    ) -> Result<HashSet<String>> {
        let raw_entries: Vec<(String, RawAnnouncement)> = raw_records
            .iter()
            .map(|r| (r.AttachmentName.clone(), r.clone()))
            .collect();
        if let Err(e) = self.journal.append(DataType::Normal, fetch_type, &raw_entries) {
            warn!("failed to journal raw batch: {e}");
        }

        let categorizer = Categorizer::new(&self.reference);
        let outcome = categorizer.run(raw_records, seen_news_ids);

        if outcome.accepted.is_empty() {
            return Ok(HashSet::new());
        }

        let categorized_entries: Vec<(String, CanonicalAnnouncement)> = outcome
            .accepted
            .iter()
            .map(|a| (a.news_id.clone(), a.clone()))
            .collect();
        if let Err(e) = self.journal.append(DataType::Filter, fetch_type, &categorized_entries) {
            warn!("failed to journal categorized batch: {e}");
        }

        self.store
            .insert_announcements_batch(&outcome.accepted, self.insert_batch)?;

        let divider = ReportDivider::new(&self.store, self.insert_batch);
        divider.divide(&outcome.accepted, existing_report_news_ids)?;

        let touched = self.push_to_dashboard(&outcome.accepted).await?;
        Ok(touched)
    }

    async fn push_to_dashboard(&self, accepted: &[CanonicalAnnouncement]) -> Result<HashSet<String>> {
        let entries: Vec<_> = accepted
            .iter()
            .map(|ann| Formatter::format(ann, "BSE"))
            .collect();

        let texts: Vec<String> = entries.iter().map(|e| e.short_summary.clone()).collect();
        let embeddings = embed_all(self.embedder.clone(), texts, &self.execution).await?;

        let mut enriched = Vec::with_capacity(entries.len());
        for (mut entry, embedding) in entries.into_iter().zip(embeddings.into_iter()) {
            entry.embedding_shortsummary = Some(embedding);
            enriched.push(entry);
        }

        let livesquack = LivesquackDeduplicator::new(&self.store, self.livesquack_threshold);
        let kept = livesquack.filter_unique(enriched)?;

        let mut touched = HashSet::new();
        for entry in &kept {
            self.store.upsert_dashboard_entry(entry)?;
            touched.insert(entry.company.clone());
        }

        let dedup = DashboardDeduplicator::new(&self.store, self.dashboard_dedup_threshold);
        for company in &touched {
            dedup.dedup_company(company)?;
        }

        Ok(touched)
    }
}

/// Historical mode: one pass over `[from, to]`, then exit.
pub async fn run_historical(pipeline: &Pipeline, from: NaiveDate, to: NaiveDate) -> Result<()> {
    pipeline.connectivity_gate().await;
    info!(%from, %to, "starting historical fetch");

    let mut seen_news_ids = pipeline.store.load_existing_news_ids()?;
    let mut existing_report_news_ids = pipeline.store.load_existing_report_news_ids()?;

    let day_results = pipeline.fetcher.fetch_historical(from, to).await;
    for day in day_results {
        if day.records.is_empty() {
            continue;
        }
        pipeline
            .process_batch(
                day.records,
                FetchType::Hist,
                &mut seen_news_ids,
                &mut existing_report_news_ids,
            )
            .await?;
    }

    info!("historical fetch complete");
    Ok(())
}

/// Live mode: polls every `run_interval`, tracking the high-watermark
/// Tradedate seen so far so each poll only needs to re-check the rolling
/// live window rather than the full history.
pub async fn run_live_loop(pipeline: &Pipeline, initial_watermark: Option<NaiveDateTime>) -> Result<()> {
    let mut watermark = initial_watermark;
    let mut seen_news_ids = pipeline.store.load_existing_news_ids()?;
    let mut existing_report_news_ids = pipeline.store.load_existing_report_news_ids()?;

    loop {
        pipeline.connectivity_gate().await;

        let day_results = pipeline.fetcher.fetch_live(watermark).await;
        for day in day_results {
            if day.records.is_empty() {
                continue;
            }
            let touched = pipeline
                .process_batch(
                    day.records,
                    FetchType::Live,
                    &mut seen_news_ids,
                    &mut existing_report_news_ids,
                )
                .await?;
            if !touched.is_empty() {
                debug_touched(&touched);
            }
            let day_end = day.tradedt.and_hms_opt(23, 59, 59).unwrap();
            watermark = Some(watermark.map_or(day_end, |w| w.max(day_end)));
        }

        sleep(pipeline.run_interval).await;
    }
}

fn debug_touched(touched: &HashSet<String>) {
    tracing::debug!(companies = touched.len(), "dashboard updated for companies");
}

/// Backfill mode: re-fetches the last `days` trading days regardless of
/// watermark state, for recovering from an outage or a known upstream
/// data correction.
pub async fn run_backfill(pipeline: &Pipeline, days: i64) -> Result<()> {
    let today = chrono::Utc::now().date_naive();
    let from = today - chrono::Duration::days(days.max(0));
    run_historical(pipeline, from, today).await
}

/// Recheck mode: re-divides already-categorized announcements that have
/// no corresponding report row, without re-fetching from upstream.
pub async fn run_recheck(
    pipeline: &Pipeline,
    announcements: Vec<CanonicalAnnouncement>,
) -> Result<usize> {
    let divider = ReportDivider::new(&pipeline.store, pipeline.insert_batch);
    let inserted = divider.recheck(&announcements)?;
    info!(inserted, "recheck pass complete");
    Ok(inserted)
}

