//! Splits report-bearing announcements into per-quarter `Report` rows with
//! deterministic, strictly-ascending ordinals.

use crate::errors::DivideError;
use crate::fiscal::fiscal_quarter_year;
use crate::models::{now_canonical, CanonicalAnnouncement, Report};
use crate::store::SqliteStore;
use chrono::Datelike;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

pub struct ReportDivider<'a> {
    store: &'a SqliteStore,
    insert_batch: usize,
}

/// `{company}_{short_cat}_FY{year}{qtr}_` — report_id prefix shared by every
/// ordinal within one company/category/quarter partition.
fn base_id(company: &str, short_cat: &str, fiscal_year: i32, qtr: &str) -> String {
    format!("{company}_{short_cat}_FY{fiscal_year}{qtr}_")
}

impl<'a> ReportDivider<'a> {
    pub fn new(store: &'a SqliteStore, insert_batch: usize) -> Self {
        Self { store, insert_batch }
    }

    /// Builds and persists `Report` rows for every report-bearing
    /// announcement in `canonical_batch` not already present in
    /// `existing_report_news_ids`. Announcements are assumed already
    /// persisted to the announcements table by the caller.
    pub fn divide(
        &self,
        canonical_batch: &[CanonicalAnnouncement],
        existing_report_news_ids: &mut HashSet<String>,
    ) -> Result<usize, DivideError> {
        let mut candidates: Vec<&CanonicalAnnouncement> = canonical_batch
            .iter()
            .filter(|a| a.category.is_report_bearing() && !existing_report_news_ids.contains(&a.news_id))
            .collect();

        // Strict-ascending ordinal assignment requires each partition to be
        // processed in Tradedate order.
        candidates.sort_by_key(|a| a.tradedate_parsed());

        let mut groups: HashMap<String, Vec<&CanonicalAnnouncement>> = HashMap::new();
        let mut group_keys: HashMap<String, (String, i32, &'static str)> = HashMap::new();

        for ann in candidates {
            let parsed = ann.tradedate_parsed();
            let (qtr, fiscal_year) = match fiscal_quarter_year(parsed.month(), parsed.year()) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("skipping {}: {e}", ann.news_id);
                    continue;
                }
            };
            let short_cat = ann.category.short_code();
            let qtr_str: &'static str = match qtr {
                crate::fiscal::Quarter::Q1 => "Q1",
                crate::fiscal::Quarter::Q2 => "Q2",
                crate::fiscal::Quarter::Q3 => "Q3",
                crate::fiscal::Quarter::Q4 => "Q4",
            };
            let prefix = base_id(&ann.company, short_cat, fiscal_year, qtr_str);
            group_keys.insert(prefix.clone(), (ann.company.clone(), fiscal_year, qtr_str));
            groups.entry(prefix).or_default().push(ann);
        }

        let mut reports = Vec::new();
        for (prefix, members) in groups {
            let starting_ordinal = self
                .store
                .count_reports_with_base_id_prefix(&prefix)
                .map_err(DivideError::Store)?;
            let (company, fiscal_year, qtr_str) = &group_keys[&prefix];

            for (offset, ann) in members.into_iter().enumerate() {
                let ordinal = starting_ordinal + offset as i64 + 1;
                let report_id = format!("{prefix}{ordinal}");
                reports.push(Report {
                    report_id,
                    company: company.clone(),
                    symbolmap: ann.symbolmap.clone(),
                    news_id: ann.news_id.clone(),
                    datecode: ann.tradedate[..10].to_string(),
                    year: *fiscal_year,
                    qtr: qtr_str.to_string(),
                    dt_tm: ann.tradedate.clone(),
                    url: ann.attachment_url.clone(),
                    report_type: ann.category.as_str().to_string(),
                    report_line: ann.headline.clone(),
                    count: ordinal,
                    document_date: now_canonical(),
                });
                existing_report_news_ids.insert(ann.news_id.clone());
            }
        }

        let inserted = self
            .store
            .insert_reports_batch(&reports, self.insert_batch)
            .map_err(DivideError::Store)?;
        debug!(inserted, "inserted report rows");
        Ok(inserted)
    }

    /// Recheck pass: re-scans already-stored announcements
    /// from the last `days` days (or the full history) that are
    /// report-bearing but have no corresponding report row yet, and divides
    /// them. Used to repair gaps left by a crash between categorize and
    /// divide steps.
    pub fn recheck(&self, candidates: &[CanonicalAnnouncement]) -> Result<usize, DivideError> {
        let mut existing = self
            .store
            .load_existing_report_news_ids()
            .map_err(DivideError::Store)?;
        self.divide(candidates, &mut existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SymbolMap};
    use std::collections::HashMap as StdHashMap;

    fn announcement(news_id: &str, company: &str, tradedate: &str, category: Category) -> CanonicalAnnouncement {
        CanonicalAnnouncement {
            news_id: news_id.to_string(),
            company: company.to_string(),
            symbolmap: SymbolMap::new(Some("ACME".into()), 500001, "Acme Industries".into()),
            tradedate: tradedate.to_string(),
            category,
            headline: "headline".to_string(),
            news_body: String::new(),
            descriptor: String::new(),
            attachment_url: "https://example.com/a.pdf".to_string(),
            extra: StdHashMap::new(),
        }
    }

    #[test]
    fn report_bearing_announcements_get_sequential_ordinals_in_tradedate_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let divider = ReportDivider::new(&store, 1000);

        let batch = vec![
            announcement("D2", "INE000A01010", "2025-04-10 10:00:00", Category::AnnualReport),
            announcement("D1", "INE000A01010", "2025-04-05 09:00:00", Category::AnnualReport),
        ];
        let mut existing = HashSet::new();
        let inserted = divider.divide(&batch, &mut existing).unwrap();
        assert_eq!(inserted, 2);
        assert!(existing.contains("D1"));
        assert!(existing.contains("D2"));
    }

    #[test]
    fn general_category_never_produces_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let divider = ReportDivider::new(&store, 1000);

        let batch = vec![announcement("D1", "INE000A01010", "2025-04-10 10:00:00", Category::General)];
        let mut existing = HashSet::new();
        let inserted = divider.divide(&batch, &mut existing).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn already_divided_news_id_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let divider = ReportDivider::new(&store, 1000);

        let batch = vec![announcement("D1", "INE000A01010", "2025-04-10 10:00:00", Category::AnnualReport)];
        let mut existing: HashSet<String> = HashSet::new();
        existing.insert("D1".to_string());
        let inserted = divider.divide(&batch, &mut existing).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn second_batch_continues_ordinal_from_store_occupancy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let divider = ReportDivider::new(&store, 1000);

        let first = vec![announcement("D1", "INE000A01010", "2025-04-05 09:00:00", Category::AnnualReport)];
        let mut existing = HashSet::new();
        divider.divide(&first, &mut existing).unwrap();

        let second = vec![announcement("D2", "INE000A01010", "2025-04-10 10:00:00", Category::AnnualReport)];
        divider.divide(&second, &mut existing).unwrap();

        let prefix = base_id("INE000A01010", "AR", 2025, "Q1");
        let count = store.count_reports_with_base_id_prefix(&prefix).unwrap();
        assert_eq!(count, 2);
    }
}
