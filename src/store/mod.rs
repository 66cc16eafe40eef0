//! SQLite-backed persistence for the three collections the pipeline owns:
//! announcements, reports, and dashboard entries.
//!
//! WAL journal mode, a single shared `Arc<Mutex<Connection>>`, `INSERT OR
//! IGNORE` for idempotent writes, and chunked transactions for bulk
//! inserts.

use crate::models::{CanonicalAnnouncement, Category, DashboardEntry, Report};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl Clone for SqliteStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening sqlite db at {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS announcements (
                news_id         TEXT PRIMARY KEY,
                company         TEXT NOT NULL,
                symbolmap       TEXT NOT NULL,
                tradedate       TEXT NOT NULL,
                category        TEXT NOT NULL,
                headline        TEXT NOT NULL,
                news_body       TEXT NOT NULL,
                descriptor      TEXT NOT NULL,
                attachment_url  TEXT NOT NULL,
                extra           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_announcements_tradedate ON announcements(tradedate);

            CREATE TABLE IF NOT EXISTS reports (
                report_id      TEXT PRIMARY KEY,
                company        TEXT NOT NULL,
                symbolmap      TEXT NOT NULL,
                news_id        TEXT NOT NULL,
                datecode       TEXT NOT NULL,
                year           INTEGER NOT NULL,
                qtr            TEXT NOT NULL,
                dt_tm          TEXT NOT NULL,
                url            TEXT NOT NULL,
                report_type    TEXT NOT NULL,
                report_line    TEXT NOT NULL,
                count          INTEGER NOT NULL,
                document_date  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reports_type_dttm ON reports(report_type, dt_tm);
            CREATE INDEX IF NOT EXISTS idx_reports_news_id ON reports(news_id);

            CREATE TABLE IF NOT EXISTS dashboard (
                news_id                 TEXT PRIMARY KEY,
                company                 TEXT NOT NULL,
                stock                   TEXT NOT NULL,
                dt_tm                   TEXT NOT NULL,
                category                TEXT NOT NULL,
                source                  TEXT NOT NULL,
                impact                  TEXT,
                impact_score            REAL,
                sentiment               TEXT,
                short_summary           TEXT NOT NULL,
                symbolmap               TEXT NOT NULL,
                embedding_shortsummary  TEXT,
                duplicate               INTEGER NOT NULL DEFAULT 0,
                document_date           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dashboard_company_dttm ON dashboard(company, dt_tm);
            "#,
        )?;
        Ok(())
    }

    pub fn load_existing_news_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT news_id FROM announcements")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    pub fn load_existing_report_news_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT news_id FROM reports")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    /// Reloads report-bearing announcements, optionally bounded to those
    /// with `tradedate >= since`, for the recheck pass.
    /// `since: None` scans the entire stored history.
    pub fn load_report_bearing_announcements(&self, since: Option<&str>) -> Result<Vec<CanonicalAnnouncement>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let report_bearing: Vec<&str> = Category::REPORT_BEARING.iter().map(|c| c.as_str()).collect();
        let placeholders = report_bearing.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let sql = match since {
            Some(_) => format!(
                "SELECT news_id, company, symbolmap, tradedate, category, headline, news_body, descriptor, attachment_url, extra
                 FROM announcements WHERE category IN ({placeholders}) AND tradedate >= ?"
            ),
            None => format!(
                "SELECT news_id, company, symbolmap, tradedate, category, headline, news_body, descriptor, attachment_url, extra
                 FROM announcements WHERE category IN ({placeholders})"
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let mut bind_params: Vec<&dyn rusqlite::ToSql> =
            report_bearing.iter().map(|c| c as &dyn rusqlite::ToSql).collect();
        if let Some(since) = since {
            bind_params.push(&since);
        }

        let rows = stmt.query_map(bind_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut announcements = Vec::new();
        for row in rows {
            let (news_id, company, symbolmap_json, tradedate, category_str, headline, news_body, descriptor, attachment_url, extra_json) = row?;
            let category = match category_str.as_str() {
                "Investor Presentation" => Category::InvestorPresentation,
                "Annual Report" => Category::AnnualReport,
                "Credit Rating" => Category::CreditRating,
                "Earnings Call Transcript" => Category::EarningsCallTranscript,
                _ => Category::General,
            };
            announcements.push(CanonicalAnnouncement {
                news_id,
                company,
                symbolmap: serde_json::from_str(&symbolmap_json)?,
                tradedate,
                category,
                headline,
                news_body,
                descriptor,
                attachment_url,
                extra: serde_json::from_str(&extra_json)?,
            });
        }
        Ok(announcements)
    }

    /// Inserts announcements in chunks of `batch_size`, using `INSERT OR
    /// IGNORE` so that a news_id collision is a silent no-op rather than a
    /// transaction-aborting error. Returns the number of rows actually
    /// inserted.
    pub fn insert_announcements_batch(
        &self,
        batch: &[CanonicalAnnouncement],
        batch_size: usize,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let mut inserted = 0usize;

        for chunk in batch.chunks(batch_size.max(1)) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO announcements
                     (news_id, company, symbolmap, tradedate, category, headline, news_body, descriptor, attachment_url, extra)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for item in chunk {
                    let symbolmap_json = serde_json::to_string(&item.symbolmap)?;
                    let extra_json = serde_json::to_string(&item.extra)?;
                    let changed = stmt.execute(params![
                        item.news_id,
                        item.company,
                        symbolmap_json,
                        item.tradedate,
                        item.category.as_str(),
                        item.headline,
                        item.news_body,
                        item.descriptor,
                        item.attachment_url,
                        extra_json,
                    ])?;
                    inserted += changed;
                }
            }
            tx.commit()?;
        }

        debug!(inserted, requested = batch.len(), "inserted announcements batch");
        Ok(inserted)
    }

    /// Counts existing reports whose `report_id` starts with `base_id`
    /// (i.e. the `{company}_{short_cat}_FY{year}{qtr}_` prefix), used to
    /// compute the next ordinal for that partition.
    pub fn count_reports_with_base_id_prefix(&self, base_id_prefix: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let pattern = format!("{base_id_prefix}%");
        conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE report_id LIKE ?1",
            params![pattern],
            |row| row.get(0),
        )
        .context("counting existing reports for base_id prefix")
    }

    pub fn insert_reports_batch(&self, batch: &[Report], batch_size: usize) -> Result<usize> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let mut inserted = 0usize;

        for chunk in batch.chunks(batch_size.max(1)) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO reports
                     (report_id, company, symbolmap, news_id, datecode, year, qtr, dt_tm, url, report_type, report_line, count, document_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?;
                for item in chunk {
                    let symbolmap_json = serde_json::to_string(&item.symbolmap)?;
                    let changed = stmt.execute(params![
                        item.report_id,
                        item.company,
                        symbolmap_json,
                        item.news_id,
                        item.datecode,
                        item.year,
                        item.qtr,
                        item.dt_tm,
                        item.url,
                        item.report_type,
                        item.report_line,
                        item.count,
                        item.document_date,
                    ])?;
                    inserted += changed;
                }
            }
            tx.commit()?;
        }

        debug!(inserted, requested = batch.len(), "inserted reports batch");
        Ok(inserted)
    }

    pub fn upsert_dashboard_entry(&self, entry: &DashboardEntry) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let symbolmap_json = serde_json::to_string(&entry.symbolmap)?;
        let embedding_json = entry
            .embedding_shortsummary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO dashboard
             (news_id, company, stock, dt_tm, category, source, impact, impact_score, sentiment, short_summary, symbolmap, embedding_shortsummary, duplicate, document_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(news_id) DO UPDATE SET
                impact = excluded.impact,
                impact_score = excluded.impact_score,
                sentiment = excluded.sentiment,
                short_summary = excluded.short_summary,
                embedding_shortsummary = excluded.embedding_shortsummary,
                duplicate = excluded.duplicate",
            params![
                entry.news_id,
                entry.company,
                entry.stock,
                entry.dt_tm,
                entry.category,
                entry.source,
                entry.impact,
                entry.impact_score,
                entry.sentiment,
                entry.short_summary,
                symbolmap_json,
                embedding_json,
                entry.duplicate as i64,
                entry.document_date,
            ],
        )?;
        Ok(())
    }

    /// Candidate dashboard entries for one company, most recent first,
    /// used by the cross-batch dedup pass.
    pub fn dashboard_candidates_for_company(&self, company: &str) -> Result<Vec<DashboardEntry>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT news_id, company, stock, dt_tm, category, source, impact, impact_score, sentiment, short_summary, symbolmap, embedding_shortsummary, duplicate, document_date
             FROM dashboard WHERE company = ?1 AND duplicate = 0 ORDER BY dt_tm ASC",
        )?;
        let rows = stmt.query_map(params![company], |row| {
            let symbolmap_json: String = row.get(10)?;
            let embedding_json: Option<String> = row.get(11)?;
            let duplicate_int: i64 = row.get(12)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                symbolmap_json,
                embedding_json,
                duplicate_int,
                row.get::<_, String>(13)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (news_id, company, stock, dt_tm, category, source, impact, impact_score, sentiment, short_summary, symbolmap_json, embedding_json, duplicate_int, document_date) = row?;
            entries.push(DashboardEntry {
                news_id,
                company,
                stock,
                dt_tm,
                category,
                source,
                impact,
                impact_score,
                sentiment,
                short_summary,
                symbolmap: serde_json::from_str(&symbolmap_json)?,
                embedding_shortsummary: embedding_json
                    .map(|j| serde_json::from_str(&j))
                    .transpose()?,
                duplicate: duplicate_int != 0,
                document_date,
            });
        }
        Ok(entries)
    }

    pub fn mark_dashboard_duplicates(&self, news_ids: &[String]) -> Result<()> {
        if news_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().expect("store mutex poisoned");
        let tx_placeholder = news_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("UPDATE dashboard SET duplicate = 1 WHERE news_id IN ({tx_placeholder})");
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            news_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        stmt.execute(params.as_slice())?;
        Ok(())
    }

    pub fn dashboard_entry_exists(&self, news_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM dashboard WHERE news_id = ?1",
                params![news_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

pub fn log_open(path: &str) {
    info!(path, "opened sqlite store");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SymbolMap};
    use std::collections::HashMap;

    fn sample_announcement(news_id: &str) -> CanonicalAnnouncement {
        CanonicalAnnouncement {
            news_id: news_id.to_string(),
            company: "INE000A01010".to_string(),
            symbolmap: SymbolMap::new(Some("ACME".into()), 500001, "Acme Industries".into()),
            tradedate: "2025-04-01 10:00:00".to_string(),
            category: Category::General,
            headline: "Board meeting intimation".to_string(),
            news_body: String::new(),
            descriptor: String::new(),
            attachment_url: "https://example.com/a.pdf".to_string(),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn inserting_same_news_id_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let batch = vec![sample_announcement("DOC1")];
        let first = store.insert_announcements_batch(&batch, 100).unwrap();
        let second = store.insert_announcements_batch(&batch, 100).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(store.load_existing_news_ids().unwrap().len(), 1);
    }

    #[test]
    fn dashboard_upsert_then_mark_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let entry = DashboardEntry {
            news_id: "DOC1".into(),
            company: "INE000A01010".into(),
            stock: "ACME".into(),
            dt_tm: "2025-04-01 10:00:00".into(),
            category: "General".into(),
            source: "BSE".into(),
            impact: None,
            impact_score: None,
            sentiment: None,
            short_summary: "summary".into(),
            symbolmap: SymbolMap::new(Some("ACME".into()), 500001, "Acme Industries".into()),
            embedding_shortsummary: Some(vec![0.1, 0.2]),
            duplicate: false,
            document_date: "2025-04-01 10:00:00".into(),
        };
        store.upsert_dashboard_entry(&entry).unwrap();
        assert!(store.dashboard_entry_exists("DOC1").unwrap());

        store.mark_dashboard_duplicates(&["DOC1".to_string()]).unwrap();
        let candidates = store.dashboard_candidates_for_company("INE000A01010").unwrap();
        assert!(candidates.is_empty(), "duplicate entries are excluded from candidates");
    }
}
