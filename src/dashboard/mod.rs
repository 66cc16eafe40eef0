//! Dashboard feed composition: formatting canonical announcements into
//! dashboard entries, and the two duplicate-suppression passes that run
//! over them.

use crate::embedder::cosine_similarity;
use crate::models::{now_canonical, CanonicalAnnouncement, DashboardEntry, CAT_NO_CHECK_DUPLICATE_DASHBOARD};
use crate::store::SqliteStore;
use anyhow::Result;
use tracing::debug;

/// Builds the pre-embedding shape of a dashboard entry from a canonical
/// announcement. `short_summary` stands in for whatever downstream
/// summarization step produces it; this module only owns the structural
/// mapping (spec Non-goals exclude summarization/enrichment itself).
pub struct Formatter;

impl Formatter {
    pub fn format(announcement: &CanonicalAnnouncement, source: &str) -> DashboardEntry {
        DashboardEntry {
            news_id: announcement.news_id.clone(),
            company: announcement.company.clone(),
            stock: announcement.symbolmap.SELECTED.clone(),
            dt_tm: announcement.tradedate.clone(),
            category: announcement.category.as_str().to_string(),
            source: source.to_string(),
            impact: None,
            impact_score: None,
            sentiment: None,
            short_summary: announcement.headline.clone(),
            symbolmap: announcement.symbolmap.clone(),
            embedding_shortsummary: None,
            duplicate: false,
            document_date: now_canonical(),
        }
    }
}

/// Union-find over a single company's candidate pool, used to collapse
/// near-duplicate dashboard entries into connected components.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Post-insertion dashboard dedup: groups already-inserted
/// entries per company, connects pairs whose short-summary embeddings
/// exceed `threshold` cosine similarity, and marks every member of a
/// component except the earliest-`dt_tm` one as a duplicate.
pub struct DashboardDeduplicator<'a> {
    store: &'a SqliteStore,
    threshold: f32,
    max_neighbors: usize,
}

impl<'a> DashboardDeduplicator<'a> {
    pub fn new(store: &'a SqliteStore, threshold: f32) -> Self {
        Self {
            store,
            threshold,
            max_neighbors: 50,
        }
    }

    fn is_excluded_category(category: &str) -> bool {
        CAT_NO_CHECK_DUPLICATE_DASHBOARD.contains(&category)
    }

    /// Runs the dedup pass for one company and returns the number of
    /// entries newly marked duplicate.
    pub fn dedup_company(&self, company: &str) -> Result<usize> {
        let mut candidates: Vec<DashboardEntry> = self
            .store
            .dashboard_candidates_for_company(company)?
            .into_iter()
            .filter(|e| !Self::is_excluded_category(&e.category))
            .filter(|e| e.embedding_shortsummary.is_some())
            .collect();

        // Earliest dt_tm first so the survivor of each component is always
        // index 0 within it.
        candidates.sort_by(|a, b| a.dt_tm.cmp(&b.dt_tm));

        let n = candidates.len();
        if n < 2 {
            return Ok(0);
        }

        let mut sets = DisjointSet::new(n);
        for i in 0..n {
            let window_end = (i + 1 + self.max_neighbors).min(n);
            let vec_i = candidates[i].embedding_shortsummary.as_ref().unwrap();
            for j in (i + 1)..window_end {
                let vec_j = candidates[j].embedding_shortsummary.as_ref().unwrap();
                if cosine_similarity(vec_i, vec_j) > self.threshold {
                    sets.union(i, j);
                }
            }
        }

        let mut survivor_of: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
        let mut to_mark = Vec::new();
        for i in 0..n {
            let root = sets.find(i);
            let survivor = *survivor_of.entry(root).or_insert(i);
            if i != survivor {
                to_mark.push(candidates[i].news_id.clone());
            }
        }

        debug!(company, marked = to_mark.len(), "dashboard dedup pass");
        self.store.mark_dashboard_duplicates(&to_mark)?;
        Ok(to_mark.len())
    }
}

/// Pre-insertion dedup variant (the "Livesquack" source feed): rather
/// than clustering an already-inserted pool, checks a single candidate
/// against existing same-company entries before it is ever written, and
/// drops it if its maximum similarity exceeds `threshold`.
pub struct LivesquackDeduplicator<'a> {
    store: &'a SqliteStore,
    threshold: f32,
}

impl<'a> LivesquackDeduplicator<'a> {
    pub fn new(store: &'a SqliteStore, threshold: f32) -> Self {
        Self { store, threshold }
    }

    /// Filters `incoming` down to entries that are not near-duplicates of
    /// any existing same-company dashboard entry. Entries without an
    /// embedding yet always pass through unfiltered.
    pub fn filter_unique(&self, incoming: Vec<DashboardEntry>) -> Result<Vec<DashboardEntry>> {
        let mut kept = Vec::with_capacity(incoming.len());
        for entry in incoming {
            let Some(embedding) = &entry.embedding_shortsummary else {
                kept.push(entry);
                continue;
            };
            let existing = self.store.dashboard_candidates_for_company(&entry.company)?;
            let max_similarity = existing
                .iter()
                .filter_map(|e| e.embedding_shortsummary.as_ref())
                .map(|other| cosine_similarity(embedding, other))
                .fold(f32::MIN, f32::max);

            if max_similarity < self.threshold {
                kept.push(entry);
            } else {
                debug!(news_id = %entry.news_id, max_similarity, "livesquack dropped near-duplicate");
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SymbolMap};
    use std::collections::HashMap;

    fn canonical(news_id: &str, company: &str) -> CanonicalAnnouncement {
        CanonicalAnnouncement {
            news_id: news_id.to_string(),
            company: company.to_string(),
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

    fn entry_with_embedding(news_id: &str, company: &str, dt_tm: &str, embedding: Vec<f32>) -> DashboardEntry {
        let mut e = Formatter::format(&canonical(news_id, company), "BSE");
        e.dt_tm = dt_tm.to_string();
        e.embedding_shortsummary = Some(embedding);
        e
    }

    #[test]
    fn formatter_maps_selected_symbol_as_stock() {
        let ann = canonical("D1", "INE000A01010");
        let entry = Formatter::format(&ann, "BSE");
        assert_eq!(entry.stock, "ACME");
        assert_eq!(entry.news_id, "D1");
        assert!(!entry.duplicate);
    }

    #[test]
    fn dashboard_dedup_marks_later_near_duplicate_but_keeps_earliest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();

        let a = entry_with_embedding("D1", "INE000A01010", "2025-04-01 09:00:00", vec![1.0, 0.0]);
        let b = entry_with_embedding("D2", "INE000A01010", "2025-04-01 10:00:00", vec![0.99, 0.01]);
        store.upsert_dashboard_entry(&a).unwrap();
        store.upsert_dashboard_entry(&b).unwrap();

        let dedup = DashboardDeduplicator::new(&store, 0.80);
        let marked = dedup.dedup_company("INE000A01010").unwrap();
        assert_eq!(marked, 1);
    }

    #[test]
    fn excluded_categories_are_never_clustered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();

        let mut a = entry_with_embedding("D1", "INE000A01010", "2025-04-01 09:00:00", vec![1.0, 0.0]);
        a.category = "Investor Presentation".to_string();
        let mut b = entry_with_embedding("D2", "INE000A01010", "2025-04-01 10:00:00", vec![1.0, 0.0]);
        b.category = "Investor Presentation".to_string();
        store.upsert_dashboard_entry(&a).unwrap();
        store.upsert_dashboard_entry(&b).unwrap();

        let dedup = DashboardDeduplicator::new(&store, 0.80);
        let marked = dedup.dedup_company("INE000A01010").unwrap();
        assert_eq!(marked, 0);
    }

    #[test]
    fn livesquack_drops_incoming_entry_similar_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();

        let existing = entry_with_embedding("D1", "INE000A01010", "2025-04-01 09:00:00", vec![1.0, 0.0]);
        store.upsert_dashboard_entry(&existing).unwrap();

        let incoming = entry_with_embedding("D2", "INE000A01010", "2025-04-01 10:00:00", vec![0.9, 0.1]);
        let dedup = LivesquackDeduplicator::new(&store, 0.70);
        let kept = dedup.filter_unique(vec![incoming]).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn livesquack_keeps_incoming_entry_dissimilar_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db").to_str().unwrap()).unwrap();

        let existing = entry_with_embedding("D1", "INE000A01010", "2025-04-01 09:00:00", vec![1.0, 0.0]);
        store.upsert_dashboard_entry(&existing).unwrap();

        let incoming = entry_with_embedding("D2", "INE000A01010", "2025-04-01 10:00:00", vec![0.0, 1.0]);
        let dedup = LivesquackDeduplicator::new(&store, 0.70);
        let kept = dedup.filter_unique(vec![incoming]).unwrap();
        assert_eq!(kept.len(), 1);
    }
}
