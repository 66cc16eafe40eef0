//! Company reference set: `BSE_code -> {company (ISIN), symbolmap}`.
//!
//! Loaded once at startup from a synchronous source and held immutable for
//! the life of the process — no locking required since it's never mutated
//! after load.

use crate::models::{CompanyReference, ReferenceMap, SymbolMap};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A single record as delivered by the upstream company-master source,
/// before the reference loader's filter is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyMasterRecord {
    pub bse_code: Option<String>,
    pub isin: Option<String>,
    pub company_name: String,
    pub market_cap: f64,
    pub nse_symbol: Option<String>,
}

/// Abstracts the company-master source so the loader can be tested without
/// a live upstream. Production wiring implements this against the real
/// `CompanyMaster` collection.
#[async_trait::async_trait]
pub trait CompanyMasterSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<CompanyMasterRecord>>;
}

/// Production `CompanyMasterSource`: a plain reqwest JSON GET against the
/// upstream scrip-list endpoint, the same request shape the fetcher uses
/// for announcements.
pub struct HttpCompanyMasterSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCompanyMasterSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl CompanyMasterSource for HttpCompanyMasterSource {
    async fn fetch_all(&self) -> Result<Vec<CompanyMasterRecord>> {
        let records = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("requesting company master list")?
            .json::<Vec<CompanyMasterRecord>>()
            .await
            .context("parsing company master response")?;
        Ok(records)
    }
}

pub struct ReferenceLoader<S: CompanyMasterSource> {
    source: S,
    cache_path: String,
    partly_paid_re: Regex,
}

impl<S: CompanyMasterSource> ReferenceLoader<S> {
    pub fn new(source: S, cache_path: impl Into<String>) -> Self {
        Self {
            source,
            cache_path: cache_path.into(),
            partly_paid_re: Regex::new(r"(?i)partly\s?paid").expect("static pattern"),
        }
    }

    /// Applies the reference-loader filter: BSE code
    /// present, market-cap > 0, ISIN not matching `IN9`, company name not
    /// containing "partly paid" (case-insensitive).
    fn accepts(&self, record: &CompanyMasterRecord) -> bool {
        let Some(bse_code) = record.bse_code.as_deref() else {
            return false;
        };
        if bse_code.trim().is_empty() {
            return false;
        }
        if record.market_cap <= 0.0 {
            return false;
        }
        if let Some(isin) = &record.isin {
            if isin.starts_with("IN9") {
                return false;
            }
        }
        if self.partly_paid_re.is_match(&record.company_name) {
            return false;
        }
        true
    }

    fn build_map(&self, records: Vec<CompanyMasterRecord>) -> ReferenceMap {
        let mut map = ReferenceMap::new();
        for record in records {
            if !self.accepts(&record) {
                continue;
            }
            let bse_code = record.bse_code.clone().unwrap();
            let bse_numeric: i64 = bse_code.trim().parse().unwrap_or(0);
            let symbolmap = SymbolMap::new(
                record.nse_symbol.clone(),
                bse_numeric,
                record.company_name.clone(),
            );
            let company = record.isin.clone().unwrap_or(bse_code.clone());
            map.insert(
                bse_code.trim().to_string(),
                CompanyReference { company, symbolmap },
            );
        }
        map
    }

    /// Pulls the company master, filters it, and returns the reference
    /// map. On source failure, falls back to the on-disk cache (§4.2.1)
    /// rather than failing startup outright.
    pub async fn load(&self) -> Result<ReferenceMap> {
        match self.source.fetch_all().await {
            Ok(records) => {
                let map = self.build_map(records);
                info!(companies = map.len(), "Loaded company reference set");
                if let Err(e) = self.write_cache(&map) {
                    warn!("Failed to refresh reference-set cache: {e}");
                }
                Ok(map)
            }
            Err(e) => {
                warn!("Company master source unreachable ({e}), falling back to on-disk cache");
                self.read_cache()
                    .context("reference source unreachable and no usable cache")
            }
        }
    }

    fn write_cache(&self, map: &ReferenceMap) -> Result<()> {
        let json = serde_json::to_string(map)?;
        std::fs::write(&self.cache_path, json)?;
        Ok(())
    }

    fn read_cache(&self) -> Result<ReferenceMap> {
        if !Path::new(&self.cache_path).exists() {
            anyhow::bail!("no cache file at {}", self.cache_path);
        }
        let json = std::fs::read_to_string(&self.cache_path)?;
        let map: ReferenceMap = serde_json::from_str(&json)?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixtureSource {
        records: Vec<CompanyMasterRecord>,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl CompanyMasterSource for FixtureSource {
        async fn fetch_all(&self) -> Result<Vec<CompanyMasterRecord>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("simulated network failure");
            }
            Ok(self.records.clone())
        }
    }

    fn sample_records() -> Vec<CompanyMasterRecord> {
        vec![
            CompanyMasterRecord {
                bse_code: Some("500001".into()),
                isin: Some("INE000A01010".into()),
                company_name: "Acme Industries".into(),
                market_cap: 1000.0,
                nse_symbol: Some("ACME".into()),
            },
            CompanyMasterRecord {
                bse_code: Some("500002".into()),
                isin: Some("IN9000B01011".into()),
                company_name: "Excluded ISIN Co".into(),
                market_cap: 500.0,
                nse_symbol: None,
            },
            CompanyMasterRecord {
                bse_code: Some("500003".into()),
                isin: Some("INE000C01012".into()),
                company_name: "Zero Cap Co".into(),
                market_cap: 0.0,
                nse_symbol: None,
            },
            CompanyMasterRecord {
                bse_code: Some("500004".into()),
                isin: Some("INE000D01013".into()),
                company_name: "Partly Paid Shares Ltd".into(),
                market_cap: 200.0,
                nse_symbol: None,
            },
            CompanyMasterRecord {
                bse_code: None,
                isin: Some("INE000E01014".into()),
                company_name: "No Bse Code Co".into(),
                market_cap: 200.0,
                nse_symbol: None,
            },
        ]
    }

    #[tokio::test]
    async fn filters_out_zero_cap_in9_partly_paid_and_missing_bse_code() {
        let source = FixtureSource {
            records: sample_records(),
            fail: AtomicBool::new(false),
        };
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("ref_cache.json");
        let loader = ReferenceLoader::new(source, cache_path.to_string_lossy().to_string());

        let map = loader.load().await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("500001"));
        let entry = &map["500001"];
        assert_eq!(entry.company, "INE000A01010");
        assert_eq!(entry.symbolmap.SELECTED, "ACME");
    }

    #[tokio::test]
    async fn falls_back_to_disk_cache_when_source_fails() {
        let source = FixtureSource {
            records: sample_records(),
            fail: AtomicBool::new(false),
        };
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("ref_cache.json");
        let loader = ReferenceLoader::new(source, cache_path.to_string_lossy().to_string());
        loader.load().await.unwrap();

        let failing_source = FixtureSource {
            records: vec![],
            fail: AtomicBool::new(true),
        };
        let loader2 = ReferenceLoader::new(failing_source, cache_path.to_string_lossy().to_string());
        let map = loader2.load().await.unwrap();
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn selected_symbol_falls_back_to_bse_when_nse_absent() {
        let source = FixtureSource {
            records: sample_records(),
            fail: AtomicBool::new(false),
        };
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("ref_cache.json");
        let loader = ReferenceLoader::new(source, cache_path.to_string_lossy().to_string());
        let map = loader.load().await.unwrap();
        let entry = &map["500001"];
        assert_eq!(entry.symbolmap.NSE.as_deref(), Some("ACME"));
    }
}
