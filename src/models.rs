//! Core data types: raw/canonical announcements, reports, dashboard
//! entries, and the company reference map.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category assigned by the categorizer. `General` is the fallback when no
/// rule and no `Descriptor` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Investor Presentation")]
    InvestorPresentation,
    #[serde(rename = "Annual Report")]
    AnnualReport,
    #[serde(rename = "Credit Rating")]
    CreditRating,
    #[serde(rename = "Earnings Call Transcript")]
    EarningsCallTranscript,
    #[serde(rename = "General")]
    General,
}

impl Category {
    /// All report-bearing categories, i.e. the closed set {IP, AR, CR, ECT}.
    /// `General` never produces a report.
    pub const REPORT_BEARING: [Category; 4] = [
        Category::InvestorPresentation,
        Category::AnnualReport,
        Category::CreditRating,
        Category::EarningsCallTranscript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::InvestorPresentation => "Investor Presentation",
            Category::AnnualReport => "Annual Report",
            Category::CreditRating => "Credit Rating",
            Category::EarningsCallTranscript => "Earnings Call Transcript",
            Category::General => "General",
        }
    }

    /// `short_cat` used in `report_id` construction: IP, AR, CR, ECT.
    pub fn short_code(&self) -> &'static str {
        match self {
            Category::InvestorPresentation => "IP",
            Category::AnnualReport => "AR",
            Category::CreditRating => "CR",
            Category::EarningsCallTranscript => "ECT",
            Category::General => "GN",
        }
    }

    pub fn from_descriptor(descriptor: &str) -> Option<Category> {
        match descriptor {
            "Investor Presentation" => Some(Category::InvestorPresentation),
            "Annual Report" => Some(Category::AnnualReport),
            "Credit Rating" => Some(Category::CreditRating),
            "Earnings Call Transcript" => Some(Category::EarningsCallTranscript),
            _ => None,
        }
    }

    pub fn is_report_bearing(&self) -> bool {
        !matches!(self, Category::General)
    }
}

/// Categories excluded from the dashboard deduplicator's candidate pool.
pub const CAT_NO_CHECK_DUPLICATE_DASHBOARD: [&str; 3] = [
    "Investor Presentation",
    "Earnings Call Transcript",
    "Broker Report",
];

/// A raw announcement as received from the upstream API. Field names
/// mirror the wire schema exactly, including its inconsistent casing —
/// this is the boundary type and is never hand-massaged before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnnouncement {
    pub SCRIP_CD: serde_json::Value,
    pub AttachmentName: String,
    #[serde(default)]
    pub HeadLine: String,
    #[serde(default)]
    pub NewsBody: String,
    #[serde(default)]
    pub Descriptor: String,
    pub Tradedate: String,
    #[serde(default)]
    pub ATTACHMENTURL: String,
    /// Any additional fields the upstream sends that this pipeline doesn't
    /// model explicitly; preserved verbatim onto the canonical record.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// `{NSE, BSE, Company_Name, SELECTED}` — `SELECTED` is NSE if present,
/// else the BSE code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolMap {
    pub NSE: Option<String>,
    pub BSE: i64,
    pub Company_Name: String,
    pub SELECTED: String,
}

impl SymbolMap {
    pub fn new(nse: Option<String>, bse: i64, company_name: String) -> Self {
        let selected = nse.clone().unwrap_or_else(|| bse.to_string());
        Self {
            NSE: nse,
            BSE: bse,
            Company_Name: company_name,
            SELECTED: selected,
        }
    }
}

/// Reference-set entry: `BSE_code -> {company (ISIN), symbolmap}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyReference {
    pub company: String,
    pub symbolmap: SymbolMap,
}

/// `BSE_code(string) -> CompanyReference`, immutable after load.
pub type ReferenceMap = HashMap<String, CompanyReference>;

/// Canonical announcement, post-categorization. Never mutated after
/// insertion; `news_id` is the idempotency key across all collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAnnouncement {
    pub news_id: String,
    pub company: String,
    pub symbolmap: SymbolMap,
    /// `YYYY-MM-DD HH:MM:SS`
    pub tradedate: String,
    pub category: Category,
    pub headline: String,
    pub news_body: String,
    pub descriptor: String,
    pub attachment_url: String,
    pub extra: HashMap<String, serde_json::Value>,
}

impl CanonicalAnnouncement {
    /// Parses `tradedate` back into a `NaiveDateTime` for sort/compare
    /// purposes. Infallible for any record that survived categorization,
    /// since the categorizer only emits canonical-format strings.
    pub fn tradedate_parsed(&self) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&self.tradedate, "%Y-%m-%d %H:%M:%S")
            .expect("categorizer only emits canonical-format Tradedate strings")
    }
}

/// Derived per announcement whose category is report-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub company: String,
    pub symbolmap: SymbolMap,
    pub news_id: String,
    pub datecode: String,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Qtr")]
    pub qtr: String,
    pub dt_tm: String,
    pub url: String,
    pub report_type: String,
    pub report_line: String,
    pub count: i64,
    pub document_date: String,
}

/// Dashboard entry: a news item enriched with embedding for downstream
/// consumption. Mutated only via `duplicate` false -> true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardEntry {
    pub news_id: String,
    pub company: String,
    pub stock: String,
    pub dt_tm: String,
    pub category: String,
    pub source: String,
    pub impact: Option<String>,
    #[serde(rename = "impact score")]
    pub impact_score: Option<f64>,
    pub sentiment: Option<String>,
    #[serde(rename = "short summary")]
    pub short_summary: String,
    pub symbolmap: SymbolMap,
    pub embedding_shortsummary: Option<Vec<f32>>,
    pub duplicate: bool,
    pub document_date: String,
}

impl DashboardEntry {
    pub fn dt_tm_parsed(&self) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&self.dt_tm, "%Y-%m-%d %H:%M:%S")
            .expect("dt_tm is always stored in canonical format")
    }
}

/// Wall-clock stamp helper shared by every component that writes
/// `document_date`.
pub fn now_canonical() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
