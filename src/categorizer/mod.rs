//! Raw-announcement filtering, idempotency, and category assignment.
//! One record at a time rather than a vectorized batch pass, so a single
//! rejected record never affects its neighbors.

use crate::errors::CategorizeError;
use crate::models::{CanonicalAnnouncement, Category, RawAnnouncement, ReferenceMap};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// Ordered, first-match-wins regex rules applied to `HeadLine` and
/// `NewsBody` independently when `Descriptor` doesn't already name a
/// report-bearing category.
struct Rule {
    category: Category,
    pattern: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        category: Category::InvestorPresentation,
        pattern: r"(?i)investor\s*presentation|presentation\s*to\s*investors",
    },
    Rule {
        category: Category::AnnualReport,
        pattern: r"(?i)annual\s*report",
    },
    Rule {
        category: Category::CreditRating,
        pattern: r"(?i)credit\s*rating|rating\s*action|rating\s*agency",
    },
    Rule {
        category: Category::EarningsCallTranscript,
        pattern: r"(?i)earnings\s*call|conference\s*call|call\s*transcript|transcript",
    },
];

fn compiled_rules() -> &'static Vec<(Category, Regex)> {
    static RULES_CELL: OnceLock<Vec<(Category, Regex)>> = OnceLock::new();
    RULES_CELL.get_or_init(|| {
        RULES
            .iter()
            .map(|r| (r.category, Regex::new(r.pattern).expect("static rule pattern")))
            .collect()
    })
}

fn assign_category(descriptor: &str, headline: &str, news_body: &str) -> Category {
    if let Some(cat) = Category::from_descriptor(descriptor) {
        return cat;
    }
    for (category, re) in compiled_rules() {
        if re.is_match(headline) || re.is_match(news_body) {
            return *category;
        }
    }
    Category::General
}

/// Derives the idempotency key: `AttachmentName` minus its `.pdf` suffix.
fn news_id_from_attachment(attachment_name: &str) -> Option<String> {
    let trimmed = attachment_name.trim();
    if !trimmed.to_lowercase().ends_with(".pdf") {
        return None;
    }
    Some(trimmed[..trimmed.len() - 4].to_string())
}

/// Parses the upstream `Tradedate` (`DD/MM/YYYY HH:MM:SS`) into the
/// canonical storage format (`YYYY-MM-DD HH:MM:SS`).
fn normalize_tradedate(raw: &str) -> Result<String, CategorizeError> {
    NaiveDateTime::parse_from_str(raw.trim(), "%d/%m/%Y %H:%M:%S")
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .map_err(|_| CategorizeError::BadTradedate(raw.to_string()))
}

fn scrip_code_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub struct Categorizer<'a> {
    reference: &'a ReferenceMap,
}

pub struct CategorizeOutcome {
    pub accepted: Vec<CanonicalAnnouncement>,
    pub rejected: usize,
}

impl<'a> Categorizer<'a> {
    pub fn new(reference: &'a ReferenceMap) -> Self {
        Self { reference }
    }

    /// Filters and categorizes a raw batch. `seen_news_ids` is the mutable
    /// existing-id set (already-stored ids plus ids accepted earlier in
    /// this same run); records colliding with it are rejected and the set
    /// grows as records are accepted, so duplicates within the batch are
    /// caught too.
    pub fn run(
        &self,
        raw_batch: Vec<RawAnnouncement>,
        seen_news_ids: &mut HashSet<String>,
    ) -> CategorizeOutcome {
        let mut accepted = Vec::with_capacity(raw_batch.len());
        let mut rejected = 0usize;

        for raw in raw_batch {
            match self.categorize_one(raw, seen_news_ids) {
                Ok(canonical) => {
                    seen_news_ids.insert(canonical.news_id.clone());
                    accepted.push(canonical);
                }
                Err(e) => {
                    debug!("rejected raw announcement: {e}");
                    rejected += 1;
                }
            }
        }

        CategorizeOutcome { accepted, rejected }
    }

    fn categorize_one(
        &self,
        raw: RawAnnouncement,
        seen_news_ids: &HashSet<String>,
    ) -> Result<CanonicalAnnouncement, CategorizeError> {
        let news_id =
            news_id_from_attachment(&raw.AttachmentName).ok_or(CategorizeError::MissingAttachment)?;

        if seen_news_ids.contains(&news_id) {
            return Err(CategorizeError::DuplicateNewsId);
        }

        let scrip_key = scrip_code_key(&raw.SCRIP_CD);
        let reference = self
            .reference
            .get(&scrip_key)
            .ok_or_else(|| CategorizeError::UnknownScrip(scrip_key.clone()))?;

        let tradedate = normalize_tradedate(&raw.Tradedate)?;
        let category = assign_category(&raw.Descriptor, &raw.HeadLine, &raw.NewsBody);

        Ok(CanonicalAnnouncement {
            news_id,
            company: reference.company.clone(),
            symbolmap: reference.symbolmap.clone(),
            tradedate,
            category,
            headline: raw.HeadLine,
            news_body: raw.NewsBody,
            descriptor: raw.Descriptor,
            attachment_url: raw.ATTACHMENTURL,
            extra: raw.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompanyReference, SymbolMap};
    use std::collections::HashMap as StdHashMap;

    fn raw(attachment: &str, scrip: &str, descriptor: &str, headline: &str, tradedate: &str) -> RawAnnouncement {
        raw_with_body(attachment, scrip, descriptor, headline, "", tradedate)
    }

    fn raw_with_body(
        attachment: &str,
        scrip: &str,
        descriptor: &str,
        headline: &str,
        news_body: &str,
        tradedate: &str,
    ) -> RawAnnouncement {
        RawAnnouncement {
            SCRIP_CD: serde_json::Value::String(scrip.to_string()),
            AttachmentName: attachment.to_string(),
            HeadLine: headline.to_string(),
            NewsBody: news_body.to_string(),
            Descriptor: descriptor.to_string(),
            Tradedate: tradedate.to_string(),
            ATTACHMENTURL: "https://example.com/a.pdf".to_string(),
            extra: StdHashMap::new(),
        }
    }

    fn reference_map() -> ReferenceMap {
        let mut map = ReferenceMap::new();
        map.insert(
            "500001".to_string(),
            CompanyReference {
                company: "INE000A01010".to_string(),
                symbolmap: SymbolMap::new(Some("ACME".into()), 500001, "Acme Industries".into()),
            },
        );
        map
    }

    #[test]
    fn non_pdf_attachment_is_rejected() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw("notes.txt", "500001", "", "General update", "01/04/2025 10:00:00")],
            &mut seen,
        );
        assert_eq!(outcome.accepted.len(), 0);
        assert_eq!(outcome.rejected, 1);
    }

    #[test]
    fn unknown_scrip_is_rejected() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw("doc.pdf", "999999", "", "General update", "01/04/2025 10:00:00")],
            &mut seen,
        );
        assert_eq!(outcome.rejected, 1);
    }

    #[test]
    fn descriptor_override_wins_over_regex_rules() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw(
                "doc.pdf",
                "500001",
                "Annual Report",
                "Quarterly earnings call transcript enclosed",
                "01/04/2025 10:00:00",
            )],
            &mut seen,
        );
        assert_eq!(outcome.accepted[0].category, Category::AnnualReport);
    }

    #[test]
    fn regex_rule_matches_when_descriptor_is_blank() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw(
                "doc.pdf",
                "500001",
                "",
                "Investor Presentation - Q4 FY25 results",
                "01/04/2025 10:00:00",
            )],
            &mut seen,
        );
        assert_eq!(outcome.accepted[0].category, Category::InvestorPresentation);
    }

    #[test]
    fn rule_matches_against_news_body_even_with_an_unrelated_headline() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw_with_body(
                "doc.pdf",
                "500001",
                "",
                "Board meeting intimation",
                "Annual report enclosed as attachment",
                "01/04/2025 10:00:00",
            )],
            &mut seen,
        );
        assert_eq!(outcome.accepted[0].category, Category::AnnualReport);
    }

    #[test]
    fn no_rule_match_falls_back_to_general() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw("doc.pdf", "500001", "", "Board meeting intimation", "01/04/2025 10:00:00")],
            &mut seen,
        );
        assert_eq!(outcome.accepted[0].category, Category::General);
    }

    #[test]
    fn duplicate_news_id_within_batch_is_rejected_on_second_occurrence() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![
                raw("doc.pdf", "500001", "", "Board meeting intimation", "01/04/2025 10:00:00"),
                raw("doc.pdf", "500001", "", "Board meeting intimation", "01/04/2025 10:00:00"),
            ],
            &mut seen,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected, 1);
    }

    #[test]
    fn tradedate_is_normalized_to_canonical_storage_format() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw("doc.pdf", "500001", "", "Board meeting intimation", "05/12/2025 14:30:45")],
            &mut seen,
        );
        assert_eq!(outcome.accepted[0].tradedate, "2025-12-05 14:30:45");
    }

    #[test]
    fn bad_tradedate_is_rejected() {
        let reference = reference_map();
        let categorizer = Categorizer::new(&reference);
        let mut seen = HashSet::new();
        let outcome = categorizer.run(
            vec![raw("doc.pdf", "500001", "", "Board meeting intimation", "not-a-date")],
            &mut seen,
        );
        assert_eq!(outcome.rejected, 1);
    }
}
