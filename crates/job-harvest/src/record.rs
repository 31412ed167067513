//! The harvested listing record and the canonical store schema.

use chrono::{NaiveDateTime, Utc};

/// Marker written into enrichment columns when the value was never
/// attempted or the attempt failed.
pub const UNAVAILABLE: &str = "cannot fetch";

/// Timestamp layout used for every date-time column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the unique listing identifier column.
pub const ID_COLUMN: &str = "jobID";

/// Name of the company column (key of the enrichment index).
pub const COMPANY_COLUMN: &str = "company";

/// Enrichment columns added by the schema migration.
pub const ENRICHMENT_COLUMNS: [&str; 3] =
    ["company_about_url", "company_size", "associated_members"];

/// Canonical column order of the store file.
pub const CANONICAL_COLUMNS: [&str; 18] = [
    "run_at",
    "posted_at",
    "timestamp",
    ID_COLUMN,
    "title",
    COMPANY_COLUMN,
    "location",
    "workplace_type",
    "seniority",
    "employment_type",
    "easy_apply",
    "job_description",
    "job_url",
    "search_position",
    "search_location",
    "company_about_url",
    "company_size",
    "associated_members",
];

/// Company-profile fields gathered by enrichment.
///
/// Each field is independent: a failed size lookup leaves the member
/// count untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyProfile {
    pub about_url: String,
    pub size: String,
    pub associated_members: String,
}

impl CompanyProfile {
    /// Profile for a company that was not (or could not be) looked up.
    pub fn unavailable() -> Self {
        Self {
            about_url: UNAVAILABLE.to_string(),
            size: UNAVAILABLE.to_string(),
            associated_members: UNAVAILABLE.to_string(),
        }
    }

    /// Whether size or member count was actually captured.
    pub fn is_captured(&self) -> bool {
        self.size != UNAVAILABLE || self.associated_members != UNAVAILABLE
    }
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// One harvested listing. Built once, written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub run_at: String,
    /// Best-effort; empty when the posting time is unknown.
    pub posted_at: String,
    /// Capture time.
    pub timestamp: String,
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub workplace_type: String,
    pub seniority: String,
    pub employment_type: String,
    pub quick_apply: bool,
    pub description: String,
    pub job_url: String,
    pub search_position: String,
    pub search_location: String,
    pub profile: CompanyProfile,
}

impl JobRecord {
    /// Serialize into the canonical column order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.run_at.clone(),
            self.posted_at.clone(),
            self.timestamp.clone(),
            self.job_id.clone(),
            self.title.clone(),
            self.company.clone(),
            self.location.clone(),
            self.workplace_type.clone(),
            self.seniority.clone(),
            self.employment_type.clone(),
            if self.quick_apply { "True" } else { "False" }.to_string(),
            self.description.clone(),
            self.job_url.clone(),
            self.search_position.clone(),
            self.search_location.clone(),
            non_empty_or_unavailable(&self.profile.about_url),
            non_empty_or_unavailable(&self.profile.size),
            non_empty_or_unavailable(&self.profile.associated_members),
        ]
    }

    /// Parsed posting time, if known.
    pub fn posted_at_time(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.posted_at)
    }
}

fn non_empty_or_unavailable(value: &str) -> String {
    if value.trim().is_empty() {
        UNAVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

/// Current UTC time in the store's timestamp layout.
pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a store timestamp; `None` for empty or malformed input.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobRecord {
        JobRecord {
            run_at: "2026-01-01 00:00:00".into(),
            posted_at: String::new(),
            timestamp: "2026-01-01 00:01:00".into(),
            job_id: "42".into(),
            title: "Engineer".into(),
            company: "Acme".into(),
            location: "Berlin".into(),
            workplace_type: String::new(),
            seniority: String::new(),
            employment_type: String::new(),
            quick_apply: true,
            description: "desc".into(),
            job_url: "https://www.linkedin.com/jobs/view/42".into(),
            search_position: "rust".into(),
            search_location: "Berlin".into(),
            profile: CompanyProfile {
                about_url: String::new(),
                size: "11-50 employees".into(),
                associated_members: UNAVAILABLE.into(),
            },
        }
    }

    #[test]
    fn test_row_matches_canonical_width() {
        let row = sample().to_row();
        assert_eq!(row.len(), CANONICAL_COLUMNS.len());
        assert_eq!(row[3], "42");
        assert_eq!(row[10], "True");
    }

    #[test]
    fn test_empty_enrichment_becomes_sentinel() {
        let row = sample().to_row();
        assert_eq!(row[15], UNAVAILABLE);
        assert_eq!(row[16], "11-50 employees");
    }

    #[test]
    fn test_profile_capture_flag() {
        assert!(!CompanyProfile::unavailable().is_captured());
        assert!(sample().profile.is_captured());
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2026-03-04 05:06:07").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
