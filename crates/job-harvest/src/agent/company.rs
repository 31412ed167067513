//! Company profile link normalization and about-page parsing.
//!
//! All functions here are pure: they operate on element snapshots and
//! page text captured by the agent.

use crate::renderer::ElementSnapshot;
use regex::Regex;
use std::sync::OnceLock;

fn company_root_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(https?://www\.linkedin\.com/company/[^/?#]+)")
            .expect("company url regex is valid")
    })
}

fn company_size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)Company size\s*\n\s*([0-9,]+\s*-\s*[0-9,]+\s+employees|[0-9,]+\+\s+employees)",
        )
        .expect("company size regex is valid")
    })
}

fn members_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([0-9,]+)\s+associated\s+members").expect("members regex is valid")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex is valid"))
}

/// Collapse whitespace runs and trim.
pub fn normalize_space(s: &str) -> String {
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Reduce a company link to `https://www.linkedin.com/company/<slug>/`.
///
/// Sub-pages (`/life`, `/people`), query strings and fragments are
/// dropped. Returns an empty string when no company root is present.
pub fn normalize_company_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match company_root_re().captures(raw) {
        Some(caps) => format!("{}/", caps[1].trim_end_matches('/')),
        None => String::new(),
    }
}

/// About sub-page of a normalized company root.
pub fn about_url(company_root: &str) -> String {
    format!("{}/about/", company_root.trim_end_matches('/'))
}

/// First company link among the ordered candidate groups, then among
/// generic anchors.
pub fn pick_company_link(candidates: &[Vec<ElementSnapshot>], anchors: &[ElementSnapshot]) -> Option<String> {
    let from_candidates = candidates
        .iter()
        .flatten()
        .filter_map(|el| el.attribute("href"))
        .find(|href| href.contains("/company/"));
    if let Some(href) = from_candidates {
        return Some(href.to_string());
    }
    anchors
        .iter()
        .filter_map(|el| el.attribute("href"))
        .find(|href| href.contains("linkedin.com/company/"))
        .map(str::to_string)
}

/// Size bucket from `dt`/`dd` label pairs.
pub fn company_size_from_pairs(labels: &[ElementSnapshot]) -> Option<String> {
    labels
        .iter()
        .filter(|dt| normalize_space(&dt.text).to_lowercase() == "company size")
        .filter_map(|dt| dt.sibling_text.as_deref())
        .map(normalize_space)
        .find(|v| !v.is_empty())
}

/// Size bucket from raw page text.
pub fn company_size_from_text(body: &str) -> Option<String> {
    company_size_re()
        .captures(body)
        .map(|caps| normalize_space(&caps[1]))
}

/// `"<N> associated members"` from a piece of text.
pub fn associated_members_from_text(text: &str) -> Option<String> {
    members_re()
        .captures(text)
        .map(|caps| format!("{} associated members", &caps[1]))
}

/// Member count from people-search anchors, in candidate order.
pub fn associated_members_from_anchors(groups: &[Vec<ElementSnapshot>]) -> Option<String> {
    groups
        .iter()
        .flatten()
        .find_map(|el| associated_members_from_text(&normalize_space(&el.text)))
}
