//! Selector-fallback chains for listing detail fields.
//!
//! The agent captures a [`DetailSnapshot`] of every locator the chains
//! need, then each logical field is resolved by trying its chain of
//! extractors in order. The first non-empty result wins; when all fail
//! the field is an empty string.

use crate::renderer::{ElementSnapshot, Locator};
use crate::site;
use std::collections::HashMap;

pub const HEADING: &str = "h1";
pub const ORG_NAME_LINK: &str = "a.topcard__org-name-link";
pub const FLAVOR_LINK: &str = "span.topcard__flavor a";
pub const FLAVOR_BULLET: &str = "span.topcard__flavor--bullet";
pub const UNIFIED_BULLET: &str = "span.jobs-unified-top-card__bullet";
pub const CRITERIA_ITEM: &str = "li.description__job-criteria-item";

/// Everything on a detail page that the extractors look at.
#[derive(Debug, Clone, Default)]
pub struct DetailSnapshot {
    /// Document title.
    pub title: String,
    /// Page source, for phrase scans.
    pub html: String,
    /// Elements keyed by `Locator` display form.
    pub elements: HashMap<String, Vec<ElementSnapshot>>,
}

impl DetailSnapshot {
    pub fn with(mut self, locator: &Locator, elements: Vec<ElementSnapshot>) -> Self {
        self.elements.insert(locator.to_string(), elements);
        self
    }

    fn get(&self, locator: &Locator) -> &[ElementSnapshot] {
        self.elements
            .get(&locator.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn first_text(&self, css: &str) -> Option<String> {
        self.get(&Locator::css(css))
            .first()
            .map(|el| el.text.trim().to_string())
    }

    fn title_segment(&self, index: usize) -> Option<String> {
        self.title.split(" | ").nth(index).map(|s| s.trim().to_string())
    }

    /// Value of a job-criteria item whose label contains `label`.
    fn criteria(&self, label: &str) -> Option<String> {
        self.get(&Locator::css(CRITERIA_ITEM)).iter().find_map(|item| {
            let lines: Vec<&str> = item
                .text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            match lines.as_slice() {
                [key, value, ..] if key.to_lowercase().contains(label) => {
                    Some(value.to_string())
                }
                _ => None,
            }
        })
    }
}

/// Locators captured for a detail page.
pub fn detail_locators() -> Vec<Locator> {
    vec![
        Locator::css(HEADING),
        Locator::css(ORG_NAME_LINK),
        Locator::css(FLAVOR_LINK),
        Locator::css(FLAVOR_BULLET),
        Locator::css(UNIFIED_BULLET),
        Locator::css(CRITERIA_ITEM),
        site::apply_buttons(),
    ]
}

pub type Extractor = fn(&DetailSnapshot) -> Option<String>;
pub type Detector = fn(&DetailSnapshot) -> bool;

fn heading(s: &DetailSnapshot) -> Option<String> {
    s.first_text(HEADING)
}

fn title_first_segment(s: &DetailSnapshot) -> Option<String> {
    s.title_segment(0)
}

fn org_name_link(s: &DetailSnapshot) -> Option<String> {
    s.first_text(ORG_NAME_LINK)
}

fn flavor_link(s: &DetailSnapshot) -> Option<String> {
    s.first_text(FLAVOR_LINK)
}

fn title_second_segment(s: &DetailSnapshot) -> Option<String> {
    s.title_segment(1)
}

fn bullet(css: &str, s: &DetailSnapshot) -> Option<String> {
    s.get(&Locator::css(css))
        .iter()
        .map(|el| el.text.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

fn flavor_bullet(s: &DetailSnapshot) -> Option<String> {
    bullet(FLAVOR_BULLET, s)
}

fn unified_bullet(s: &DetailSnapshot) -> Option<String> {
    bullet(UNIFIED_BULLET, s)
}

fn criteria_workplace(s: &DetailSnapshot) -> Option<String> {
    s.criteria("workplace type")
}

fn criteria_seniority(s: &DetailSnapshot) -> Option<String> {
    s.criteria("seniority level")
}

fn criteria_employment(s: &DetailSnapshot) -> Option<String> {
    s.criteria("employment type")
}

fn apply_button_label(s: &DetailSnapshot) -> bool {
    s.get(&site::apply_buttons())
        .iter()
        .any(|b| b.text.contains("Easy Apply"))
}

fn page_source_phrase(s: &DetailSnapshot) -> bool {
    s.html.contains("Easy Apply")
}

pub const TITLE_CHAIN: &[Extractor] = &[heading, title_first_segment];
pub const COMPANY_CHAIN: &[Extractor] = &[org_name_link, flavor_link, title_second_segment];
pub const LOCATION_CHAIN: &[Extractor] = &[flavor_bullet, unified_bullet];
pub const WORKPLACE_CHAIN: &[Extractor] = &[criteria_workplace];
pub const SENIORITY_CHAIN: &[Extractor] = &[criteria_seniority];
pub const EMPLOYMENT_CHAIN: &[Extractor] = &[criteria_employment];
pub const QUICK_APPLY_CHAIN: &[Detector] = &[apply_button_label, page_source_phrase];

/// First non-empty result of the chain, or an empty string.
pub fn resolve(chain: &[Extractor], snapshot: &DetailSnapshot) -> String {
    chain
        .iter()
        .filter_map(|extract| extract(snapshot))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Whether any detector in the chain fires.
pub fn detect(chain: &[Detector], snapshot: &DetailSnapshot) -> bool {
    chain.iter().any(|d| d(snapshot))
}

/// Core fields of a listing detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingFields {
    pub title: String,
    pub company: String,
    pub location: String,
    pub workplace_type: String,
    pub seniority: String,
    pub employment_type: String,
    pub quick_apply: bool,
}

impl ListingFields {
    pub fn from_snapshot(snapshot: &DetailSnapshot) -> Self {
        Self {
            title: resolve(TITLE_CHAIN, snapshot),
            company: resolve(COMPANY_CHAIN, snapshot),
            location: resolve(LOCATION_CHAIN, snapshot),
            workplace_type: resolve(WORKPLACE_CHAIN, snapshot),
            seniority: resolve(SENIORITY_CHAIN, snapshot),
            employment_type: resolve(EMPLOYMENT_CHAIN, snapshot),
            quick_apply: detect(QUICK_APPLY_CHAIN, snapshot),
        }
    }
}
