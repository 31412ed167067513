//! URLs and element locators of the listing site.

use crate::renderer::Locator;
use url::Url;

/// Default origin of the listing site.
pub const DEFAULT_BASE_URL: &str = "https://www.linkedin.com";

/// Listing cards on a search result page.
pub const LISTING_CARDS: &str = "//div[@data-job-id]";
/// Scrollable result list container (class name).
pub const RESULTS_LIST_CLASS: &str = "jobs-search-results-list";
/// Apply buttons on a detail page.
pub const APPLY_BUTTONS: &str = "//button[contains(@class, \"jobs-apply-button\")]";
/// Any anchor pointing at a company profile.
pub const COMPANY_ANCHORS: &str = "//a[contains(@href,'/company/')]";

/// Ordered candidates for the company link of a detail page.
pub const COMPANY_LINK_CANDIDATES: [&str; 4] = [
    "a.topcard__org-name-link",
    "a.jobs-unified-top-card__company-name",
    "a[data-control-name='company_link']",
    "a.topcard__flavor--black-link",
];

/// Anchors that link to the people search of a company.
pub const MEMBER_ANCHORS: [&str; 2] = [
    "//a[contains(@href,'/search/results/people/') and contains(@href,'currentCompany=') and contains(@href,'origin=COMPANY_PAGE_CANNED_SEARCH')]",
    "//a[contains(@href,'/search/results/people/') and contains(@href,'currentCompany=')]",
];

/// Login form fields.
pub const LOGIN_USERNAME: &str = "#username";
pub const LOGIN_PASSWORD: &str = "#password";
pub const LOGIN_SUBMIT: &str = "button[type='submit']";

pub fn listing_cards() -> Locator {
    Locator::xpath(LISTING_CARDS)
}

pub fn results_list() -> Locator {
    Locator::class_name(RESULTS_LIST_CLASS)
}

pub fn apply_buttons() -> Locator {
    Locator::xpath(APPLY_BUTTONS)
}

pub fn company_anchors() -> Locator {
    Locator::xpath(COMPANY_ANCHORS)
}

pub fn company_link_candidates() -> Vec<Locator> {
    COMPANY_LINK_CANDIDATES.iter().map(|s| Locator::css(s)).collect()
}

pub fn member_anchors() -> Vec<Locator> {
    MEMBER_ANCHORS.iter().map(|s| Locator::xpath(s)).collect()
}

/// Search filters applied to every result page.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub experience_levels: Vec<u32>,
    pub date_posted_days: u32,
    pub quick_apply_only: bool,
}

/// Build the result-page URL for one combination at `offset`.
pub fn search_url(
    base: &str,
    position: &str,
    location: &str,
    offset: usize,
    filters: &SearchFilters,
) -> String {
    let mut url = match Url::parse(base).and_then(|b| b.join("/jobs/search/")) {
        Ok(url) => url,
        Err(_) => return format!("{base}/jobs/search/"),
    };
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("keywords", position);
        q.append_pair("location", location);
        if !filters.experience_levels.is_empty() {
            let codes: Vec<String> = filters
                .experience_levels
                .iter()
                .map(|c| c.to_string())
                .collect();
            q.append_pair("f_E", &codes.join(","));
        }
        if filters.date_posted_days > 0 {
            let seconds = u64::from(filters.date_posted_days) * 24 * 60 * 60;
            q.append_pair("f_TPR", &format!("r{seconds}"));
        }
        if filters.quick_apply_only {
            q.append_pair("f_LF", "f_AL");
        }
        q.append_pair("sortBy", "R");
        q.append_pair("start", &offset.to_string());
    }
    url.to_string()
}

/// Canonical detail-page URL of a listing.
pub fn listing_url(base: &str, job_id: &str) -> String {
    format!("{}/jobs/view/{job_id}", base.trim_end_matches('/'))
}

pub fn login_url(base: &str) -> String {
    format!("{}/login", base.trim_end_matches('/'))
}

/// Public HTML fragment with the listing description.
pub fn guest_posting_url(base: &str, job_id: &str) -> String {
    format!(
        "{}/jobs-guest/jobs/api/jobPosting/{job_id}",
        base.trim_end_matches('/')
    )
}

/// Internal JSON payload of a listing.
pub fn internal_posting_url(base: &str, job_id: &str) -> String {
    format!(
        "{}/voyager/api/jobs/jobPostings/{job_id}",
        base.trim_end_matches('/')
    )
}
