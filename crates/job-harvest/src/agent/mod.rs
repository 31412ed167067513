//! Page automation agent.
//!
//! Drives one rendering context: navigation, scrolling, element
//! discovery, block detection, readiness polling, field extraction and
//! company enrichment. Extraction failures never raise past this layer;
//! missing data comes back as empty strings or the unavailable sentinel.

pub mod company;
pub mod fields;

use crate::config::TimingConfig;
use crate::error::HarvestError;
use crate::record::{CompanyProfile, UNAVAILABLE};
use crate::renderer::{ElementSnapshot, Locator, NavigationResult, RenderContext};
use crate::site::{self, SearchFilters};
use anyhow::Result;
use fields::{DetailSnapshot, ListingFields};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const BLOCKED_URL_MARKERS: [&str; 4] = ["checkpoint", "authwall", "login", "challenge"];
const BLOCKED_TITLE_MARKERS: [&str; 3] = ["sign in", "security verification", "authentication"];
const BLOCKED_BODY_MARKERS: [&str; 3] = [
    "security verification",
    "confirm your identity",
    "sign in to linkedin",
];

/// Classify a page as an authentication or verification wall.
///
/// URL markers are matched against the path only, so search keywords in
/// the query string never trigger them.
pub fn looks_blocked(url: &str, title: &str, body: &str) -> bool {
    let url = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    let title = title.to_lowercase();
    let body = body.to_lowercase();
    BLOCKED_URL_MARKERS.iter().any(|m| url.contains(m))
        || BLOCKED_TITLE_MARKERS.iter().any(|m| title.contains(m))
        || BLOCKED_BODY_MARKERS.iter().any(|m| body.contains(m))
}

/// New listing ids among result cards, in page order, without repeats.
///
/// Skips cards already applied to, cards whose text contains a
/// blacklist entry, placeholder ids and ids for which `known` is true.
pub fn select_listing_ids<F>(cards: &[ElementSnapshot], blacklist: &[String], known: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let blacklist: Vec<String> = blacklist
        .iter()
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .collect();

    let mut ids: Vec<String> = Vec::new();
    for card in cards {
        if card.text.contains("Applied") {
            continue;
        }
        let text = card.text.to_lowercase();
        if blacklist.iter().any(|b| text.contains(b.as_str())) {
            continue;
        }
        let Some(id) = card.attribute("data-job-id") else {
            continue;
        };
        if id == "search" || known(id) || ids.iter().any(|seen| seen == id) {
            continue;
        }
        ids.push(id.to_string());
    }
    ids
}

/// Drives the rendering engine for one harvest run.
pub struct PageAgent {
    ctx: Box<dyn RenderContext>,
    base_url: String,
    timing: TimingConfig,
    rng: StdRng,
}

impl PageAgent {
    pub fn new(ctx: Box<dyn RenderContext>, base_url: &str, timing: TimingConfig) -> Self {
        Self {
            ctx,
            base_url: base_url.trim_end_matches('/').to_string(),
            timing,
            rng: StdRng::from_entropy(),
        }
    }

    /// The underlying context, for cookie hand-off.
    pub fn context(&self) -> &dyn RenderContext {
        self.ctx.as_ref()
    }

    pub async fn close(self) -> Result<()> {
        self.ctx.close().await
    }

    pub async fn navigate(&mut self, url: &str) -> Result<NavigationResult> {
        self.ctx
            .navigate(url, self.timing.navigation_timeout_ms)
            .await
            .map_err(|e| {
                anyhow::Error::new(HarvestError::Navigation {
                    url: url.to_string(),
                    reason: format!("{e:#}"),
                })
            })
    }

    /// Scroll the window from the top in `step` increments up to `limit`.
    pub async fn scroll_through(&mut self, step: u32, limit: u32, delay: Duration) {
        let step = step.max(1);
        let mut offset = 0;
        while offset < limit {
            let _ = self
                .ctx
                .execute_js(&format!("window.scrollTo(0, {offset});"))
                .await;
            offset += step;
            tokio::time::sleep(delay).await;
        }
    }

    /// Snapshot elements; engine errors count as no match.
    pub async fn find_all(&self, locator: &Locator) -> Vec<ElementSnapshot> {
        match self.ctx.find_all(locator).await {
            Ok(elements) => elements,
            Err(e) => {
                debug!("find_all {locator} failed: {e:#}");
                Vec::new()
            }
        }
    }

    /// Text of the first match, or of all matches joined by a space.
    pub async fn read_text(&self, locator: &Locator, allow_multiple: bool) -> String {
        let elements = self.find_all(locator).await;
        if allow_multiple {
            elements
                .iter()
                .map(|e| e.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            elements
                .first()
                .map(|e| e.text.trim().to_string())
                .unwrap_or_default()
        }
    }

    pub fn read_attribute(element: &ElementSnapshot, name: &str) -> Option<String> {
        element.attribute(name).map(str::to_string)
    }

    pub async fn current_url(&self) -> String {
        self.ctx.get_url().await.unwrap_or_default()
    }

    pub async fn current_title(&self) -> String {
        self.ctx.get_title().await.unwrap_or_default()
    }

    /// Whether the current page is a sign-in or verification wall.
    pub async fn is_blocked(&self) -> bool {
        let url = self.current_url().await;
        let title = self.current_title().await;
        let body = self.ctx.body_text().await.unwrap_or_default();
        looks_blocked(&url, &title, &body)
    }

    /// Block check for a result page. Its title echoes the search
    /// keywords, so only the URL path and body are consulted.
    pub async fn is_search_blocked(&self) -> bool {
        let url = self.current_url().await;
        let body = self.ctx.body_text().await.unwrap_or_default();
        looks_blocked(&url, "", &body)
    }

    async fn random_pause(&mut self, min_ms: u64, max_ms: u64) {
        if max_ms == 0 {
            return;
        }
        let ms = if max_ms > min_ms {
            self.rng.gen_range(min_ms..=max_ms)
        } else {
            max_ms
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Sign in through the login form, typing like a person would.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        info!("logging in");
        let url = site::login_url(&self.base_url);
        self.navigate(&url).await?;
        let (min, max) = (self.timing.form_pause_min_ms, self.timing.form_pause_max_ms);
        self.random_pause(min, max).await;

        self.type_slowly(site::LOGIN_USERNAME, username).await?;
        self.random_pause(min, max).await;
        self.type_slowly(site::LOGIN_PASSWORD, password).await?;
        self.random_pause(min, max).await;

        self.ctx.click(site::LOGIN_SUBMIT).await?;
        tokio::time::sleep(Duration::from_millis(self.timing.login_settle_ms)).await;

        if self.is_blocked().await {
            warn!("still on a sign-in or verification page after login: {}", self.current_url().await);
        }
        Ok(())
    }

    async fn type_slowly(&mut self, css: &str, text: &str) -> Result<()> {
        let (min, max) = (self.timing.keystroke_min_ms, self.timing.keystroke_max_ms);
        for ch in text.chars() {
            self.ctx.type_text(css, &ch.to_string()).await?;
            self.random_pause(min, max).await;
        }
        Ok(())
    }

    /// Open a result page and let it render.
    pub async fn open_search_page(
        &mut self,
        position: &str,
        location: &str,
        offset: usize,
        filters: &SearchFilters,
    ) -> Result<()> {
        let url = site::search_url(&self.base_url, position, location, offset, filters);
        info!(
            "loading result page: start={offset}, date_posted_days={}, quick_apply_only={}",
            filters.date_posted_days, filters.quick_apply_only
        );
        self.navigate(&url).await?;
        let t = &self.timing;
        let (step, limit, delay) = (t.scroll_step_px, t.scroll_limit_px, t.scroll_delay_ms);
        self.scroll_through(step, limit, Duration::from_millis(delay)).await;
        Ok(())
    }

    /// Scroll the current result page again, then the result list itself,
    /// so lazily rendered cards appear.
    pub async fn render_results(&mut self) {
        let t = &self.timing;
        let (step, limit, delay) = (t.scroll_step_px, t.scroll_limit_px, t.rescroll_delay_ms);
        let delay = Duration::from_millis(delay);
        self.scroll_through(step, limit, delay).await;
        let _ = self.ctx.execute_js("window.scrollTo(0, 0);").await;
        tokio::time::sleep(delay).await;

        if self.find_all(&site::results_list()).await.is_empty() {
            return;
        }
        let class = serde_json::to_string(site::RESULTS_LIST_CLASS).unwrap_or_default();
        for y in (300..3000).step_by(100) {
            let script = format!(
                "(() => {{ const l = document.getElementsByClassName({class})[0]; if (l) l.scrollTo(0, {y}); }})()"
            );
            let _ = self.ctx.execute_js(&script).await;
        }
    }

    /// New listing ids visible on the current result page.
    pub async fn collect_listing_ids<F>(&self, blacklist: &[String], known: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let cards = self.find_all(&site::listing_cards()).await;
        let ids = select_listing_ids(&cards, blacklist, known);
        info!("found {} new listing ids on this page", ids.len());
        ids
    }

    /// Open a listing's detail page and wait for its company link.
    pub async fn open_listing(&mut self, job_id: &str) -> Result<String> {
        let url = site::listing_url(&self.base_url, job_id);
        self.navigate(&url).await?;
        let timeout = Duration::from_millis(self.timing.readiness_timeout_ms);
        self.wait_company_link_ready(timeout).await;
        let (min, max) = (self.timing.detail_settle_min_ms, self.timing.detail_settle_max_ms);
        self.random_pause(min, max).await;
        Ok(url)
    }

    /// Poll until a company-profile link is rendered.
    ///
    /// Returns `false` on timeout or when the page is blocked.
    pub async fn wait_company_link_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let interval = Duration::from_millis(self.timing.poll_interval_ms.max(1));
        let mut last_href = String::new();

        loop {
            if self.is_blocked().await {
                return false;
            }

            for locator in site::company_link_candidates() {
                for el in self.find_all(&locator).await {
                    if let Some(href) = el.attribute("href") {
                        if href.contains("/company/") {
                            return true;
                        }
                        last_href = href.to_string();
                    }
                }
            }
            for el in self.find_all(&site::company_anchors()).await {
                if let Some(href) = el.attribute("href") {
                    if href.contains("linkedin.com/company/") {
                        return true;
                    }
                    last_href = href.to_string();
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        if !last_href.is_empty() {
            debug!("company link not ready before timeout, last href={last_href}");
        }
        false
    }

    /// Capture the current detail page for the field chains.
    pub async fn detail_snapshot(&self) -> DetailSnapshot {
        let mut snapshot = DetailSnapshot {
            title: self.current_title().await,
            html: self.ctx.get_html().await.unwrap_or_default(),
            ..DetailSnapshot::default()
        };
        for locator in fields::detail_locators() {
            let elements = self.find_all(&locator).await;
            snapshot = snapshot.with(&locator, elements);
        }
        snapshot
    }

    /// Resolve every listing field on the current detail page.
    pub async fn extract_fields(&self) -> ListingFields {
        ListingFields::from_snapshot(&self.detail_snapshot().await)
    }

    /// Raw company link of the current detail page.
    pub async fn company_link(&self) -> Option<String> {
        let mut candidates = Vec::new();
        for locator in site::company_link_candidates() {
            candidates.push(self.find_all(&locator).await);
        }
        let anchors = self.find_all(&site::company_anchors()).await;
        company::pick_company_link(&candidates, &anchors)
    }

    /// Visit the company's about page and read size and member count.
    ///
    /// Must be called while the listing detail page is open. Each
    /// sub-field degrades to the unavailable sentinel on its own.
    pub async fn fetch_company_profile(&mut self) -> CompanyProfile {
        let raw = self.company_link().await.unwrap_or_default();
        let root = company::normalize_company_url(&raw);
        if root.is_empty() {
            debug!(
                "cannot extract company url, raw={raw:?} current={}",
                self.current_url().await
            );
            return CompanyProfile::unavailable();
        }

        let about = company::about_url(&root);
        let mut profile = CompanyProfile {
            about_url: about.clone(),
            ..CompanyProfile::unavailable()
        };

        if let Err(e) = self.navigate(&about).await {
            warn!("about page load failed url={about}: {e:#}");
            return profile;
        }
        let (min, max) = (self.timing.about_settle_min_ms, self.timing.about_settle_max_ms);
        self.random_pause(min, max).await;

        if self.is_blocked().await {
            warn!("blocked on company page {}", self.current_url().await);
            return profile;
        }

        profile.size = self
            .company_size()
            .await
            .unwrap_or_else(|| UNAVAILABLE.to_string());
        profile.associated_members = self
            .associated_members()
            .await
            .unwrap_or_else(|| UNAVAILABLE.to_string());
        profile
    }

    async fn company_size(&self) -> Option<String> {
        let labels = self.find_all(&Locator::css("dt")).await;
        if let Some(size) = company::company_size_from_pairs(&labels) {
            return Some(size);
        }
        let body = self.ctx.body_text().await.unwrap_or_default();
        company::company_size_from_text(&body)
    }

    async fn associated_members(&self) -> Option<String> {
        let mut groups = Vec::new();
        for locator in site::member_anchors() {
            groups.push(self.find_all(&locator).await);
        }
        if let Some(members) = company::associated_members_from_anchors(&groups) {
            return Some(members);
        }
        let body = self.ctx.body_text().await.unwrap_or_default();
        company::associated_members_from_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{ScriptedContext, ScriptedPage};

    fn quick_timing() -> TimingConfig {
        TimingConfig::immediate()
    }

    fn agent(ctx: ScriptedContext) -> PageAgent {
        PageAgent::new(Box::new(ctx), site::DEFAULT_BASE_URL, quick_timing())
    }

    fn card(id: &str, text: &str) -> ElementSnapshot {
        ElementSnapshot::with_text(text).attr("data-job-id", id)
    }

    #[test]
    fn test_block_detection_sources() {
        assert!(looks_blocked("https://www.linkedin.com/authwall?x", "", ""));
        assert!(looks_blocked("https://x/jobs/view/1", "Sign In | LinkedIn", ""));
        assert!(looks_blocked("https://x/", "", "Please confirm your identity"));
        assert!(!looks_blocked("https://www.linkedin.com/jobs/view/1", "Engineer | Acme", "About the job"));
    }

    #[test]
    fn test_search_keywords_do_not_look_blocked() {
        let url = "https://www.linkedin.com/jobs/search/?keywords=Checkpoint+Firewall+Login+Engineer&start=0";
        assert!(!looks_blocked(url, "Checkpoint Firewall Engineer Jobs | LinkedIn", ""));
        assert!(looks_blocked(
            "https://www.linkedin.com/checkpoint/challenge/abc?keywords=rust",
            "",
            ""
        ));
    }

    #[test]
    fn test_select_listing_ids_filters() {
        let cards = vec![
            card("1", "Rust Engineer\nAcme"),
            card("2", "Applied\nGo Engineer"),
            card("3", "Engineer\nShadyCorp"),
            card("search", "placeholder"),
            card("4", "Already stored"),
            card("1", "duplicate card"),
            ElementSnapshot::with_text("no id"),
            card("5", "Platform Engineer"),
        ];
        let blacklist = vec!["shadycorp".to_string(), " ".to_string()];
        let ids = select_listing_ids(&cards, &blacklist, |id| id == "4");
        assert_eq!(ids, vec!["1".to_string(), "5".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_company_link_ready_found() {
        let page = ScriptedPage::new("Engineer | Acme | LinkedIn").elements(
            &Locator::css(site::COMPANY_LINK_CANDIDATES[1]),
            vec![ElementSnapshot::with_text("Acme")
                .attr("href", "https://www.linkedin.com/company/acme/life")],
        );
        let mut a = agent(ScriptedContext::new().page("/jobs/view/1", page));
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();
        assert!(a.wait_company_link_ready(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_wait_company_link_ready_times_out() {
        let page = ScriptedPage::new("Engineer | Acme | LinkedIn").elements(
            &Locator::css(site::COMPANY_LINK_CANDIDATES[0]),
            vec![ElementSnapshot::with_text("Acme").attr("href", "https://www.linkedin.com/jobs/")],
        );
        let mut a = agent(ScriptedContext::new().page("/jobs/view/1", page));
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();
        let start = Instant::now();
        assert!(!a.wait_company_link_ready(Duration::from_millis(30)).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_wait_company_link_ready_stops_on_block() {
        let page = ScriptedPage::new("Security Verification | LinkedIn");
        let mut a = agent(ScriptedContext::new().page("/jobs/view/1", page));
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();
        assert!(!a.wait_company_link_ready(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_read_text_single_and_multiple() {
        let page = ScriptedPage::new("t").elements(
            &Locator::css("li"),
            vec![
                ElementSnapshot::with_text(" one "),
                ElementSnapshot::with_text(""),
                ElementSnapshot::with_text("two"),
            ],
        );
        let mut a = agent(ScriptedContext::new().page("/p", page));
        a.navigate("https://x/p").await.unwrap();
        assert_eq!(a.read_text(&Locator::css("li"), false).await, "one");
        assert_eq!(a.read_text(&Locator::css("li"), true).await, "one two");
        assert_eq!(a.read_text(&Locator::css("h9"), true).await, "");
    }

    #[tokio::test]
    async fn test_company_profile_from_about_page() {
        let detail = ScriptedPage::new("Engineer | Acme | LinkedIn").elements(
            &Locator::css(site::COMPANY_LINK_CANDIDATES[0]),
            vec![ElementSnapshot::with_text("Acme")
                .attr("href", "https://www.linkedin.com/company/acme/life?trk=x")],
        );
        let about = ScriptedPage::new("Acme: About | LinkedIn")
            .elements(
                &Locator::css("dt"),
                vec![ElementSnapshot::with_text("Company size").sibling("201-500 employees")],
            )
            .elements(
                &Locator::xpath(site::MEMBER_ANCHORS[1]),
                vec![ElementSnapshot::with_text("312 associated members")],
            );
        let ctx = ScriptedContext::new()
            .page("/jobs/view/1", detail)
            .page("/company/acme/about/", about);
        let log = ctx.log();
        let mut a = agent(ctx);
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();

        let profile = a.fetch_company_profile().await;
        assert_eq!(profile.about_url, "https://www.linkedin.com/company/acme/about/");
        assert_eq!(profile.size, "201-500 employees");
        assert_eq!(profile.associated_members, "312 associated members");
        assert_eq!(log.count_matching("/company/acme/about/"), 1);
    }

    #[tokio::test]
    async fn test_company_profile_without_size_label_is_field_granular() {
        let detail = ScriptedPage::new("Engineer | Acme | LinkedIn").elements(
            &site::company_anchors(),
            vec![ElementSnapshot::default().attr("href", "https://www.linkedin.com/company/acme/")],
        );
        let about = ScriptedPage::new("Acme: About | LinkedIn")
            .body("Overview\nIndustry\nSoftware\n48 associated members");
        let mut a = agent(
            ScriptedContext::new()
                .page("/jobs/view/1", detail)
                .page("/company/acme/about/", about),
        );
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();

        let profile = a.fetch_company_profile().await;
        assert_eq!(profile.size, UNAVAILABLE);
        assert_eq!(profile.associated_members, "48 associated members");
    }

    #[tokio::test]
    async fn test_company_profile_blocked_keeps_about_url() {
        let detail = ScriptedPage::new("Engineer | Acme | LinkedIn").elements(
            &site::company_anchors(),
            vec![ElementSnapshot::default().attr("href", "https://www.linkedin.com/company/acme/")],
        );
        let wall = ScriptedPage::new("Sign In | LinkedIn")
            .redirect_to("https://www.linkedin.com/authwall?trk=x");
        let mut a = agent(
            ScriptedContext::new()
                .page("/jobs/view/1", detail)
                .page("/company/acme/about/", wall),
        );
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();

        let profile = a.fetch_company_profile().await;
        assert_eq!(profile.about_url, "https://www.linkedin.com/company/acme/about/");
        assert_eq!(profile.size, UNAVAILABLE);
        assert_eq!(profile.associated_members, UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_company_profile_without_link() {
        let mut a = agent(ScriptedContext::new().page("/jobs/view/1", ScriptedPage::new("x")));
        a.navigate("https://www.linkedin.com/jobs/view/1").await.unwrap();
        assert_eq!(a.fetch_company_profile().await, CompanyProfile::unavailable());
    }

    #[tokio::test]
    async fn test_login_types_credentials() {
        let ctx = ScriptedContext::new().page("/login", ScriptedPage::new("LinkedIn Login"));
        let log = ctx.log();
        let mut a = agent(ctx);
        a.login("me@example.com", "hunter2").await.unwrap();
        assert_eq!(log.typed_into(site::LOGIN_USERNAME), "me@example.com");
        assert_eq!(log.typed_into(site::LOGIN_PASSWORD), "hunter2");
        assert_eq!(log.clicks(), vec![site::LOGIN_SUBMIT.to_string()]);
    }

    #[tokio::test]
    async fn test_navigation_error_is_classified() {
        let mut a = agent(ScriptedContext::new().fail_on("/jobs/view/9"));
        let err = a.open_listing("9").await.unwrap_err();
        assert_eq!(crate::error::error_kind(&err), "navigation");
    }
}
