//! In-memory scripted rendering engine.
//!
//! Serves canned pages keyed by URL fragment. Useful for exercising the
//! agent and collector without a browser.

use super::{BrowserCookie, ElementSnapshot, Locator, NavigationResult, RenderContext};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A canned page.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub title: String,
    pub body: String,
    pub html: String,
    /// Elements keyed by `Locator` display form.
    pub elements: HashMap<String, Vec<ElementSnapshot>>,
    /// URL reported after navigation, for simulated redirects.
    pub final_url: Option<String>,
}

impl ScriptedPage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn body(mut self, text: &str) -> Self {
        self.body = text.to_string();
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn elements(mut self, locator: &Locator, elements: Vec<ElementSnapshot>) -> Self {
        self.elements.insert(locator.to_string(), elements);
        self
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }
}

/// Shared record of what the engine was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    inner: Arc<Mutex<ScriptLogInner>>,
}

#[derive(Debug, Default)]
struct ScriptLogInner {
    navigations: Vec<String>,
    typed: Vec<(String, String)>,
    clicks: Vec<String>,
}

impl ScriptLog {
    /// URLs navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|g| g.navigations.clone())
            .unwrap_or_default()
    }

    /// Number of navigations whose URL contains `fragment`.
    pub fn count_matching(&self, fragment: &str) -> usize {
        self.navigations()
            .iter()
            .filter(|u| u.contains(fragment))
            .count()
    }

    /// Concatenated text typed into each selector.
    pub fn typed_into(&self, css: &str) -> String {
        self.inner
            .lock()
            .map(|g| {
                g.typed
                    .iter()
                    .filter(|(sel, _)| sel == css)
                    .map(|(_, t)| t.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|g| g.clicks.clone())
            .unwrap_or_default()
    }
}

/// A rendering context that serves [`ScriptedPage`]s.
///
/// On navigation the page whose key is the longest substring of the
/// requested URL is shown; unknown URLs render an empty page.
pub struct ScriptedContext {
    pages: Vec<(String, ScriptedPage)>,
    failing: Vec<String>,
    current_url: String,
    current: ScriptedPage,
    cookies: Vec<BrowserCookie>,
    user_agent: String,
    log: ScriptLog,
}

impl Default for ScriptedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedContext {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            failing: Vec::new(),
            current_url: "about:blank".to_string(),
            current: ScriptedPage::default(),
            cookies: Vec::new(),
            user_agent: "Mozilla/5.0 (scripted)".to_string(),
            log: ScriptLog::default(),
        }
    }

    /// Serve `page` for URLs containing `fragment`.
    pub fn page(mut self, fragment: &str, page: ScriptedPage) -> Self {
        self.pages.push((fragment.to_string(), page));
        self
    }

    /// Fail navigation to URLs containing `fragment`.
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: ".linkedin.com".to_string(),
            path: "/".to_string(),
        });
        self
    }

    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    fn resolve(&self, url: &str) -> ScriptedPage {
        self.pages
            .iter()
            .filter(|(fragment, _)| url.contains(fragment.as_str()))
            .max_by_key(|(fragment, _)| fragment.len())
            .map(|(_, page)| page.clone())
            .unwrap_or_default()
    }

    fn record<F: FnOnce(&mut ScriptLogInner)>(&self, f: F) {
        if let Ok(mut inner) = self.log.inner.lock() {
            f(&mut inner);
        }
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        self.record(|l| l.navigations.push(url.to_string()));
        if self.failing.iter().any(|f| url.contains(f.as_str())) {
            bail!("navigation failed: scripted failure for {url}");
        }
        self.current = self.resolve(url);
        self.current_url = self
            .current
            .final_url
            .clone()
            .unwrap_or_else(|| url.to_string());
        Ok(NavigationResult {
            final_url: self.current_url.clone(),
            load_time_ms: 0,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        if script.contains("navigator.userAgent") {
            return Ok(serde_json::Value::String(self.user_agent.clone()));
        }
        Ok(serde_json::Value::Null)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementSnapshot>> {
        Ok(self
            .current
            .elements
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn type_text(&self, css: &str, text: &str) -> Result<()> {
        self.record(|l| l.typed.push((css.to_string(), text.to_string())));
        Ok(())
    }

    async fn click(&self, css: &str) -> Result<()> {
        self.record(|l| l.clicks.push(css.to_string()));
        Ok(())
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.current.html.clone())
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.current.body.clone())
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.current_url.clone())
    }

    async fn get_title(&self) -> Result<String> {
        Ok(self.current.title.clone())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
