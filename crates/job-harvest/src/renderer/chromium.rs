//! Chromium-based renderer using chromiumoxide.

use super::{
    BrowserCookie, ElementSnapshot, LaunchOptions, Locator, NavigationResult, RenderContext,
    Renderer,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

const HIDE_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

/// Snapshots matched elements as `{text, attributes, sibling_text}`.
/// `__KIND__` and `__SELECTOR__` are substituted with JSON string literals.
const FIND_ALL_JS: &str = r#"(() => {
  const kind = __KIND__;
  const sel = __SELECTOR__;
  let nodes = [];
  if (kind === 'xpath') {
    const r = document.evaluate(sel, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < r.snapshotLength; i++) nodes.push(r.snapshotItem(i));
  } else if (kind === 'class') {
    nodes = Array.from(document.getElementsByClassName(sel));
  } else {
    nodes = Array.from(document.querySelectorAll(sel));
  }
  return nodes.filter(n => n && n.nodeType === 1).map(n => {
    const attributes = {};
    for (const name of n.getAttributeNames()) attributes[name] = n.getAttribute(name) || '';
    if (typeof n.href === 'string' && n.href) attributes.href = n.href;
    const sib = n.nextElementSibling;
    return {
      text: (n.innerText || n.textContent || '').trim(),
      attributes,
      sibling_text: sib ? (sib.innerText || sib.textContent || '').trim() : null,
    };
  });
})()"#;

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&str>) -> Option<PathBuf> {
    // 1. Configured path
    if let Some(p) = explicit {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. JOB_HARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("JOB_HARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.job-harvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".job-harvest/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".job-harvest/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".job-harvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".job-harvest/chromium/chrome-linux64/chrome"),
                home.join(".job-harvest/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance with automation markers suppressed.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let chrome_path = find_chromium(options.chromium_path.as_deref())
            .context("Chromium not found. Set JOB_HARVEST_CHROMIUM_PATH or [browser] chromium_path.")?;

        // Vary the window size between runs.
        let (width, height) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(1300..=1600), rng.gen_range(700..=900))
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg("--ignore-certificate-errors")
            .arg("--no-sandbox")
            .arg("--disable-extensions")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--lang=en-US,en;q=0.9");
        if options.headless {
            builder = builder.arg("--headless=new").arg("--disable-gpu");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let _ = page.evaluate(HIDE_WEBDRIVER_JS).await;

        Ok(Box::new(ChromiumContext { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumRenderer is dropped
        Ok(())
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
}

impl ChromiumContext {
    async fn evaluate_string(&self, script: &str) -> Result<String> {
        let value = self.execute_js(script).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_response)) => {
                let _ = self.page.wait_for_navigation().await;
                let _ = self.page.evaluate(HIDE_WEBDRIVER_JS).await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        // Statements such as scrollTo evaluate to undefined.
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementSnapshot>> {
        let script = FIND_ALL_JS
            .replace("__KIND__", &serde_json::to_string(locator.kind())?)
            .replace("__SELECTOR__", &serde_json::to_string(locator.selector())?);
        let value = self.execute_js(&script).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value)
            .with_context(|| format!("unexpected element snapshot for {locator}"))
    }

    async fn type_text(&self, css: &str, text: &str) -> Result<()> {
        self.page
            .find_element(css)
            .await
            .with_context(|| format!("element not found: {css}"))?
            .click()
            .await?
            .type_str(text)
            .await?;
        Ok(())
    }

    async fn click(&self, css: &str) -> Result<()> {
        self.page
            .find_element(css)
            .await
            .with_context(|| format!("element not found: {css}"))?
            .click()
            .await?;
        Ok(())
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn body_text(&self) -> Result<String> {
        self.evaluate_string("document.body ? document.body.innerText : ''")
            .await
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn get_title(&self) -> Result<String> {
        Ok(self
            .page
            .get_title()
            .await
            .context("failed to get title")?
            .unwrap_or_default())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read browser cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_all_script_substitution() {
        let locator = Locator::xpath("//a[contains(@href,'/company/')]");
        let script = FIND_ALL_JS
            .replace("__KIND__", &serde_json::to_string(locator.kind()).unwrap())
            .replace("__SELECTOR__", &serde_json::to_string(locator.selector()).unwrap());
        assert!(script.contains(r#"const kind = "xpath";"#));
        assert!(script.contains(r#""//a[contains(@href,'/company/')]""#));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_find_all() {
        let renderer = ChromiumRenderer::launch(&LaunchOptions {
            headless: true,
            chromium_path: None,
        })
        .await
        .expect("failed to launch renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<dl><dt>Company size</dt><dd>11-50 employees</dd></dl><a href='/x'>go</a>",
            10000,
        )
        .await
        .expect("navigation failed");

        let dts = ctx.find_all(&Locator::css("dt")).await.expect("find_all failed");
        assert_eq!(dts.len(), 1);
        assert_eq!(dts[0].sibling_text.as_deref(), Some("11-50 employees"));

        let body = ctx.body_text().await.expect("body_text failed");
        assert!(body.contains("Company size"));

        ctx.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }
}
