//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (Chromium via chromiumoxide in production, a
//! scripted in-memory engine in tests). Element queries return plain
//! snapshots so that extraction logic stays independent of the engine.

pub mod chromium;
pub mod scripted;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// How to find elements on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    ClassName(String),
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn class_name(name: &str) -> Self {
        Self::ClassName(name.to_string())
    }

    pub fn css(selector: &str) -> Self {
        Self::Css(selector.to_string())
    }

    pub fn xpath(expr: &str) -> Self {
        Self::XPath(expr.to_string())
    }

    /// Engine-side kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassName(_) => "class",
            Self::Css(_) => "css",
            Self::XPath(_) => "xpath",
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Self::ClassName(s) | Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.selector())
    }
}

/// Rendered state of one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Visible text, trimmed.
    #[serde(default)]
    pub text: String,
    /// Attribute values. `href` holds the resolved absolute link.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Visible text of the next element sibling, if any.
    #[serde(default)]
    pub sibling_text: Option<String>,
}

impl ElementSnapshot {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn sibling(mut self, text: &str) -> Self {
        self.sibling_text = Some(text.to_string());
        self
    }

    /// Attribute value, trimmed; `None` when absent or blank.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A cookie exported from the browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Options for launching a browser.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    pub chromium_path: Option<String>,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Snapshot every element matching the locator, in document order.
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementSnapshot>>;
    /// Type text into the first element matching a CSS selector.
    async fn type_text(&self, css: &str, text: &str) -> Result<()>;
    /// Click the first element matching a CSS selector.
    async fn click(&self, css: &str) -> Result<()>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Visible text of the document body.
    async fn body_text(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Get the document title.
    async fn get_title(&self) -> Result<String>;
    /// Export the session cookies.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}
