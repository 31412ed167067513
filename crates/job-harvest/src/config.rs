//! Configuration loading and validation.
//!
//! A TOML file where every section is optional. Credentials may come
//! from the environment instead of the file.

use crate::error::HarvestError;
use crate::site::{SearchFilters, DEFAULT_BASE_URL};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

const USERNAME_ENV: &str = "JOB_HARVEST_USERNAME";
const PASSWORD_ENV: &str = "JOB_HARVEST_PASSWORD";

/// Top-level harvest configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub positions: Vec<String>,
    pub locations: Vec<String>,
    pub output: PathBuf,
    pub experience_levels: Vec<u32>,
    pub date_posted_days: u32,
    /// Card-text blacklist, matched case-insensitively.
    pub blacklist: Vec<String>,
    /// Title blacklist, matched case-insensitively against extracted titles.
    pub blacklist_titles: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub journal: Option<PathBuf>,
    pub search: SearchConfig,
    pub stop_stale: StopStaleConfig,
    pub stop_empty_pages: StopEmptyPagesConfig,
    pub enrichment: EnrichmentConfig,
    pub fallback: FallbackConfig,
    pub timing: TimingConfig,
    pub browser: BrowserConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            locations: Vec::new(),
            output: PathBuf::from("output.csv"),
            experience_levels: Vec::new(),
            date_posted_days: 7,
            blacklist: Vec::new(),
            blacklist_titles: Vec::new(),
            username: None,
            password: None,
            journal: None,
            search: SearchConfig::default(),
            stop_stale: StopStaleConfig::default(),
            stop_empty_pages: StopEmptyPagesConfig::default(),
            enrichment: EnrichmentConfig::default(),
            fallback: FallbackConfig::default(),
            timing: TimingConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub quick_apply_only: bool,
    pub page_size: usize,
    /// Wall-clock budget per search combination.
    pub max_duration_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            quick_apply_only: true,
            page_size: 25,
            max_duration_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StopStaleConfig {
    pub enabled: bool,
    pub consecutive_limit: u32,
    /// 0 means "use `date_posted_days`".
    pub days_threshold: u32,
}

impl Default for StopStaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consecutive_limit: 10,
            days_threshold: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StopEmptyPagesConfig {
    pub enabled: bool,
    pub consecutive_limit: u32,
}

impl Default for StopEmptyPagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consecutive_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub base_url: String,
    pub cookie_refresh_every: usize,
    pub timeout_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cookie_refresh_every: 20,
            timeout_secs: 25,
        }
    }
}

/// Every wait the agent and collector perform, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub navigation_timeout_ms: u64,
    pub scroll_step_px: u32,
    pub scroll_limit_px: u32,
    /// Per-step delay of the first scroll after loading a result page.
    pub scroll_delay_ms: u64,
    /// Per-step delay of the re-render scroll.
    pub rescroll_delay_ms: u64,
    pub listing_delay_min_ms: u64,
    pub listing_delay_max_ms: u64,
    pub detail_settle_min_ms: u64,
    pub detail_settle_max_ms: u64,
    pub about_settle_min_ms: u64,
    pub about_settle_max_ms: u64,
    pub readiness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub login_settle_ms: u64,
    pub keystroke_min_ms: u64,
    pub keystroke_max_ms: u64,
    pub form_pause_min_ms: u64,
    pub form_pause_max_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            scroll_step_px: 500,
            scroll_limit_px: 2000,
            scroll_delay_ms: 1000,
            rescroll_delay_ms: 500,
            listing_delay_min_ms: 10_000,
            listing_delay_max_ms: 40_000,
            detail_settle_min_ms: 300,
            detail_settle_max_ms: 1200,
            about_settle_min_ms: 5000,
            about_settle_max_ms: 15_000,
            readiness_timeout_ms: 10_000,
            poll_interval_ms: 300,
            login_settle_ms: 30_000,
            keystroke_min_ms: 50,
            keystroke_max_ms: 200,
            form_pause_min_ms: 500,
            form_pause_max_ms: 2000,
        }
    }
}

impl TimingConfig {
    /// No waits at all. For scripted engines.
    pub fn immediate() -> Self {
        Self {
            navigation_timeout_ms: 1000,
            scroll_step_px: 500,
            scroll_limit_px: 2000,
            scroll_delay_ms: 0,
            rescroll_delay_ms: 0,
            listing_delay_min_ms: 0,
            listing_delay_max_ms: 0,
            detail_settle_min_ms: 0,
            detail_settle_max_ms: 0,
            about_settle_min_ms: 0,
            about_settle_max_ms: 0,
            readiness_timeout_ms: 0,
            poll_interval_ms: 1,
            login_settle_ms: 0,
            keystroke_min_ms: 0,
            keystroke_max_ms: 0,
            form_pause_min_ms: 0,
            form_pause_max_ms: 0,
        }
    }

    fn ranges(&self) -> [(&'static str, u64, u64); 5] {
        [
            ("listing_delay", self.listing_delay_min_ms, self.listing_delay_max_ms),
            ("detail_settle", self.detail_settle_min_ms, self.detail_settle_max_ms),
            ("about_settle", self.about_settle_min_ms, self.about_settle_max_ms),
            ("keystroke", self.keystroke_min_ms, self.keystroke_max_ms),
            ("form_pause", self.form_pause_min_ms, self.form_pause_max_ms),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub chromium_path: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
        }
    }
}

impl HarvestConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("failed to load config: {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML and drop blank search terms. Does not validate.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| HarvestError::Config(e.to_string()))?;
        config.positions = non_blank(config.positions);
        config.locations = non_blank(config.locations);
        config.blacklist = non_blank(config.blacklist);
        config.blacklist_titles = non_blank(config.blacklist_titles);
        Ok(config)
    }

    /// Environment credentials take precedence over file values.
    pub fn apply_env(&mut self) {
        if let Ok(user) = std::env::var(USERNAME_ENV) {
            if !user.trim().is_empty() {
                self.username = Some(user);
            }
        }
        if let Ok(pass) = std::env::var(PASSWORD_ENV) {
            if !pass.is_empty() {
                self.password = Some(pass);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(HarvestError::Config(msg).into()) };
        if self.positions.is_empty() {
            return fail("at least one position is required".into());
        }
        if self.locations.is_empty() {
            return fail("at least one location is required".into());
        }
        if self.search.page_size == 0 {
            return fail("search.page_size must be positive".into());
        }
        if self.fallback.cookie_refresh_every == 0 {
            return fail("fallback.cookie_refresh_every must be positive".into());
        }
        for (name, min, max) in self.timing.ranges() {
            if min > max {
                return fail(format!("timing.{name} range is inverted ({min} > {max})"));
            }
        }
        Ok(())
    }

    /// Both credentials, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.trim().is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            experience_levels: self.experience_levels.clone(),
            date_posted_days: self.date_posted_days,
            quick_apply_only: self.search.quick_apply_only,
        }
    }

    /// Stale threshold in days, falling back to the search window.
    pub fn stale_threshold_days(&self) -> u32 {
        if self.stop_stale.days_threshold > 0 {
            self.stop_stale.days_threshold
        } else {
            self.date_posted_days
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.search.max_duration_secs)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback.timeout_secs)
    }
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = HarvestConfig::from_toml(
            r#"
            positions = ["Rust Engineer", "  "]
            locations = ["Berlin"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.positions, vec!["Rust Engineer".to_string()]);
        assert_eq!(config.output, PathBuf::from("output.csv"));
        assert_eq!(config.date_posted_days, 7);
        assert!(config.search.quick_apply_only);
        assert_eq!(config.search.page_size, 25);
        assert_eq!(config.max_duration(), Duration::from_secs(7200));
        assert!(!config.stop_stale.enabled);
        assert_eq!(config.stop_stale.consecutive_limit, 10);
        assert!(config.stop_empty_pages.enabled);
        assert_eq!(config.stop_empty_pages.consecutive_limit, 3);
        assert!(config.enrichment.enabled);
        assert_eq!(config.fallback.cookie_refresh_every, 20);
        assert_eq!(config.timing.listing_delay_min_ms, 10_000);
        assert_eq!(config.timing.listing_delay_max_ms, 40_000);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_full_config() {
        let config = HarvestConfig::from_toml(
            r#"
            positions = ["Data Engineer"]
            locations = ["Remote"]
            output = "jobs.csv"
            experience_levels = [2, 3]
            date_posted_days = 14
            blacklist = ["ShadyCorp"]
            blacklist_titles = ["intern"]
            journal = "run.jsonl"

            [search]
            quick_apply_only = false
            page_size = 10

            [stop_stale]
            enabled = true
            consecutive_limit = 5
            days_threshold = 30

            [enrichment]
            enabled = false

            [timing]
            listing_delay_min_ms = 100
            listing_delay_max_ms = 200
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.output, PathBuf::from("jobs.csv"));
        assert_eq!(config.filters().experience_levels, vec![2, 3]);
        assert!(!config.filters().quick_apply_only);
        assert_eq!(config.stale_threshold_days(), 30);
        assert!(!config.enrichment.enabled);
        assert_eq!(config.journal, Some(PathBuf::from("run.jsonl")));
        assert_eq!(config.timing.scroll_limit_px, 2000);
    }

    #[test]
    fn test_stale_threshold_falls_back_to_window() {
        let config = HarvestConfig::from_toml("date_posted_days = 3").unwrap();
        assert_eq!(config.stale_threshold_days(), 3);
    }

    #[test]
    fn test_validation_errors_are_config_errors() {
        let empty = HarvestConfig::from_toml("locations = [\"Berlin\"]").unwrap();
        assert_eq!(error_kind(&empty.validate().unwrap_err()), "config");

        let inverted = HarvestConfig::from_toml(
            r#"
            positions = ["a"]
            locations = ["b"]
            [timing]
            about_settle_min_ms = 10
            about_settle_max_ms = 5
            "#,
        )
        .unwrap();
        let err = inverted.validate().unwrap_err();
        assert!(err.to_string().contains("about_settle"));

        let bad = HarvestConfig::from_toml("positions = 3").unwrap_err();
        assert_eq!(error_kind(&bad), "config");
    }

    #[test]
    fn test_credentials_require_both() {
        let mut config = HarvestConfig::default();
        assert!(config.credentials().is_none());
        config.username = Some("me".into());
        assert!(config.credentials().is_none());
        config.password = Some("pw".into());
        assert_eq!(config.credentials(), Some(("me", "pw")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "positions = [\"a\"]\nlocations = [\"b\"]\n").unwrap();
        let config = HarvestConfig::load(&path).unwrap();
        assert_eq!(config.locations, vec!["b".to_string()]);
        assert!(HarvestConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
