//! `job-harvest run`: a full harvest with a real browser.

use crate::agent::PageAgent;
use crate::collector::{Collector, RunSummary};
use crate::config::HarvestConfig;
use crate::fallback::FallbackClient;
use crate::journal::RunJournal;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{LaunchOptions, Renderer};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load the config, launch Chromium and harvest every combination.
pub async fn run(config_path: &Path, output: Option<PathBuf>, headful: bool) -> Result<()> {
    let mut config = HarvestConfig::load(config_path)?;
    if let Some(output) = output {
        config.output = output;
    }
    if headful {
        config.browser.headless = false;
    }

    let store = RecordStore::open(&config.output)?;
    info!(
        "store {} has {} rows, {} enriched companies",
        store.path().display(),
        store.len(),
        store.known_companies()
    );

    let renderer = ChromiumRenderer::launch(&LaunchOptions {
        headless: config.browser.headless,
        chromium_path: config.browser.chromium_path.clone(),
    })
    .await?;
    let ctx = renderer
        .new_context()
        .await
        .context("failed to open a browser tab")?;

    let mut agent = PageAgent::new(ctx, &config.fallback.base_url, config.timing.clone());
    match config.credentials() {
        Some((username, password)) => {
            if let Err(e) = agent.login(username, password).await {
                warn!("login failed, continuing as guest: {e:#}");
            }
        }
        None => info!("no credentials configured, browsing as guest"),
    }

    let fallback = FallbackClient::new(
        &config.fallback.base_url,
        config.fallback_timeout(),
        config.fallback.cookie_refresh_every,
    );
    let journal_path = config.journal.clone();
    let mut collector = Collector::new(agent, fallback, store, config);
    if let Some(path) = journal_path {
        match RunJournal::open(&path) {
            Ok(journal) => collector = collector.with_journal(journal),
            Err(e) => warn!("run journal disabled: {e:#}"),
        }
    }

    let summary = collector.run().await;
    let store = collector.finish().await;
    if let Err(e) = renderer.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }

    print_summary(&summary, &store);
    Ok(())
}

fn print_summary(summary: &RunSummary, store: &RecordStore) {
    for o in &summary.outcomes {
        println!(
            "  {} @ {}: {} saved, {} failed, {} pages, stopped by {}",
            o.position, o.location, o.appended, o.failed, o.pages, o.stop_reason
        );
    }
    println!(
        "  {} listings saved this run; {} rows in {}",
        summary.appended(),
        store.len(),
        store.path().display()
    );
}
