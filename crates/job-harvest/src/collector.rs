//! Collection orchestrator.
//!
//! Walks every (position, location) combination in random order. Each
//! combination pages through search results until a stop policy fires
//! or its time budget runs out. Listings are processed one at a time on
//! the agent's single browser session, and every failure below the
//! combination loop is logged and skipped.

use crate::agent::fields::ListingFields;
use crate::agent::PageAgent;
use crate::config::HarvestConfig;
use crate::error::{error_kind, HarvestError};
use crate::fallback::FallbackClient;
use crate::journal::{JournalEvent, RunJournal};
use crate::policy::{EmptyPageStreak, StaleStreak, TimeBudget};
use crate::record::{now_timestamp, CompanyProfile, JobRecord};
use crate::store::RecordStore;
use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a combination stopped paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyPages,
    StalePostings,
    TimeBudget,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPages => "empty_pages",
            Self::StalePostings => "stale_postings",
            Self::TimeBudget => "time_budget",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one search combination.
#[derive(Debug, Clone)]
pub struct CombinationOutcome {
    pub position: String,
    pub location: String,
    /// Result pages scanned.
    pub pages: usize,
    /// Records appended to the store.
    pub appended: usize,
    /// Listings that failed and were skipped.
    pub failed: usize,
    pub stop_reason: StopReason,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<CombinationOutcome>,
}

impl RunSummary {
    pub fn appended(&self) -> usize {
        self.outcomes.iter().map(|o| o.appended).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failed).sum()
    }
}

/// First blacklisted word contained in `title`, case-insensitively.
pub fn blacklisted_title<'a>(title: &str, words: &'a [String]) -> Option<&'a str> {
    let title = title.trim().to_lowercase();
    if title.is_empty() {
        return None;
    }
    words
        .iter()
        .map(|w| w.trim())
        .find(|w| !w.is_empty() && title.contains(&w.to_lowercase()))
}

enum ListingOutcome {
    Saved(JobRecord),
    Skipped,
}

/// Owns the agent, the fallback client and the store for one run.
pub struct Collector {
    agent: PageAgent,
    fallback: FallbackClient,
    store: RecordStore,
    config: HarvestConfig,
    journal: Option<RunJournal>,
    rng: StdRng,
    run_at: String,
}

impl Collector {
    pub fn new(
        agent: PageAgent,
        fallback: FallbackClient,
        store: RecordStore,
        config: HarvestConfig,
    ) -> Self {
        Self {
            agent,
            fallback,
            store,
            config,
            journal: None,
            rng: StdRng::from_entropy(),
            run_at: now_timestamp(),
        }
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Fix the shuffle and delay randomness.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn agent_mut(&mut self) -> &mut PageAgent {
        &mut self.agent
    }

    /// Give back the store and close the browser context.
    pub async fn finish(self) -> RecordStore {
        if let Err(e) = self.agent.close().await {
            warn!("failed to close rendering context: {e:#}");
        }
        self.store
    }

    /// Process every configured combination once, in random order.
    pub async fn run(&mut self) -> RunSummary {
        let mut combos: Vec<(String, String)> = self
            .config
            .positions
            .iter()
            .flat_map(|p| {
                self.config
                    .locations
                    .iter()
                    .map(move |l| (p.clone(), l.clone()))
            })
            .collect();
        combos.shuffle(&mut self.rng);
        info!("{} combinations to process in random order", combos.len());
        self.journal(JournalEvent::new("run_started").count(combos.len()));

        let mut summary = RunSummary::default();
        for (position, location) in combos {
            let outcome = self.collect_combination(&position, &location).await;
            summary.outcomes.push(outcome);
        }

        info!(
            "run finished: {} listings saved, {} failed, store has {} rows",
            summary.appended(),
            summary.failed(),
            self.store.len()
        );
        self.journal(
            JournalEvent::new("run_finished")
                .count(summary.appended())
                .detail(format!("failed={}", summary.failed())),
        );
        summary
    }

    /// Page through one combination until a stop policy fires.
    pub async fn collect_combination(&mut self, position: &str, location: &str) -> CombinationOutcome {
        info!("searching listings for {position} @ {location}");
        self.journal(JournalEvent::new("combination_started").combination(position, location));

        let budget = TimeBudget::start(self.config.max_duration());
        let mut empty_pages = EmptyPageStreak::new(
            self.config.stop_empty_pages.enabled,
            self.config.stop_empty_pages.consecutive_limit,
        );
        let mut stale = StaleStreak::new(
            self.config.stop_stale.enabled,
            self.config.stop_stale.consecutive_limit,
            self.config.stale_threshold_days(),
        );

        let mut outcome = CombinationOutcome {
            position: position.to_string(),
            location: location.to_string(),
            pages: 0,
            appended: 0,
            failed: 0,
            stop_reason: StopReason::TimeBudget,
        };
        let mut offset = 0;

        'pages: loop {
            if budget.exhausted() {
                info!("time budget of {position} @ {location} exhausted");
                outcome.stop_reason = StopReason::TimeBudget;
                break;
            }
            let remaining = self.config.max_duration().saturating_sub(budget.elapsed());
            debug!("{} minutes left in this search", remaining.as_secs() / 60);

            outcome.pages += 1;
            let ids = match self.scan_page(position, location, offset).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("result page start={offset} failed ({}): {e:#}", error_kind(&e));
                    Vec::new()
                }
            };

            if empty_pages.observe(ids.len()) {
                info!(
                    "stopping {position} @ {location}: {} consecutive pages without new listings",
                    empty_pages.streak()
                );
                outcome.stop_reason = StopReason::EmptyPages;
                break;
            }
            if ids.is_empty() {
                info!(
                    "empty page streak {}/{} at start={offset}",
                    empty_pages.streak(),
                    empty_pages.limit()
                );
            }

            for id in &ids {
                match self.process_listing(id, position, location).await {
                    Ok(ListingOutcome::Saved(record)) => {
                        outcome.appended += 1;
                        self.journal(
                            JournalEvent::new("listing_saved")
                                .combination(position, location)
                                .job(id),
                        );
                        self.listing_delay().await;

                        let posted = record.posted_at_time();
                        if posted.is_none() {
                            warn!("posting time unknown for listing {id}");
                        }
                        if stale.observe(posted, Utc::now().naive_utc()) {
                            info!(
                                "stopping {position} @ {location}: {} consecutive listings older than {} days",
                                stale.streak(),
                                stale.threshold_days()
                            );
                            outcome.stop_reason = StopReason::StalePostings;
                            break 'pages;
                        }
                    }
                    Ok(ListingOutcome::Skipped) => {}
                    Err(e) => {
                        outcome.failed += 1;
                        let kind = error_kind(&e);
                        warn!("failed to collect listing {id} ({kind}): {e:#}");
                        self.journal(
                            JournalEvent::new("listing_failed")
                                .combination(position, location)
                                .job(id)
                                .detail(kind),
                        );
                    }
                }
            }

            offset += self.config.search.page_size;
        }

        info!(
            "{position} @ {location} stopped ({}) after {} pages, {} saved",
            outcome.stop_reason, outcome.pages, outcome.appended
        );
        self.journal(
            JournalEvent::new("combination_finished")
                .combination(position, location)
                .count(outcome.appended)
                .detail(outcome.stop_reason.as_str()),
        );
        outcome
    }

    /// Load one result page and return its new listing ids.
    async fn scan_page(&mut self, position: &str, location: &str, offset: usize) -> Result<Vec<String>> {
        let filters = self.config.filters();
        self.agent
            .open_search_page(position, location, offset, &filters)
            .await?;
        if self.agent.is_search_blocked().await {
            return Err(HarvestError::Blocked {
                url: self.agent.current_url().await,
            }
            .into());
        }
        self.agent.render_results().await;

        let store = &self.store;
        Ok(self
            .agent
            .collect_listing_ids(&self.config.blacklist, |id| store.contains(id))
            .await)
    }

    async fn process_listing(&mut self, id: &str, position: &str, location: &str) -> Result<ListingOutcome> {
        if self.store.contains(id) {
            debug!("listing {id} stored meanwhile, skipping");
            return Ok(ListingOutcome::Skipped);
        }

        let job_url = self.agent.open_listing(id).await?;
        let blocked = self.agent.is_blocked().await;
        let fields = if blocked {
            warn!("blocked on listing {id} at {}", self.agent.current_url().await);
            ListingFields::default()
        } else {
            self.agent.extract_fields().await
        };

        if let Some(word) = blacklisted_title(&fields.title, &self.config.blacklist_titles) {
            info!("skipped listing {id}: title {:?} contains {word:?}", fields.title);
            self.journal(
                JournalEvent::new("listing_skipped")
                    .combination(position, location)
                    .job(id)
                    .detail(format!("title blacklist: {word}")),
            );
            return Ok(ListingOutcome::Skipped);
        }

        let (description, posted_at) = self
            .fallback
            .fetch_for_listing(self.agent.context(), id)
            .await;

        let profile = if blocked || !self.config.enrichment.enabled {
            CompanyProfile::unavailable()
        } else if self.store.company_already_enriched(&fields.company) {
            debug!("company {:?} already enriched, skipping profile fetch", fields.company);
            CompanyProfile::unavailable()
        } else {
            self.agent.fetch_company_profile().await
        };

        let record = JobRecord {
            run_at: self.run_at.clone(),
            posted_at,
            timestamp: now_timestamp(),
            job_id: id.to_string(),
            title: fields.title,
            company: fields.company,
            location: fields.location,
            workplace_type: fields.workplace_type,
            seniority: fields.seniority,
            employment_type: fields.employment_type,
            quick_apply: fields.quick_apply,
            description,
            job_url,
            search_position: position.to_string(),
            search_location: location.to_string(),
            profile,
        };

        if self.store.append(&record)? {
            Ok(ListingOutcome::Saved(record))
        } else {
            Ok(ListingOutcome::Skipped)
        }
    }

    async fn listing_delay(&mut self) {
        let t = &self.config.timing;
        let (min, max) = (t.listing_delay_min_ms, t.listing_delay_max_ms);
        if max == 0 {
            return;
        }
        let ms = if max > min { self.rng.gen_range(min..=max) } else { max };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn journal(&mut self, event: JournalEvent) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.log(&event) {
                warn!("failed to write run journal: {e:#}");
            }
        }
    }
}
