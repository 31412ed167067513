// Copyright 2026 Job Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Job Harvest, a resumable job-listing harvester.
//!
//! Walks search result pages in a real browser, extracts listing fields
//! with selector fallback chains, backfills descriptions and posting
//! times over HTTP, and appends deduplicated rows to a CSV store.

pub mod agent;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod fallback;
pub mod journal;
pub mod policy;
pub mod record;
pub mod renderer;
pub mod site;
pub mod store;

pub use agent::PageAgent;
pub use collector::{CombinationOutcome, Collector, RunSummary, StopReason};
pub use config::HarvestConfig;
pub use error::HarvestError;
pub use fallback::FallbackClient;
pub use record::{CompanyProfile, JobRecord, UNAVAILABLE};
pub use store::{RecordStore, StoreStats};
