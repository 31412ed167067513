//! Append-only CSV record store with an in-memory dedupe index.
//!
//! ## Schema migration
//!
//! On `open`, a store whose header differs from [`CANONICAL_COLUMNS`] is
//! rewritten once into canonical order. Missing columns are filled with
//! [`UNAVAILABLE`]; existing rows are kept. A file without an identifier
//! column is read positionally using the legacy column names. Running
//! `open` on an already canonical file never rewrites it.
//!
//! ## Failure policy
//!
//! A file that cannot be read or parsed is left untouched and the store
//! starts with empty indices. Appends always use the canonical layout.

use crate::error::HarvestError;
use crate::record::{
    JobRecord, CANONICAL_COLUMNS, COMPANY_COLUMN, ENRICHMENT_COLUMNS, ID_COLUMN, UNAVAILABLE,
};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Positional names for headerless files written by early collectors.
/// The third column held the listing title.
const LEGACY_COLUMNS: [&str; 6] = ["timestamp", ID_COLUMN, "title", COMPANY_COLUMN, "attempted", "result"];

/// A fully loaded store file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn is_canonical(&self) -> bool {
        self.columns.len() == CANONICAL_COLUMNS.len()
            && self.columns.iter().zip(CANONICAL_COLUMNS).all(|(a, b)| a == b)
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Reorder into canonical columns, filling gaps with the sentinel.
    fn into_canonical(self) -> Table {
        let mapping: Vec<Option<usize>> = CANONICAL_COLUMNS
            .iter()
            .map(|name| self.column(name))
            .collect();

        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|idx| match idx {
                        Some(i) => row.get(*i).cloned().unwrap_or_default(),
                        None => UNAVAILABLE.to_string(),
                    })
                    .collect()
            })
            .collect();

        Table {
            columns: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

/// Statistics read from a store file without touching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub rows: usize,
    pub listings: usize,
    pub companies: usize,
    /// Whether the header already matches [`CANONICAL_COLUMNS`].
    pub canonical: bool,
}

/// Append-only listing store. Single writer.
pub struct RecordStore {
    path: PathBuf,
    ids: HashSet<String>,
    enriched_companies: HashSet<String>,
    rows: usize,
    degraded: bool,
}

impl RecordStore {
    /// Open or create the store, migrating its schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path,
            ids: HashSet::new(),
            enriched_companies: HashSet::new(),
            rows: 0,
            degraded: false,
        };

        let is_empty = fs::metadata(&store.path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            store.create()?;
            return Ok(store);
        }

        let table = match read_table(&store.path) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    "could not read store {}, starting with an empty dedupe index: {e:#}",
                    store.path.display()
                );
                store.degraded = true;
                return Ok(store);
            }
        };

        let table = if table.is_canonical() {
            ensure_trailing_newline(&store.path)?;
            table
        } else {
            let missing: Vec<&str> = CANONICAL_COLUMNS
                .iter()
                .copied()
                .filter(|c| table.column(c).is_none())
                .collect();
            let migrated = table.into_canonical();
            write_table(&store.path, &migrated)
                .with_context(|| format!("failed to migrate store: {}", store.path.display()))?;
            info!(
                "migrated store schema of {}, added columns: {missing:?}",
                store.path.display()
            );
            migrated
        };

        store.index_rows(&table);
        info!(
            "{} listing ids loaded from {} for dedupe ({} companies already profiled)",
            store.ids.len(),
            store.path.display(),
            store.enriched_companies.len()
        );
        Ok(store)
    }

    /// Read statistics without creating, migrating or repairing the file.
    pub fn inspect(path: impl AsRef<Path>) -> Result<StoreStats> {
        let path = path.as_ref();
        let table = read_table(path)?;
        let mut store = Self {
            path: path.to_path_buf(),
            ids: HashSet::new(),
            enriched_companies: HashSet::new(),
            rows: 0,
            degraded: false,
        };
        store.index_rows(&table);
        Ok(StoreStats {
            rows: store.rows,
            listings: store.ids.len(),
            companies: store.enriched_companies.len(),
            canonical: table.is_canonical(),
        })
    }

    fn create(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let table = Table {
            columns: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        };
        write_table(&self.path, &table)
            .with_context(|| format!("failed to create store: {}", self.path.display()))?;
        info!("created store with header: {}", self.path.display());
        Ok(())
    }

    fn index_rows(&mut self, table: &Table) {
        let id_idx = table.column(ID_COLUMN);
        let company_idx = table.column(COMPANY_COLUMN);
        let enrichment_idx: Vec<usize> = ENRICHMENT_COLUMNS[1..]
            .iter()
            .filter_map(|c| table.column(c))
            .collect();

        for row in &table.rows {
            self.rows += 1;
            if let Some(id) = id_idx.and_then(|i| row.get(i)) {
                let id = id.trim();
                if !id.is_empty() {
                    self.ids.insert(id.to_string());
                }
            }
            let captured = enrichment_idx.iter().any(|&i| {
                row.get(i)
                    .map(|v| is_captured_value(v))
                    .unwrap_or(false)
            });
            if captured {
                if let Some(company) = company_idx.and_then(|i| row.get(i)) {
                    if !company.trim().is_empty() {
                        self.enriched_companies.insert(company.clone());
                    }
                }
            }
        }
    }

    /// Whether a listing id is already stored.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id.trim())
    }

    /// Whether size or member data was ever captured for this company.
    pub fn company_already_enriched(&self, company: &str) -> bool {
        self.enriched_companies.contains(company)
    }

    /// Append one record. Returns `false` without writing when the id
    /// is already present.
    pub fn append(&mut self, record: &JobRecord) -> Result<bool> {
        if self.contains(&record.job_id) {
            debug!("listing {} already stored, not appending", record.job_id);
            return Ok(false);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open store: {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(record.to_row())
            .map_err(|e| HarvestError::Store(format!("failed to write row {}: {e}", record.job_id)))?;
        writer
            .flush()
            .map_err(|e| HarvestError::Store(format!("failed to flush {}: {e}", self.path.display())))?;

        self.ids.insert(record.job_id.trim().to_string());
        if record.profile.is_captured() && !record.company.trim().is_empty() {
            self.enriched_companies.insert(record.company.clone());
        }
        self.rows += 1;

        info!(
            "saved listing {}: {} | {} | posted_at={} | description_len={} | size={} members={}",
            record.job_id,
            record.title,
            record.company,
            if record.posted_at.is_empty() { "N/A" } else { record.posted_at.as_str() },
            record.description.len(),
            record.profile.size,
            record.profile.associated_members,
        );
        Ok(true)
    }

    /// Number of rows known to the store (loaded plus appended).
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of companies in the enrichment index.
    pub fn known_companies(&self) -> usize {
        self.enriched_companies.len()
    }

    /// Number of distinct listing ids.
    pub fn known_ids(&self) -> usize {
        self.ids.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the existing file could not be read and was left as is.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

fn is_captured_value(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != UNAVAILABLE
}

fn read_table(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed store row")?;
        records.push(record.iter().map(|f| f.to_string()).collect::<Vec<String>>());
    }

    let Some(first) = records.first() else {
        return Ok(Table {
            columns: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        });
    };

    if first.iter().any(|c| c.trim() == ID_COLUMN) {
        let columns = records.remove(0).into_iter().map(|c| c.trim().to_string()).collect();
        return Ok(Table { columns, rows: records });
    }

    warn!(
        "store {} has no {ID_COLUMN} column, reading it positionally",
        path.display()
    );
    Ok(Table {
        columns: LEGACY_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records,
    })
}

/// Write the whole table through a sibling temp file and rename it into place.
fn write_table(path: &Path, table: &Table) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn ensure_trailing_newline(path: &Path) -> Result<()> {
    let mut file = File::options().read(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}
