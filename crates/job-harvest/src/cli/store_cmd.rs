//! Store maintenance subcommands: `migrate` and `status`.

use crate::store::RecordStore;
use anyhow::{bail, Result};
use std::path::Path;

/// Open a store, rewriting it into the canonical schema if needed.
pub async fn migrate(output: &Path) -> Result<()> {
    let before = RecordStore::inspect(output).ok();
    let store = RecordStore::open(output)?;
    if store.is_degraded() {
        bail!(
            "{} could not be read, nothing was migrated",
            store.path().display()
        );
    }

    let action = match before {
        None => "created",
        Some(stats) if stats.canonical => "already canonical",
        Some(_) => "migrated",
    };
    println!(
        "  {} {action}: {} rows, {} enriched companies",
        store.path().display(),
        store.len(),
        store.known_companies()
    );
    Ok(())
}

/// Print store statistics. Never writes to the store.
pub async fn status(output: &Path) -> Result<()> {
    if !output.exists() {
        println!("  {} does not exist yet", output.display());
        return Ok(());
    }
    let stats = RecordStore::inspect(output)?;
    println!("  store:      {}", output.display());
    println!("  rows:       {}", stats.rows);
    println!("  listings:   {}", stats.listings);
    println!("  companies:  {} enriched", stats.companies);
    if !stats.canonical {
        println!("  schema:     outdated, run 'job-harvest migrate'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CANONICAL_COLUMNS;
    use std::fs;

    #[tokio::test]
    async fn test_status_does_not_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        let original = format!("{}\na,,b,1,T,C,L,,,,True,d,u,p,l\n", CANONICAL_COLUMNS[..15].join(","));
        fs::write(&path, &original).unwrap();

        status(&path).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);

        migrate(&path).await.unwrap();
        assert!(RecordStore::inspect(&path).unwrap().canonical);
    }

    #[tokio::test]
    async fn test_migrate_reports_unreadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        let mut bytes = format!("{}\n", CANONICAL_COLUMNS.join(",")).into_bytes();
        bytes.extend_from_slice(&[0xff, 0xfe, b',', b'1', b'\n']);
        fs::write(&path, &bytes).unwrap();

        assert!(migrate(&path).await.is_err());
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }
}
