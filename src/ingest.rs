//! Synchronization pass orchestration.
//!
//! One pass: list the store → filter names → recover interrupted work →
//! detect changes → save → synchronize each document, saving after each →
//! optionally prune → save. Passes over the same record store must not
//! overlap; the HTTP server serializes them and the CLI runs one per
//! process.
//!
//! A pass cut short (process killed, future dropped) leaves records whose
//! observed marker is ahead of their synced marker, and possibly an
//! unconfirmed object id. The next pass rolls the markers back and
//! deletes those objects before detecting, so nothing
//! observed-but-not-indexed is ever trusted and nothing uploaded is lost
//! track of.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::detect::{detect_changes, detect_removed};
use crate::filter::NameFilter;
use crate::models::{ChangeEntry, RecordMap, SyncReport};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::records::{self, RecordStore};
use crate::sync::{discard_pending, prune_removed, roll_back, sync_changes, SyncOptions};
use crate::traits::{self, FileStore, SearchIndex};

#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Detect only; persist nothing and touch no index.
    pub dry_run: bool,
    /// Synchronize at most this many changes; the rest wait for the next pass.
    pub limit: Option<usize>,
    /// Remove documents that disappeared from the store.
    pub prune: bool,
    pub sync: SyncOptions,
}

impl PassOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: false,
            limit: None,
            prune: config.sync.prune_missing,
            sync: SyncOptions {
                document_timeout: config.sync.document_timeout(),
            },
        }
    }
}

/// What one pass saw and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassOutcome {
    pub listed: usize,
    pub changes: Vec<ChangeEntry>,
    /// Changes held back by `limit`.
    pub deferred: usize,
    /// Names gone from the store (only computed when pruning).
    pub removed: Vec<String>,
    /// Records rolled back because an earlier pass was interrupted.
    pub recovered: usize,
    /// Unconfirmed objects left by an earlier pass and deleted now.
    pub discarded: usize,
    pub report: SyncReport,
}

/// Run one synchronization pass against explicit collaborators.
pub async fn run_pass(
    record_store: &dyn RecordStore,
    store: &dyn FileStore,
    index: &dyn SearchIndex,
    filter: &NameFilter,
    options: &PassOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<PassOutcome> {
    progress.report(SyncProgressEvent::Listing {
        store: store.label(),
    });
    let listing = store
        .list_items()
        .await
        .with_context(|| format!("Failed to list {}", store.label()))?;
    let listing = filter.apply(listing);

    let mut records = record_store.load().await?;
    let recovered = recover_interrupted(&mut records);
    let discarded = if options.dry_run {
        0
    } else {
        discard_abandoned(&mut records, index, &options.sync).await
    };

    let mut outcome = PassOutcome {
        listed: listing.len(),
        recovered,
        discarded,
        ..Default::default()
    };

    let mut changes = detect_changes(&mut records, &listing);
    if options.prune {
        outcome.removed = detect_removed(&records, &listing);
    }

    if let Some(limit) = options.limit {
        if changes.len() > limit {
            let deferred = changes.split_off(limit);
            for change in &deferred {
                roll_back(&mut records, &change.name);
            }
            outcome.deferred = deferred.len();
        }
    }

    if options.dry_run {
        outcome.changes = changes;
        return Ok(outcome);
    }

    record_store.save(&records).await?;

    let mut report = sync_changes(
        &mut records,
        record_store,
        &changes,
        store,
        index,
        &options.sync,
        progress,
    )
    .await?;
    if options.prune && !outcome.removed.is_empty() {
        report += prune_removed(&mut records, &outcome.removed, index, &options.sync).await;
    }

    record_store.save(&records).await?;

    outcome.changes = changes;
    outcome.report = report;
    Ok(outcome)
}

/// Roll back records left mid-flight by an interrupted pass.
fn recover_interrupted(records: &mut RecordMap) -> usize {
    let pending: Vec<String> = records
        .iter()
        .filter(|(_, r)| r.observed_revision.is_some() && r.is_pending())
        .map(|(name, _)| name.clone())
        .collect();

    for name in &pending {
        tracing::warn!(document = %name, "recovering document from an interrupted pass");
        roll_back(records, name);
    }
    pending.len()
}

/// Delete objects an interrupted pass uploaded but never confirmed.
///
/// Records left owning nothing are dropped. Ones whose delete fails keep
/// the id; the next upload of that name deletes it first.
async fn discard_abandoned(
    records: &mut RecordMap,
    index: &dyn SearchIndex,
    options: &SyncOptions,
) -> usize {
    let names: Vec<String> = records
        .iter()
        .filter(|(_, r)| r.pending_object_id.is_some())
        .map(|(name, _)| name.clone())
        .collect();

    let mut discarded = 0;
    for name in &names {
        if discard_pending(records, name, index, options).await {
            tracing::warn!(document = %name, "deleted unconfirmed object from an interrupted pass");
            discarded += 1;
            roll_back(records, name);
        }
    }
    discarded
}

/// `relay sync` / `relay detect`: build collaborators from config, run a
/// pass, print a summary.
pub async fn run_sync(
    config: &Config,
    options: PassOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<PassOutcome> {
    let record_store = records::open(config).await?;
    let store = traits::file_store_from_config(config)?;
    let filter = NameFilter::from_config(&config.store)?;

    let outcome = if options.dry_run {
        run_pass(
            record_store.as_ref(),
            store.as_ref(),
            &DetectOnly,
            &filter,
            &options,
            progress,
        )
        .await?
    } else {
        let index = traits::search_index_from_config(config)?;
        run_pass(
            record_store.as_ref(),
            store.as_ref(),
            index.as_ref(),
            &filter,
            &options,
            progress,
        )
        .await?
    };

    print_outcome(&store.label(), &outcome, options.dry_run);
    Ok(outcome)
}

fn print_outcome(label: &str, outcome: &PassOutcome, dry_run: bool) {
    if dry_run {
        println!("sync {} (dry-run)", label);
    } else {
        println!("sync {}", label);
    }
    println!("  listed: {} files", outcome.listed);
    for change in &outcome.changes {
        println!("  {:<9} {}", change.kind.to_string(), change.name);
    }
    if outcome.deferred > 0 {
        println!("  deferred: {}", outcome.deferred);
    }
    if outcome.recovered > 0 {
        println!("  recovered: {}", outcome.recovered);
    }
    if outcome.discarded > 0 {
        println!("  discarded: {}", outcome.discarded);
    }
    for name in &outcome.removed {
        println!("  removed   {}", name);
    }
    if !dry_run {
        println!("  indexed: {}", outcome.report.indexed);
        println!("  failed: {}", outcome.report.failed);
        if outcome.report.pruned > 0 {
            println!("  pruned: {}", outcome.report.pruned);
        }
    }
    println!("ok");
}

/// Index stand-in for dry runs; never called because dry runs return
/// before synchronizing.
struct DetectOnly;

#[async_trait::async_trait]
impl SearchIndex for DetectOnly {
    async fn upload(&self, name: &str, _content: Vec<u8>) -> Result<String> {
        anyhow::bail!("dry run: refusing to upload {}", name)
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        anyhow::bail!("dry run: refusing to delete {}", object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentRecord;

    #[test]
    fn recovery_rolls_back_only_pending_records() {
        let mut records = RecordMap::new();
        records.insert(
            "done.pdf".into(),
            DocumentRecord {
                observed_revision: Some("r1".into()),
                synced_revision: Some("r1".into()),
                indexed_object_id: Some("file-1".into()),
                ..Default::default()
            },
        );
        records.insert(
            "interrupted.pdf".into(),
            DocumentRecord {
                observed_revision: Some("r2".into()),
                synced_revision: Some("r1".into()),
                indexed_object_id: Some("file-2".into()),
                ..Default::default()
            },
        );
        records.insert(
            "never.pdf".into(),
            DocumentRecord {
                observed_revision: Some("r1".into()),
                ..Default::default()
            },
        );
        records.insert(
            "unconfirmed.pdf".into(),
            DocumentRecord {
                observed_revision: Some("r1".into()),
                pending_object_id: Some("file-3".into()),
                ..Default::default()
            },
        );

        assert_eq!(recover_interrupted(&mut records), 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records["unconfirmed.pdf"].observed_revision, None);
        assert_eq!(
            records["interrupted.pdf"].observed_revision.as_deref(),
            Some("r1")
        );
        assert_eq!(recover_interrupted(&mut records), 0);
    }
}
