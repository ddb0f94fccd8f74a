//! Change detection.
//!
//! Compares a live store listing against the record mapping and classifies
//! each file as new, modified, or unchanged. Comparison is exact equality
//! on the opaque revision marker: a spurious re-sync is acceptable, a
//! missed update is not.
//!
//! Detection writes what it saw into `observed_revision`. The caller must
//! persist the records before synchronizing so a crash between the two
//! steps does not lose the observation. Because the synchronizer rolls
//! `observed_revision` back on failure, a document whose upload failed
//! is detected again on the next pass.

use std::collections::HashSet;

use crate::models::{ChangeEntry, ChangeKind, DocumentRecord, ItemKind, RecordMap, StoreItem};

/// Classify `listing` against `records`, updating observed markers in place.
///
/// Only [`ItemKind::File`] items are considered. Changes are returned in
/// listing order. If the listing names the same file twice, the first
/// occurrence wins.
pub fn detect_changes(records: &mut RecordMap, listing: &[StoreItem]) -> Vec<ChangeEntry> {
    let mut changes = Vec::new();
    let mut seen = HashSet::new();

    for item in listing {
        if item.kind != ItemKind::File {
            continue;
        }
        if !seen.insert(item.name.as_str()) {
            tracing::warn!(document = %item.name, "duplicate name in listing, ignoring later entry");
            continue;
        }

        let kind = match records.get_mut(&item.name) {
            None => {
                records.insert(
                    item.name.clone(),
                    DocumentRecord {
                        item_id: Some(item.id.clone()),
                        observed_revision: Some(item.revision.clone()),
                        ..Default::default()
                    },
                );
                ChangeKind::New
            }
            Some(record) => {
                record.item_id = Some(item.id.clone());
                if record.observed_revision.as_deref() == Some(item.revision.as_str()) {
                    continue;
                }
                record.observed_revision = Some(item.revision.clone());
                // A record whose first upload never landed is still new to the index.
                if record.is_indexed() {
                    ChangeKind::Modified
                } else {
                    ChangeKind::New
                }
            }
        };

        tracing::debug!(document = %item.name, %kind, revision = %item.revision, "change detected");
        changes.push(ChangeEntry {
            name: item.name.clone(),
            kind,
            revision: item.revision.clone(),
            item_id: item.id.clone(),
        });
    }

    changes
}

/// Names present in `records` that no longer appear as files in `listing`.
pub fn detect_removed(records: &RecordMap, listing: &[StoreItem]) -> Vec<String> {
    let live: HashSet<&str> = listing
        .iter()
        .filter(|i| i.kind == ItemKind::File)
        .map(|i| i.name.as_str())
        .collect();

    records
        .keys()
        .filter(|name| !live.contains(name.as_str()))
        .cloned()
        .collect()
}
