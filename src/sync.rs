//! Index synchronization.
//!
//! Applies detected changes to the search index and records each outcome
//! in the record mapping. Every document is its own unit of work: a
//! failure on one is logged, counted, and rolled back without touching
//! the rest of the batch. The mapping is saved after every document, so
//! an interrupted pass keeps whatever already completed.
//!
//! Per document the order is always: delete whatever object the record
//! still owns, fetch, upload, record the new id as pending, save, wait for
//! the index to confirm, promote. A pending id is deleted when the
//! document fails, times out, or is synchronized again, so a name never
//! owns two live objects.
//!
//! # Revision bookkeeping
//!
//! `observed_revision` is written by the detector, `synced_revision` only
//! here and only after the index confirmed an upload. When a document
//! fails, its observed marker is rolled back to the synced one (or the
//! record is dropped if it owns nothing in the index), so the next
//! detection pass sees it as changed again instead of silently believing
//! it indexed.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::is_not_found;
use crate::models::{ChangeEntry, RecordMap, SyncReport};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::records::RecordStore;
use crate::traits::{FileStore, SearchIndex};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on one document's delete/fetch/upload/confirm sequence.
    pub document_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            document_timeout: Duration::from_secs(120),
        }
    }
}

/// Apply `changes` in order, saving the mapping after each one, and
/// return outcome counts.
///
/// Per-document errors end up in [`SyncReport::failed`] and in the log.
/// Only a failure to save the mapping aborts the batch.
pub async fn sync_changes(
    records: &mut RecordMap,
    record_store: &dyn RecordStore,
    changes: &[ChangeEntry],
    store: &dyn FileStore,
    index: &dyn SearchIndex,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let label = store.label();
    let total = changes.len() as u64;

    for (n, change) in changes.iter().enumerate() {
        let outcome = tokio::time::timeout(
            options.document_timeout,
            sync_document(records, record_store, change, store, index, options),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(object_id)) => {
                report.indexed += 1;
                tracing::info!(
                    document = %change.name,
                    kind = %change.kind,
                    object_id = %object_id,
                    "indexed"
                );
                None
            }
            Ok(Err(e)) => Some(e),
            Err(_) => Some(anyhow::anyhow!(
                "timed out after {:?}",
                options.document_timeout
            )),
        };

        let indexed = failure.is_none();
        if let Some(e) = failure {
            report.failed += 1;
            tracing::error!(document = %change.name, kind = %change.kind, "sync failed: {:#}", e);
            discard_pending(records, &change.name, index, options).await;
            roll_back(records, &change.name);
        }

        record_store
            .save(records)
            .await
            .with_context(|| format!("failed to save records after {}", change.name))?;

        progress.report(SyncProgressEvent::Document {
            store: label.clone(),
            name: change.name.clone(),
            n: n as u64 + 1,
            total,
            indexed,
        });
    }

    Ok(report)
}

/// Delete what the record still owns, then fetch, upload, and confirm.
///
/// Returns the new object id. The record is only marked synced after the
/// index confirmed the object.
async fn sync_document(
    records: &mut RecordMap,
    record_store: &dyn RecordStore,
    change: &ChangeEntry,
    store: &dyn FileStore,
    index: &dyn SearchIndex,
    options: &SyncOptions,
) -> Result<String> {
    release_objects(records, &change.name, index, options)
        .await
        .context("failed to delete earlier object")?;

    let content = store
        .get_content(&change.item_id)
        .await
        .with_context(|| format!("failed to fetch content of item {}", change.item_id))?;
    let digest = hex::encode(Sha256::digest(&content));

    let object_id = index
        .upload(&change.name, content)
        .await
        .context("upload failed")?;

    let record = records.entry(change.name.clone()).or_default();
    record.item_id = Some(change.item_id.clone());
    record.observed_revision = Some(change.revision.clone());
    record.pending_object_id = Some(object_id.clone());
    record_store
        .save(records)
        .await
        .context("failed to record pending upload")?;

    index
        .confirm(&object_id)
        .await
        .context("index did not confirm upload")?;

    let record = records.entry(change.name.clone()).or_default();
    record.pending_object_id = None;
    record.synced_revision = Some(change.revision.clone());
    record.indexed_object_id = Some(object_id.clone());
    record.content_sha256 = Some(digest);
    record.synced_at = Some(Utc::now());

    Ok(object_id)
}

/// Delete one object; an object the index no longer knows counts as deleted.
async fn delete_object(index: &dyn SearchIndex, document: &str, object_id: &str) -> Result<()> {
    match index.delete(object_id).await {
        Ok(()) => {
            tracing::debug!(document, object_id, "deleted object");
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            tracing::warn!(document, object_id, "object already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete the unconfirmed object of `name`, if any.
///
/// On failure the id stays on the record and the next attempt at this
/// document deletes it first. Returns true if an object was discarded.
pub async fn discard_pending(
    records: &mut RecordMap,
    name: &str,
    index: &dyn SearchIndex,
    options: &SyncOptions,
) -> bool {
    let Some(object_id) = records.get(name).and_then(|r| r.pending_object_id.clone()) else {
        return false;
    };

    let result = tokio::time::timeout(
        options.document_timeout,
        delete_object(index, name, &object_id),
    )
    .await;
    match result {
        Ok(Ok(())) => {
            if let Some(record) = records.get_mut(name) {
                record.pending_object_id = None;
            }
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(document = %name, object_id = %object_id, "could not discard unconfirmed object: {:#}", e);
            false
        }
        Err(_) => {
            tracing::warn!(document = %name, object_id = %object_id, "discarding unconfirmed object timed out");
            false
        }
    }
}

/// Undo the detector's observation for a document that was not synced.
///
/// A record that owns nothing in the index is removed outright. One
/// without a confirmed object forgets its observed marker, so any listing
/// re-detects it. Otherwise the observed marker goes back to the last
/// synced one.
pub fn roll_back(records: &mut RecordMap, name: &str) {
    let Some(record) = records.get_mut(name) else {
        return;
    };
    if record.synced_revision.is_none()
        && !record.is_indexed()
        && record.pending_object_id.is_none()
    {
        records.remove(name);
    } else if !record.is_indexed() {
        record.observed_revision = None;
    } else {
        record.observed_revision = record.synced_revision.clone();
    }
}

/// Delete the unconfirmed object, then the confirmed one, clearing each
/// field as its delete succeeds.
async fn release_objects(
    records: &mut RecordMap,
    name: &str,
    index: &dyn SearchIndex,
    options: &SyncOptions,
) -> Result<()> {
    let Some(record) = records.get(name) else {
        return Ok(());
    };
    let (pending, indexed) = (
        record.pending_object_id.clone(),
        record.indexed_object_id.clone(),
    );

    for (id, is_pending) in [(pending, true), (indexed, false)] {
        let Some(id) = id else { continue };
        tokio::time::timeout(options.document_timeout, delete_object(index, name, &id))
            .await
            .map_err(|_| anyhow::anyhow!("delete of {} timed out", id))??;
        if let Some(record) = records.get_mut(name) {
            if is_pending {
                record.pending_object_id = None;
            } else {
                record.indexed_object_id = None;
            }
        }
    }
    Ok(())
}

/// Remove stale documents from the index and the mapping.
///
/// Both the confirmed and any unconfirmed object are deleted; a missing
/// object counts as removed. On any other failure the record stays so the
/// next pass tries again.
pub async fn prune_removed(
    records: &mut RecordMap,
    names: &[String],
    index: &dyn SearchIndex,
    options: &SyncOptions,
) -> SyncReport {
    let mut report = SyncReport::default();

    for name in names {
        match release_objects(records, name, index, options).await {
            Ok(()) => {
                records.remove(name);
                report.pruned += 1;
                tracing::info!(document = %name, "pruned");
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(document = %name, "prune failed: {:#}", e);
            }
        }
    }

    report
}
