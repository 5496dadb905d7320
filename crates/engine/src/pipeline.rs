//! Save pipeline
//!
//! Turns a change-set into document writes:
//! 1. Walk the entries in order. Document roots are persisted immediately;
//!    owned entries enlist their root instead, promoting an `Unchanged`
//!    root to `Modified`.
//! 2. Persist every enlisted root that was not already persisted.
//! 3. Return the number of documents the store actually wrote.
//!
//! Each root is written at most once per run. Owned entries are never
//! written on their own: they are embedded in their root's document.
//!
//! ## Persisting one root
//!
//! ```text
//! shared identity + Deleted  -> nothing (the counterpart owns the delete)
//! shared identity + Added    -> treated as Modified
//! Added                      -> create fresh document
//! Modified, payload present  -> update a copy of the payload, replace if changed
//! Modified, no payload       -> replace with fresh document
//! Deleted                    -> delete
//! anything else              -> nothing
//! ```
//!
//! Store errors are not caught: writes issued before a failure stay
//! applied and nothing after it is attempted.

use crate::cache::DocumentSourceCache;
use crate::config::SaveConfig;
use crate::resolver::RootResolver;
use crate::source::DocumentSource;
use nestdoc_client::{AsyncDocumentClient, DocumentClient, WriteOutcome};
use nestdoc_core::{ChangeTracker, Document, EntityState, EntityType, Error, RecordId, Result};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Document operation decided for one root record
#[derive(Debug, Clone, PartialEq)]
enum WriteOp {
    Create { document: Document },
    Replace { document_id: String, document: Document },
    Delete { document_id: String },
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::Create { .. } => "create",
            WriteOp::Replace { .. } => "replace",
            WriteOp::Delete { .. } => "delete",
        }
    }

    fn document_id(&self) -> &str {
        match self {
            WriteOp::Create { document } => document.id().unwrap_or_default(),
            WriteOp::Replace { document_id, .. } | WriteOp::Delete { document_id } => document_id,
        }
    }
}

/// Prepared write for one root record
#[derive(Debug)]
struct PendingWrite {
    record: RecordId,
    entity_type: String,
    collection_id: String,
    op: WriteOp,
    /// Record whose fetched payload the replace was built from
    payload_carrier: Option<RecordId>,
}

impl PendingWrite {
    /// Attach the written document to the record that carried the payload
    ///
    /// Only called once the store reports the write applied, so a failed or
    /// rejected replace leaves the previous payload in place for a retry.
    fn commit_payload(&self, tracker: &mut ChangeTracker) -> Result<()> {
        if let (Some(carrier), WriteOp::Replace { document, .. }) =
            (self.payload_carrier, &self.op)
        {
            tracker.attach_document(carrier, document.clone())?;
        }
        Ok(())
    }
}

/// Roots enlisted by owned entries, in enlistment order
#[derive(Debug, Default)]
struct RootQueue {
    order: Vec<RecordId>,
    members: FxHashSet<RecordId>,
}

impl RootQueue {
    fn insert(&mut self, root: RecordId) -> bool {
        if self.members.insert(root) {
            self.order.push(root);
            true
        } else {
            false
        }
    }
}

/// Pass-one bookkeeping shared by the blocking and async runs
#[derive(Debug, Default)]
struct SaveRun {
    processed: FxHashSet<RecordId>,
    pending: RootQueue,
    written: usize,
}

impl SaveRun {
    /// Roots enlisted by owned entries that were not persisted directly
    fn leftover_roots(&mut self) -> Vec<RecordId> {
        let processed = &self.processed;
        std::mem::take(&mut self.pending.order)
            .into_iter()
            .filter(|root| !processed.contains(root))
            .collect()
    }
}

/// What to do with one entry during the first pass
enum Step {
    /// Persist this document root now
    Persist(RecordId),
    /// Owned entry; its root was enlisted (or already handled)
    Deferred,
}

/// Maps tracked changes onto document-store writes
///
/// The pipeline owns its [`DocumentSourceCache`], which lives as long as the
/// pipeline and is safe to share: `save_*` methods take `&self`.
#[derive(Debug)]
pub struct SavePipeline<C> {
    client: C,
    sources: DocumentSourceCache,
    resolver: RootResolver,
    config: SaveConfig,
}

impl<C> SavePipeline<C> {
    /// Create a pipeline writing through `client`
    pub fn new(client: C, config: SaveConfig) -> Self {
        SavePipeline {
            client,
            sources: DocumentSourceCache::new(),
            resolver: RootResolver::new(config.sensitive_data_logging),
            config,
        }
    }

    /// The document client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The configuration
    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    /// The document source cache
    pub fn document_sources(&self) -> &DocumentSourceCache {
        &self.sources
    }

    /// Document source for `entity_type`, created on first use
    pub fn document_source(&self, entity_type: &Arc<EntityType>) -> Arc<DocumentSource> {
        self.sources.get_or_create(entity_type)
    }

    /// Classify one entry of the first pass
    fn step(
        &self,
        tracker: &mut ChangeTracker,
        run: &mut SaveRun,
        entry: RecordId,
    ) -> Result<Step> {
        if tracker.get(entry)?.entity_type().is_document_root() {
            run.processed.insert(entry);
            return Ok(Step::Persist(entry));
        }

        let root = self.resolver.resolve_root(tracker, entry)?;
        if !run.processed.contains(&root)
            && run.pending.insert(root)
            && tracker.state(root)? == EntityState::Unchanged
        {
            debug!(
                target: "nestdoc::save",
                record = %root,
                owned = %entry,
                "promoting unchanged document root to modified"
            );
            tracker.set_state(root, EntityState::Modified)?;
        }
        Ok(Step::Deferred)
    }

    /// Decide the document operation for a root record
    ///
    /// Returns `None` when the record needs no write. A fetched payload is
    /// updated on a copy; the carrier keeps its original until the write
    /// is applied.
    fn prepare(&self, tracker: &mut ChangeTracker, record_id: RecordId) -> Result<Option<PendingWrite>> {
        let (entity_type, shared, mut state) = {
            let record = tracker.get(record_id)?;
            (
                Arc::clone(record.entity_type()),
                record.shared_identity(),
                record.state(),
            )
        };
        let source = self.sources.get_or_create(&entity_type);

        if shared.is_some() {
            match state {
                EntityState::Deleted => {
                    debug!(
                        target: "nestdoc::save",
                        record = %record_id,
                        entity_type = entity_type.name(),
                        "skipping delete governed by shared-identity record"
                    );
                    return Ok(None);
                }
                EntityState::Added => state = EntityState::Modified,
                _ => {}
            }
        }

        let mut payload_carrier = None;
        let op = match state {
            EntityState::Added => {
                let mut document = source.create_document(tracker, record_id, &self.sources)?;
                document.stamp_partition_key(&self.config.partition_key_value);
                WriteOp::Create { document }
            }
            EntityState::Modified => {
                let carrier = shared.unwrap_or(record_id);
                let document = match tracker.get(carrier)?.document().cloned() {
                    Some(mut payload) => {
                        let changed = source
                            .update_document(&mut payload, tracker, record_id, &self.sources)?
                            .is_some();
                        if !changed {
                            debug!(
                                target: "nestdoc::save",
                                record = %record_id,
                                entity_type = entity_type.name(),
                                "skipping replace, stored document already up to date"
                            );
                            return Ok(None);
                        }
                        payload_carrier = Some(carrier);
                        payload
                    }
                    None => {
                        let mut document =
                            source.create_document(tracker, record_id, &self.sources)?;
                        document.stamp_partition_key(&self.config.partition_key_value);
                        if let Some(discriminator) = entity_type.discriminator() {
                            document.insert(discriminator.field.clone(), discriminator.value.clone());
                        }
                        document
                    }
                };
                let document_id = source.id(tracker.get(carrier)?);
                WriteOp::Replace {
                    document_id,
                    document,
                }
            }
            EntityState::Deleted => WriteOp::Delete {
                document_id: source.id(tracker.get(record_id)?),
            },
            EntityState::Unchanged | EntityState::Unmodified => {
                debug!(
                    target: "nestdoc::save",
                    record = %record_id,
                    entity_type = entity_type.name(),
                    %state,
                    "no document operation for state"
                );
                return Ok(None);
            }
        };

        Ok(Some(PendingWrite {
            record: record_id,
            entity_type: entity_type.name().to_string(),
            collection_id: source.collection_id().to_string(),
            op,
            payload_carrier,
        }))
    }

    /// Log the outcome of an issued write and report whether it counts
    fn finish(&self, tracker: &ChangeTracker, write: &PendingWrite, outcome: WriteOutcome) -> bool {
        let keys = if self.config.sensitive_data_logging {
            tracker
                .get(write.record)
                .map(|record| record.key_values_string())
                .ok()
        } else {
            None
        };

        if outcome.is_written() {
            debug!(
                target: "nestdoc::save",
                op = write.op.name(),
                entity_type = %write.entity_type,
                collection = %write.collection_id,
                id = write.op.document_id(),
                keys = keys.as_deref(),
                "document written"
            );
        } else {
            warn!(
                target: "nestdoc::save",
                op = write.op.name(),
                entity_type = %write.entity_type,
                collection = %write.collection_id,
                id = write.op.document_id(),
                keys = keys.as_deref(),
                %outcome,
                "document store did not apply write"
            );
        }
        outcome.is_written()
    }
}

impl<C: DocumentClient> SavePipeline<C> {
    /// Save every record with a pending write
    ///
    /// Entries are taken from [`ChangeTracker::entries_to_save`].
    pub fn save_changes(&self, tracker: &mut ChangeTracker) -> Result<usize> {
        let entries = tracker.entries_to_save();
        self.save_entries(tracker, &entries)
    }

    /// Save `entries`, returning the number of documents written
    ///
    /// # Errors
    ///
    /// - [`Error::OrphanedNestedDocument`] if an owned entry has no tracked
    ///   root; no write is issued for that entry's root
    /// - [`Error::Store`] from the client, after which the run stops
    pub fn save_entries(&self, tracker: &mut ChangeTracker, entries: &[RecordId]) -> Result<usize> {
        let mut run = SaveRun::default();

        for &entry in entries {
            if let Step::Persist(root) = self.step(tracker, &mut run, entry)? {
                if self.persist(tracker, root)? {
                    run.written += 1;
                }
            }
        }

        for root in run.leftover_roots() {
            if self.persist(tracker, root)? {
                run.written += 1;
            }
        }

        info!(
            target: "nestdoc::save",
            entries = entries.len(),
            written = run.written,
            "save completed"
        );
        Ok(run.written)
    }

    fn persist(&self, tracker: &mut ChangeTracker, record_id: RecordId) -> Result<bool> {
        let write = match self.prepare(tracker, record_id)? {
            Some(write) => write,
            None => return Ok(false),
        };

        let outcome = match &write.op {
            WriteOp::Create { document } => self.client.create_item(&write.collection_id, document)?,
            WriteOp::Replace {
                document_id,
                document,
            } => self
                .client
                .replace_item(&write.collection_id, document_id, document)?,
            WriteOp::Delete { document_id } => {
                self.client.delete_item(&write.collection_id, document_id)?
            }
        };
        let written = self.finish(tracker, &write, outcome);
        if written {
            write.commit_payload(tracker)?;
        }
        Ok(written)
    }
}

impl<C: AsyncDocumentClient> SavePipeline<C> {
    /// Async version of [`save_changes`](SavePipeline::save_changes)
    pub async fn save_changes_async(
        &self,
        tracker: &mut ChangeTracker,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let entries = tracker.entries_to_save();
        self.save_entries_async(tracker, &entries, cancel).await
    }

    /// Async version of [`save_entries`](SavePipeline::save_entries)
    ///
    /// Writes are issued one at a time. `cancel` is checked before each
    /// write and passed to the client; a cancelled run returns
    /// [`Error::Cancelled`] and leaves earlier writes in place.
    pub async fn save_entries_async(
        &self,
        tracker: &mut ChangeTracker,
        entries: &[RecordId],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut run = SaveRun::default();

        for &entry in entries {
            if let Step::Persist(root) = self.step(tracker, &mut run, entry)? {
                if self.persist_async(tracker, root, cancel).await? {
                    run.written += 1;
                }
            }
        }

        for root in run.leftover_roots() {
            if self.persist_async(tracker, root, cancel).await? {
                run.written += 1;
            }
        }

        info!(
            target: "nestdoc::save",
            entries = entries.len(),
            written = run.written,
            "async save completed"
        );
        Ok(run.written)
    }

    async fn persist_async(
        &self,
        tracker: &mut ChangeTracker,
        record_id: RecordId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let write = match self.prepare(tracker, record_id)? {
            Some(write) => write,
            None => return Ok(false),
        };

        let outcome = match &write.op {
            WriteOp::Create { document } => {
                self.client
                    .create_item(&write.collection_id, document, cancel)
                    .await?
            }
            WriteOp::Replace {
                document_id,
                document,
            } => {
                self.client
                    .replace_item(&write.collection_id, document_id, document, cancel)
                    .await?
            }
            WriteOp::Delete { document_id } => {
                self.client
                    .delete_item(&write.collection_id, document_id, cancel)
                    .await?
            }
        };
        let written = self.finish(tracker, &write, outcome);
        if written {
            write.commit_payload(tracker)?;
        }
        Ok(written)
    }
}
