//! Save pipeline integration tests
//!
//! These tests run complete saves against the in-memory document store and
//! check the document operations that reach it:
//! - Owned entities fold into their root's document
//! - Each root is written at most once per run
//! - Shared-identity records and no-op updates
//! - Orphaned owned entities
//! - Store failures and cancellation

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use nestdoc_client::{
    AsyncDocumentClient, DocumentClient, MemoryDocumentStore, OperationKind, WriteOutcome,
};
use nestdoc_core::{
    ChangeTracker, Document, EntityState, EntityType, EntityTypeBuilder, Error, Model, RecordId,
    Result,
};
use nestdoc_engine::{SaveConfig, SavePipeline};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helper Functions
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nestdoc=debug")
        .with_test_writer()
        .try_init();
}

fn model() -> Model {
    Model::builder()
        .entity(
            EntityTypeBuilder::root("Customer")
                .collection("Customers")
                .key("CustomerId")
                .property("Name")
                .owns_one("Address", "Address")
                .owns_many("Orders", "Order"),
        )
        .entity(
            EntityTypeBuilder::owned("Address", "Customer")
                .property("City")
                .owns_one("Geo", "Geo"),
        )
        .entity(EntityTypeBuilder::owned("Geo", "Address").property("Lat"))
        .entity(
            EntityTypeBuilder::owned("Order", "Customer")
                .key("OrderId")
                .property("Total"),
        )
        .build()
        .unwrap()
}

struct Harness {
    customer: Arc<EntityType>,
    address: Arc<EntityType>,
    geo: Arc<EntityType>,
    order: Arc<EntityType>,
    store: Arc<MemoryDocumentStore>,
    pipeline: SavePipeline<Arc<MemoryDocumentStore>>,
    tracker: ChangeTracker,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SaveConfig::default())
    }

    fn with_config(config: SaveConfig) -> Self {
        init_tracing();
        let model = model();
        let store = Arc::new(MemoryDocumentStore::new());
        Harness {
            customer: model.entity_type("Customer").unwrap(),
            address: model.entity_type("Address").unwrap(),
            geo: model.entity_type("Geo").unwrap(),
            order: model.entity_type("Order").unwrap(),
            pipeline: SavePipeline::new(Arc::clone(&store), config),
            store,
            tracker: ChangeTracker::new(),
        }
    }

    fn customer(&mut self, id: &str, state: EntityState) -> RecordId {
        self.tracker
            .track(
                &self.customer,
                [("CustomerId", json!(id)), ("Name", json!(format!("Customer {id}")))],
                state,
            )
            .unwrap()
    }

    fn address(&mut self, owner: RecordId, city: &str, state: EntityState) -> RecordId {
        self.tracker
            .track_owned(&self.address, [("City", json!(city))], owner, state)
            .unwrap()
    }

    fn order(&mut self, owner: RecordId, id: i64, state: EntityState) -> RecordId {
        self.tracker
            .track_owned(
                &self.order,
                [("OrderId", json!(id)), ("Total", json!(id * 10))],
                owner,
                state,
            )
            .unwrap()
    }

    /// Seed the store with an existing document for `id`
    fn seed_customer(&self, id: &str) {
        self.store
            .seed(
                "Customers",
                Document::from_value(json!({
                    "id": format!("Customer|{id}"),
                    "CustomerId": id,
                    "Name": format!("Customer {id}"),
                    "Address": null,
                    "Orders": [],
                    "__partitionKey": "0"
                }))
                .unwrap(),
            )
            .unwrap();
    }

    fn save(&mut self) -> Result<usize> {
        self.pipeline.save_changes(&mut self.tracker)
    }

    fn save_entries(&mut self, entries: &[RecordId]) -> Result<usize> {
        self.pipeline.save_entries(&mut self.tracker, entries)
    }

    fn ops(&self) -> Vec<(OperationKind, String)> {
        self.store
            .operations()
            .into_iter()
            .map(|op| (op.kind, op.document_id))
            .collect()
    }
}

// ============================================================================
// Ownership folding
// ============================================================================

mod ownership {
    use super::*;

    #[test]
    fn test_added_root_with_added_owned_writes_one_document() {
        let mut h = Harness::new();
        let a = h.customer("ALFKI", EntityState::Added);
        h.address(a, "Berlin", EntityState::Added);

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.ops(), vec![(OperationKind::Create, "Customer|ALFKI".to_string())]);

        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Address"], json!({ "City": "Berlin", "Geo": null }));
        assert_eq!(stored["__partitionKey"], json!("0"));
    }

    #[test]
    fn test_unchanged_root_promoted_by_modified_owned() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let b = h.address(a, "Berlin", EntityState::Unchanged);
        h.tracker.set_value(b, "City", json!("Lyon")).unwrap();

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.tracker.state(a).unwrap(), EntityState::Modified);
        assert_eq!(h.ops(), vec![(OperationKind::Replace, "Customer|ALFKI".to_string())]);

        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Address"]["City"], json!("Lyon"));
    }

    #[test]
    fn test_deleted_owned_rewrites_root_without_it() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        h.order(a, 1, EntityState::Unchanged);
        h.order(a, 2, EntityState::Deleted);

        assert_eq!(h.save().unwrap(), 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Orders"], json!([{ "OrderId": 1, "Total": 10 }]));
    }

    #[test]
    fn test_many_owned_changes_write_root_once() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        h.address(a, "Berlin", EntityState::Added);
        h.order(a, 1, EntityState::Added);
        h.order(a, 2, EntityState::Added);
        h.order(a, 3, EntityState::Added);

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.store.operations().len(), 1);
    }

    #[test]
    fn test_root_listed_before_owned_is_not_written_twice() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Modified);
        let b = h.order(a, 1, EntityState::Added);

        assert_eq!(h.save_entries(&[a, b]).unwrap(), 1);
        assert_eq!(h.store.operations().len(), 1);
    }

    #[test]
    fn test_root_listed_after_owned_is_not_written_twice() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Modified);
        let b = h.order(a, 1, EntityState::Added);

        assert_eq!(h.save_entries(&[b, a]).unwrap(), 1);
        assert_eq!(h.store.operations().len(), 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Orders"], json!([{ "OrderId": 1, "Total": 10 }]));
    }

    #[test]
    fn test_multi_level_owned_change_reaches_root() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let b = h.address(a, "Berlin", EntityState::Unchanged);
        let geo = Arc::clone(&h.geo);
        h.tracker
            .track_owned(&geo, [("Lat", json!(52.52))], b, EntityState::Added)
            .unwrap();

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.tracker.state(a).unwrap(), EntityState::Modified);
        assert_eq!(h.tracker.state(b).unwrap(), EntityState::Unchanged);

        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Address"]["Geo"], json!({ "Lat": 52.52 }));
    }

    #[test]
    fn test_owned_of_added_root_does_not_promote() {
        let mut h = Harness::new();
        let a = h.customer("ALFKI", EntityState::Added);
        h.order(a, 1, EntityState::Added);

        h.save().unwrap();
        assert_eq!(h.tracker.state(a).unwrap(), EntityState::Added);
    }
}

// ============================================================================
// Lifecycle states
// ============================================================================

mod states {
    use super::*;

    #[test]
    fn test_deleted_root_issues_delete() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        h.customer("ALFKI", EntityState::Deleted);

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.ops(), vec![(OperationKind::Delete, "Customer|ALFKI".to_string())]);
        assert!(h.store.is_empty("Customers"));
    }

    #[test]
    fn test_modified_without_payload_replaces_fresh_document() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        h.tracker.set_value(a, "Name", json!("Alfreds Futterkiste")).unwrap();

        assert_eq!(h.save().unwrap(), 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Name"], json!("Alfreds Futterkiste"));
        assert_eq!(stored["__partitionKey"], json!("0"));
    }

    #[test]
    fn test_unchanged_and_unmodified_entries_write_nothing() {
        let mut h = Harness::new();
        let a = h.customer("A", EntityState::Unchanged);
        let b = h.customer("B", EntityState::Unmodified);

        assert_eq!(h.save_entries(&[a, b]).unwrap(), 0);
        assert!(h.store.operations().is_empty());
    }

    #[test]
    fn test_conflicting_create_is_not_counted() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        h.customer("ALFKI", EntityState::Added);

        assert_eq!(h.save().unwrap(), 0);
        let ops = h.store.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].outcome, WriteOutcome::Conflict);
    }

    #[test]
    fn test_delete_of_missing_document_is_not_counted() {
        let mut h = Harness::new();
        h.customer("GHOST", EntityState::Deleted);

        assert_eq!(h.save().unwrap(), 0);
        assert_eq!(h.store.operations()[0].outcome, WriteOutcome::NotFound);
    }

    #[test]
    fn test_count_covers_all_roots() {
        let mut h = Harness::new();
        h.seed_customer("B");
        h.seed_customer("C");
        h.customer("A", EntityState::Added);
        h.customer("B", EntityState::Modified);
        h.customer("C", EntityState::Deleted);

        assert_eq!(h.save().unwrap(), 3);
        let kinds: Vec<OperationKind> = h.store.operations().iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::Create, OperationKind::Replace, OperationKind::Delete]
        );
    }
}

// ============================================================================
// Fetched payloads
// ============================================================================

mod payloads {
    use super::*;

    fn fetched(h: &Harness, id: &str) -> Document {
        let mut doc = h.store.get("Customers", &format!("Customer|{id}")).unwrap();
        doc.insert("_etag".to_string(), json!("\"00000001\""));
        doc
    }

    #[test]
    fn test_no_change_update_skips_replace() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Modified);
        let payload = fetched(&h, "ALFKI");
        h.tracker.attach_document(a, payload).unwrap();

        assert_eq!(h.save().unwrap(), 0);
        assert!(h.store.operations().is_empty());
    }

    #[test]
    fn test_update_keeps_unmapped_fields() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let payload = fetched(&h, "ALFKI");
        h.tracker.attach_document(a, payload).unwrap();
        h.tracker.set_value(a, "Name", json!("Renamed")).unwrap();

        assert_eq!(h.save().unwrap(), 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Name"], json!("Renamed"));
        assert_eq!(stored["_etag"], json!("\"00000001\""));
    }

    #[test]
    fn test_failed_replace_is_retried() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let payload = fetched(&h, "ALFKI");
        h.tracker.attach_document(a, payload).unwrap();
        h.tracker.set_value(a, "Name", json!("New")).unwrap();
        h.store.fail_next(OperationKind::Replace);

        assert!(h.save().unwrap_err().is_store());
        let carried = h.tracker.get(a).unwrap().document().unwrap();
        assert_eq!(carried["Name"], json!("Customer ALFKI"));

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.ops(), vec![(OperationKind::Replace, "Customer|ALFKI".to_string())]);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Name"], json!("New"));
        assert_eq!(h.tracker.get(a).unwrap().document().unwrap()["Name"], json!("New"));
    }

    #[test]
    fn test_rejected_replace_keeps_payload() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let payload = fetched(&h, "ALFKI");
        h.tracker.attach_document(a, payload).unwrap();
        h.tracker.set_value(a, "Name", json!("New")).unwrap();

        // document removed behind the tracker's back
        DocumentClient::delete_item(&*h.store, "Customers", "Customer|ALFKI").unwrap();
        h.store.clear_operations();
        assert_eq!(h.save().unwrap(), 0);
        assert_eq!(h.store.operations()[0].outcome, WriteOutcome::NotFound);

        let carried = h.tracker.get(a).unwrap().document().unwrap();
        assert_eq!(carried["Name"], json!("Customer ALFKI"));

        h.seed_customer("ALFKI");
        assert_eq!(h.save().unwrap(), 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Name"], json!("New"));
    }

    #[test]
    fn test_owned_change_updates_payload() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        let payload = fetched(&h, "ALFKI");
        h.tracker.attach_document(a, payload).unwrap();
        h.order(a, 7, EntityState::Added);

        assert_eq!(h.save().unwrap(), 1);
        let carried = h.tracker.get(a).unwrap().document().unwrap().clone();
        assert_eq!(carried["Orders"], json!([{ "OrderId": 7, "Total": 70 }]));
        assert_eq!(h.store.get("Customers", "Customer|ALFKI").unwrap(), carried);
    }
}

// ============================================================================
// Shared identity
// ============================================================================

mod shared_identity {
    use super::*;

    #[test]
    fn test_deleted_with_counterpart_writes_nothing() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let old = h.customer("ALFKI", EntityState::Deleted);
        let new = h.customer("ALFKI", EntityState::Unchanged);
        h.tracker.set_shared_identity(old, new).unwrap();

        assert_eq!(h.save().unwrap(), 0);
        assert!(h.store.operations().is_empty());
        assert!(h.store.get("Customers", "Customer|ALFKI").is_some());
    }

    #[test]
    fn test_added_with_counterpart_replaces() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let old = h.customer("ALFKI", EntityState::Deleted);
        let new = h.customer("ALFKI", EntityState::Added);
        h.tracker.set_shared_identity(old, new).unwrap();
        h.tracker.set_value(new, "Name", json!("Replacement")).unwrap();

        assert_eq!(h.save().unwrap(), 1);
        assert_eq!(h.ops(), vec![(OperationKind::Replace, "Customer|ALFKI".to_string())]);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Name"], json!("Replacement"));
    }

    #[test]
    fn test_counterpart_payload_is_updated() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let old = h.customer("ALFKI", EntityState::Deleted);
        let new = h.customer("ALFKI", EntityState::Added);
        h.tracker.set_shared_identity(old, new).unwrap();
        let payload = h.store.get("Customers", "Customer|ALFKI").unwrap();
        h.tracker.attach_document(old, payload).unwrap();

        // the counterpart's payload already matches the new record
        assert_eq!(h.save().unwrap(), 0);
        assert!(h.store.operations().is_empty());

        h.tracker.set_value(new, "Name", json!("Changed")).unwrap();
        assert_eq!(h.save().unwrap(), 1);
        let carried = h.tracker.get(old).unwrap().document().unwrap();
        assert_eq!(carried["Name"], json!("Changed"));
    }
}

// ============================================================================
// Errors
// ============================================================================

mod errors {
    use super::*;

    #[test]
    fn test_orphaned_owned_entity_fails() {
        let mut h = Harness::new();
        let address = Arc::clone(&h.address);
        h.tracker
            .track(&address, [("City", json!("Berlin"))], EntityState::Added)
            .unwrap();

        let err = h.save().unwrap_err();
        assert!(matches!(
            err,
            Error::OrphanedNestedDocument { ref entity_type, ref owner_type, key_values: None }
                if entity_type == "Address" && owner_type == "Customer"
        ));
        assert!(h.store.operations().is_empty());
    }

    #[test]
    fn test_orphan_reports_keys_with_sensitive_logging() {
        let mut h = Harness::with_config(SaveConfig::default().with_sensitive_data_logging(true));
        let order = Arc::clone(&h.order);
        h.tracker
            .track(&order, [("OrderId", json!(10248))], EntityState::Modified)
            .unwrap();

        let err = h.save().unwrap_err();
        assert!(matches!(
            err,
            Error::OrphanedNestedDocument { key_values: Some(ref keys), .. } if keys == "{OrderId: 10248}"
        ));
        assert!(err.to_string().contains("{OrderId: 10248}"));
    }

    #[test]
    fn test_orphan_after_root_keeps_earlier_write() {
        let mut h = Harness::new();
        h.customer("A", EntityState::Added);
        let address = Arc::clone(&h.address);
        h.tracker
            .track(&address, [("City", json!("Berlin"))], EntityState::Added)
            .unwrap();

        assert!(h.save().is_err());
        assert_eq!(h.ops(), vec![(OperationKind::Create, "Customer|A".to_string())]);
    }

    #[test]
    fn test_store_failure_stops_run() {
        let mut h = Harness::new();
        h.seed_customer("A");
        h.customer("A", EntityState::Deleted);
        h.customer("B", EntityState::Added);
        h.customer("C", EntityState::Added);
        h.store.fail_next(OperationKind::Create);

        let err = h.save().unwrap_err();
        assert!(err.is_store());
        // delete before the failure stays applied, nothing after is attempted
        assert_eq!(h.ops(), vec![(OperationKind::Delete, "Customer|A".to_string())]);
        assert!(h.store.get("Customers", "Customer|C").is_none());
    }
}

// ============================================================================
// Async pipeline
// ============================================================================

mod async_pipeline {
    use super::*;

    /// Client that cancels the save after its first successful write
    struct CancelAfterFirstWrite {
        inner: MemoryDocumentStore,
        cancel: CancellationToken,
    }

    impl CancelAfterFirstWrite {
        fn trip(&self, outcome: WriteOutcome) -> Result<WriteOutcome> {
            self.cancel.cancel();
            Ok(outcome)
        }
    }

    #[async_trait]
    impl AsyncDocumentClient for CancelAfterFirstWrite {
        async fn create_item(
            &self,
            collection_id: &str,
            document: &Document,
            cancel: &CancellationToken,
        ) -> Result<WriteOutcome> {
            let outcome =
                AsyncDocumentClient::create_item(&self.inner, collection_id, document, cancel)
                    .await?;
            self.trip(outcome)
        }

        async fn replace_item(
            &self,
            collection_id: &str,
            document_id: &str,
            document: &Document,
            cancel: &CancellationToken,
        ) -> Result<WriteOutcome> {
            let outcome = AsyncDocumentClient::replace_item(
                &self.inner,
                collection_id,
                document_id,
                document,
                cancel,
            )
            .await?;
            self.trip(outcome)
        }

        async fn delete_item(
            &self,
            collection_id: &str,
            document_id: &str,
            cancel: &CancellationToken,
        ) -> Result<WriteOutcome> {
            let outcome =
                AsyncDocumentClient::delete_item(&self.inner, collection_id, document_id, cancel)
                    .await?;
            self.trip(outcome)
        }
    }

    #[tokio::test]
    async fn test_async_added_root_with_owned() {
        let mut h = Harness::new();
        let a = h.customer("ALFKI", EntityState::Added);
        h.order(a, 1, EntityState::Added);

        let cancel = CancellationToken::new();
        let written = h
            .pipeline
            .save_changes_async(&mut h.tracker, &cancel)
            .await
            .unwrap();

        assert_eq!(written, 1);
        let stored = h.store.get("Customers", "Customer|ALFKI").unwrap();
        assert_eq!(stored["Orders"], json!([{ "OrderId": 1, "Total": 10 }]));
    }

    #[tokio::test]
    async fn test_async_promotes_unchanged_root() {
        let mut h = Harness::new();
        h.seed_customer("ALFKI");
        let a = h.customer("ALFKI", EntityState::Unchanged);
        h.order(a, 1, EntityState::Modified);

        let cancel = CancellationToken::new();
        let written = h
            .pipeline
            .save_changes_async(&mut h.tracker, &cancel)
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(h.ops(), vec![(OperationKind::Replace, "Customer|ALFKI".to_string())]);
    }

    #[tokio::test]
    async fn test_async_cancelled_before_start() {
        let mut h = Harness::new();
        h.customer("A", EntityState::Added);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = h.pipeline.save_changes_async(&mut h.tracker, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(h.store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_async_cancel_mid_run_keeps_issued_writes() {
        let model = model();
        let customer = model.entity_type("Customer").unwrap();
        let cancel = CancellationToken::new();
        let client = CancelAfterFirstWrite {
            inner: MemoryDocumentStore::new(),
            cancel: cancel.clone(),
        };
        let pipeline = SavePipeline::new(client, SaveConfig::default());

        let mut tracker = ChangeTracker::new();
        for id in ["A", "B", "C"] {
            tracker
                .track(&customer, [("CustomerId", json!(id))], EntityState::Added)
                .unwrap();
        }

        let result = pipeline.save_changes_async(&mut tracker, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        let store = &pipeline.client().inner;
        assert_eq!(store.len("Customers"), 1);
        assert!(store.get("Customers", "Customer|A").is_some());
    }

    #[tokio::test]
    async fn test_async_orphan_fails() {
        let mut h = Harness::new();
        let order = Arc::clone(&h.order);
        h.tracker
            .track(&order, [("OrderId", json!(1))], EntityState::Added)
            .unwrap();

        let cancel = CancellationToken::new();
        let result = h.pipeline.save_changes_async(&mut h.tracker, &cancel).await;
        assert!(matches!(result, Err(Error::OrphanedNestedDocument { .. })));
    }
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use super::*;

    fn any_state() -> impl Strategy<Value = EntityState> {
        prop_oneof![
            Just(EntityState::Added),
            Just(EntityState::Modified),
            Just(EntityState::Deleted),
            Just(EntityState::Unchanged),
            Just(EntityState::Unmodified),
        ]
    }

    fn change_sets() -> impl Strategy<Value = (Vec<(EntityState, Vec<EntityState>)>, usize)> {
        (
            prop::collection::vec((any_state(), prop::collection::vec(any_state(), 0..4)), 1..6),
            0usize..32,
        )
    }

    proptest! {
        #[test]
        fn each_root_written_at_most_once((roots, rotation) in change_sets()) {
            let mut h = Harness::new();
            let mut root_ids = Vec::new();
            let mut promoted_expected = HashSet::new();

            for (index, (state, children)) in roots.iter().enumerate() {
                let key = format!("C{index}");
                h.seed_customer(&key);
                let root = h.customer(&key, *state);
                root_ids.push((root, key));
                for (child_index, child_state) in children.iter().enumerate() {
                    h.order(root, child_index as i64, *child_state);
                }
                if *state == EntityState::Unchanged
                    && children.iter().any(|s| s.has_pending_write())
                {
                    promoted_expected.insert(root);
                }
            }

            let mut entries = h.tracker.entries_to_save();
            if !entries.is_empty() {
                let shift = rotation % entries.len();
                entries.rotate_left(shift);
            }

            let written = h.save_entries(&entries).unwrap();

            let ops = h.store.operations();
            let mut seen = HashSet::new();
            for op in &ops {
                prop_assert!(seen.insert(op.document_id.clone()), "{} written twice", op.document_id);
            }
            let applied = ops.iter().filter(|op| op.outcome.is_written()).count();
            prop_assert_eq!(written, applied);

            for (root, key) in &root_ids {
                if promoted_expected.contains(root) {
                    prop_assert_eq!(h.tracker.state(*root).unwrap(), EntityState::Modified);
                    let id = format!("Customer|{key}");
                    prop_assert!(ops.iter().any(|op| op.kind == OperationKind::Replace && op.document_id == id));
                }
            }
        }
    }

    #[test]
    fn test_documents_reflect_live_orders_only() {
        let mut h = Harness::new();
        let a = h.customer("A", EntityState::Added);
        h.order(a, 1, EntityState::Added);
        h.order(a, 2, EntityState::Deleted);
        h.order(a, 3, EntityState::Unmodified);

        h.save().unwrap();
        let stored = h.store.get("Customers", "Customer|A").unwrap();
        let ids: Vec<Value> = stored["Orders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["OrderId"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1)]);
    }
}
