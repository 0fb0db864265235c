use super::*;
use crate::change_feed::MergeSource;
use crate::merge::{MergeBatch, MergeStrategy};
use crate::metadata::{DataProperty, DataType};
use crate::query::{EntityQuery, Predicate};
use crate::validation::ValidationKind;
use serde_json::json;

fn metadata() -> Arc<MetadataStore> {
    let store = MetadataStore::new()
        .with_entity_type(
            EntityType::new("Customer")
                .with_key(["CustomerId"])
                .with_resource_name("Customers")
                .with_auto_generated_key(AutoGeneratedKey::Identity)
                .with_data_property(DataProperty::new("CustomerId", DataType::Int32).not_null())
                .with_data_property(
                    DataProperty::new("CompanyName", DataType::String)
                        .not_null()
                        .with_max_length(40),
                )
                .with_data_property(DataProperty::new("City", DataType::String))
                .with_navigation(NavigationProperty::collection("Orders", "Order", "Customer")),
        )
        .unwrap()
        .with_entity_type(
            EntityType::new("Order")
                .with_key(["OrderId"])
                .with_resource_name("Orders")
                .with_auto_generated_key(AutoGeneratedKey::Identity)
                .with_data_property(DataProperty::new("OrderId", DataType::Int32).not_null())
                .with_data_property(DataProperty::new("CustomerId", DataType::Int32))
                .with_data_property(DataProperty::new("Freight", DataType::Decimal))
                .with_navigation(
                    NavigationProperty::scalar("Customer", "Customer", ["CustomerId"])
                        .with_inverse("Orders"),
                )
                .with_navigation(NavigationProperty::collection(
                    "OrderDetails",
                    "OrderDetail",
                    "Order",
                )),
        )
        .unwrap()
        .with_entity_type(
            EntityType::new("OrderDetail")
                .with_key(["OrderId", "ProductId"])
                .with_data_property(DataProperty::new("OrderId", DataType::Int32).not_null())
                .with_data_property(DataProperty::new("ProductId", DataType::Int32).not_null())
                .with_data_property(DataProperty::new("Quantity", DataType::Int32))
                .with_navigation(
                    NavigationProperty::scalar("Order", "Order", ["OrderId"])
                        .with_inverse("OrderDetails"),
                ),
        )
        .unwrap();
    store.validate().unwrap();
    Arc::new(store)
}

fn cache() -> EntityCache {
    EntityCache::new(metadata())
}

fn attach_customer(cache: &mut EntityCache, id: i32, name: &str) -> EntityHandle {
    cache
        .attach_entity(
            "Customer",
            &[("CustomerId", id.into()), ("CompanyName", name.into())],
            EntityState::Unchanged,
        )
        .unwrap()
}

fn attach_order(cache: &mut EntityCache, id: i32, customer: Option<i32>) -> EntityHandle {
    cache
        .attach_entity(
            "Order",
            &[("OrderId", id.into()), ("CustomerId", customer.into())],
            EntityState::Unchanged,
        )
        .unwrap()
}

// --- identity ---

#[test]
fn resolve_returns_attached_handle() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(1)]), Some(handle));
    assert_eq!(
        cache.find_by_key(&EntityKey::single("Customer", 1)),
        Some(handle)
    );
    assert_eq!(cache.entity_state(handle), EntityState::Unchanged);
}

#[test]
fn attaching_a_tracked_key_fails() {
    let mut cache = cache();
    let first = attach_customer(&mut cache, 1, "Alfreds");
    let err = cache
        .attach_entity("Customer", &[("CustomerId", 1.into())], EntityState::Unchanged)
        .unwrap_err();
    assert_eq!(
        err,
        CacheError::DuplicateKey {
            key: EntityKey::single("Customer", 1),
            existing: first
        }
    );
    assert_eq!(cache.len(), 1);
}

#[test]
fn attach_requires_key() {
    let mut cache = cache();
    let err = cache
        .attach_entity("Customer", &[("CompanyName", "x".into())], EntityState::Unchanged)
        .unwrap_err();
    assert!(matches!(err, CacheError::MissingKey { .. }));
}

#[test]
fn attach_rejects_unknown_property_and_type() {
    let mut cache = cache();
    assert!(matches!(
        cache.attach_entity("Customer", &[("Nope", 1.into())], EntityState::Unchanged),
        Err(CacheError::UnknownProperty { .. })
    ));
    assert!(matches!(
        cache.attach_entity("Invoice", &[], EntityState::Unchanged),
        Err(CacheError::UnknownEntityType { .. })
    ));
}

// --- state machine ---

#[test]
fn write_marks_modified_and_snapshots_original_once() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");

    cache.set_value(handle, "CompanyName", "First").unwrap();
    cache.set_value(handle, "CompanyName", "Second").unwrap();

    let entity = cache.entity(handle).unwrap();
    assert_eq!(entity.state(), EntityState::Modified);
    assert_eq!(entity.get("CompanyName"), &Value::from("Second"));
    assert_eq!(entity.original("CompanyName"), &Value::from("Alfreds"));
}

#[test]
fn writing_original_back_stays_modified() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.set_value(handle, "City", "Oslo").unwrap();
    cache.set_value(handle, "City", Value::Null).unwrap();
    assert_eq!(cache.entity_state(handle), EntityState::Modified);
}

#[test]
fn writing_same_value_is_noop() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.set_value(handle, "CompanyName", "Alfreds").unwrap();
    assert_eq!(cache.entity_state(handle), EntityState::Unchanged);
    assert!(!cache.has_changes());
}

#[test]
fn write_checks_type_and_property() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    assert!(matches!(
        cache.set_value(handle, "CompanyName", 5),
        Err(CacheError::TypeMismatch { .. })
    ));
    assert!(matches!(
        cache.set_value(handle, "Missing", 5),
        Err(CacheError::UnknownProperty { .. })
    ));
    assert_eq!(cache.entity_state(handle), EntityState::Unchanged);
}

#[test]
fn integer_written_to_decimal_widens() {
    let mut cache = cache();
    let order = attach_order(&mut cache, 10, None);
    cache.set_value(order, "Freight", 12).unwrap();
    assert_eq!(cache.get_value(order, "Freight").unwrap(), Value::Double(12.0));
}

#[test]
fn deleted_rejects_writes() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.delete_entity(handle).unwrap();
    assert_eq!(cache.entity_state(handle), EntityState::Deleted);

    let err = cache.set_value(handle, "City", "Oslo").unwrap_err();
    assert_eq!(
        err,
        CacheError::invalid_state(handle, EntityState::Deleted, "set City")
    );
}

#[test]
fn key_of_unchanged_entity_is_read_only() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    assert!(matches!(
        cache.set_value(handle, "CustomerId", 2),
        Err(CacheError::InvalidState { .. })
    ));
}

#[test]
fn detached_handle_rejects_everything() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.detach(handle).unwrap();

    assert_eq!(cache.entity_state(handle), EntityState::Detached);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(1)]), None);
    assert!(matches!(
        cache.set_value(handle, "City", "Oslo"),
        Err(CacheError::InvalidState {
            state: EntityState::Detached,
            ..
        })
    ));
    assert!(matches!(
        cache.set_value(EntityHandle::new(99), "City", "Oslo"),
        Err(CacheError::EntityNotFound(_))
    ));
}

#[test]
fn create_assigns_temp_key_and_defaults() {
    let mut cache = cache();
    let first = cache.create_entity("Customer", &[]).unwrap();
    let second = cache.create_entity("Customer", &[]).unwrap();

    assert_eq!(cache.entity_key(first), Some(&EntityKey::single("Customer", -1)));
    assert_eq!(cache.entity_key(second), Some(&EntityKey::single("Customer", -2)));
    assert_eq!(cache.entity_state(first), EntityState::Added);
    assert_eq!(cache.get_value(first, "CompanyName").unwrap(), Value::from(""));
    assert_eq!(cache.get_value(first, "City").unwrap(), Value::Null);
    assert!(cache.entity(first).unwrap().aspect.has_temp_key);
}

#[test]
fn create_without_generated_key_requires_key() {
    let mut cache = cache();
    assert!(matches!(
        cache.create_entity("OrderDetail", &[("OrderId", 1.into())]),
        Err(CacheError::MissingKey { .. })
    ));
    let detail = cache
        .create_entity("OrderDetail", &[("OrderId", 1.into()), ("ProductId", 2.into())])
        .unwrap();
    assert_eq!(
        cache.entity_key(detail),
        Some(&EntityKey::new("OrderDetail", vec![1.into(), 2.into()]))
    );
}

#[test]
fn deleting_added_entity_detaches_it() {
    let mut cache = cache();
    let handle = cache.create_entity("Customer", &[]).unwrap();
    cache.delete_entity(handle).unwrap();
    assert_eq!(cache.entity_state(handle), EntityState::Detached);
    assert!(!cache.has_changes());
    assert!(cache.is_empty());
}

#[test]
fn added_entity_key_can_be_changed() {
    let mut cache = cache();
    let handle = cache.create_entity("Customer", &[]).unwrap();
    cache.set_value(handle, "CustomerId", 500).unwrap();
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(-1)]), None);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(500)]), Some(handle));
    assert_eq!(cache.entity_state(handle), EntityState::Added);
}

// --- change tracker ---

#[test]
fn get_changes_in_insertion_order_and_by_type() {
    let mut cache = cache();
    let c1 = attach_customer(&mut cache, 1, "A");
    let o1 = attach_order(&mut cache, 10, Some(1));
    let c2 = attach_customer(&mut cache, 2, "B");

    cache.set_value(c2, "City", "Bergen").unwrap();
    cache.set_value(o1, "Freight", 1.5).unwrap();
    cache.delete_entity(c1).unwrap();

    assert_eq!(cache.get_changes(None), vec![c1, o1, c2]);
    assert_eq!(cache.get_changes(Some("Customer")), vec![c1, c2]);
    assert!(cache.has_changes());
}

#[test]
fn reject_changes_restores_everything() {
    let mut cache = cache();
    let modified = attach_customer(&mut cache, 1, "Alfreds");
    let deleted = attach_customer(&mut cache, 2, "Berglunds");
    cache.set_value(modified, "CompanyName", "Changed").unwrap();
    cache.set_value(deleted, "City", "Luleå").unwrap();
    cache.delete_entity(deleted).unwrap();
    let added = cache.create_entity("Customer", &[]).unwrap();

    let rejected = cache.reject_changes();
    assert_eq!(rejected, vec![modified, deleted, added]);

    assert_eq!(cache.get_value(modified, "CompanyName").unwrap(), Value::from("Alfreds"));
    assert_eq!(cache.entity_state(modified), EntityState::Unchanged);
    assert_eq!(cache.entity_state(deleted), EntityState::Unchanged);
    assert_eq!(cache.get_value(deleted, "City").unwrap(), Value::Null);
    assert_eq!(cache.entity_state(added), EntityState::Detached);
    assert!(!cache.has_changes());
    assert!(cache.get_changes(None).is_empty());
}

#[test]
fn accept_changes_makes_current_values_clean() {
    let mut cache = cache();
    let modified = attach_customer(&mut cache, 1, "Alfreds");
    let deleted = attach_customer(&mut cache, 2, "Berglunds");
    cache.set_value(modified, "City", "Berlin").unwrap();
    cache.delete_entity(deleted).unwrap();

    cache.accept_changes();
    assert_eq!(cache.entity_state(modified), EntityState::Unchanged);
    assert_eq!(cache.entity(modified).unwrap().original("City"), &Value::from("Berlin"));
    assert_eq!(cache.entity_state(deleted), EntityState::Detached);
    assert!(!cache.has_changes());
}

#[test]
fn change_feed_reports_writes_and_has_changes() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    let rx = cache.subscribe();

    cache.set_value(handle, "City", "Berlin").unwrap();
    let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::PropertyChanged {
                entity: handle,
                property: "City".into(),
                old_value: Value::Null,
                new_value: Value::from("Berlin"),
            },
            ChangeKind::StateChanged {
                entity: handle,
                from: EntityState::Unchanged,
                to: EntityState::Modified,
            },
            ChangeKind::HasChangesChanged { has_changes: true },
        ]
    );

    cache.reject_changes();
    let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&ChangeKind::HasChangesChanged { has_changes: false }));
    assert!(kinds.contains(&ChangeKind::Rejected { entity: handle }));
}

#[test]
fn clear_empties_cache() {
    let mut cache = cache();
    attach_customer(&mut cache, 1, "Alfreds");
    let added = cache.create_entity("Customer", &[]).unwrap();
    cache.clear();
    assert!(cache.is_empty());
    assert!(!cache.has_changes());
    assert_eq!(cache.entity_state(added), EntityState::Detached);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(1)]), None);
}

// --- navigation ---

#[test]
fn setting_parent_adds_child_to_collection() {
    let mut cache = cache();
    let customer = attach_customer(&mut cache, 1, "Alfreds");
    let order = attach_order(&mut cache, 10, None);

    cache.set_navigation(order, "Customer", Some(customer)).unwrap();
    assert_eq!(cache.get_value(order, "CustomerId").unwrap(), Value::Integer(1));
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(customer));
    assert_eq!(cache.get_collection(customer, "Orders").unwrap(), vec![order]);
    assert_eq!(cache.entity_state(order), EntityState::Modified);
}

#[test]
fn foreign_key_write_moves_child_between_collections() {
    let mut cache = cache();
    let first = attach_customer(&mut cache, 1, "A");
    let second = attach_customer(&mut cache, 2, "B");
    let order = attach_order(&mut cache, 10, Some(1));

    assert_eq!(cache.get_collection(first, "Orders").unwrap(), vec![order]);
    cache.set_value(order, "CustomerId", 2).unwrap();
    assert!(cache.get_collection(first, "Orders").unwrap().is_empty());
    assert_eq!(cache.get_collection(second, "Orders").unwrap(), vec![order]);
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(second));
}

#[test]
fn remove_from_collection_nulls_reference() {
    let mut cache = cache();
    let customer = attach_customer(&mut cache, 1, "A");
    let order = attach_order(&mut cache, 10, Some(1));
    let stranger = attach_order(&mut cache, 11, None);

    assert!(matches!(
        cache.remove_from_collection(customer, "Orders", stranger),
        Err(CacheError::InvalidOperation { .. })
    ));

    cache.remove_from_collection(customer, "Orders", order).unwrap();
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), None);
    assert_eq!(cache.get_value(order, "CustomerId").unwrap(), Value::Null);
    assert!(cache.get_collection(customer, "Orders").unwrap().is_empty());
}

#[test]
fn add_to_collection_sets_inverse() {
    let mut cache = cache();
    let customer = attach_customer(&mut cache, 1, "A");
    let order = cache.create_entity("Order", &[]).unwrap();
    cache.add_to_collection(customer, "Orders", order).unwrap();
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(customer));
    assert_eq!(cache.entity_state(order), EntityState::Added);
}

#[test]
fn collection_is_ordered_and_skips_deleted() {
    let mut cache = cache();
    let customer = attach_customer(&mut cache, 1, "A");
    let o1 = attach_order(&mut cache, 10, Some(1));
    let o2 = attach_order(&mut cache, 11, Some(1));
    let o3 = attach_order(&mut cache, 12, Some(1));
    cache.delete_entity(o2).unwrap();
    assert_eq!(cache.get_collection(customer, "Orders").unwrap(), vec![o1, o3]);
}

#[test]
fn children_loaded_before_parent_resolve_on_attach() {
    let mut cache = cache();
    let order = attach_order(&mut cache, 10, Some(7));
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), None);

    let customer = attach_customer(&mut cache, 7, "Late");
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(customer));
    assert_eq!(cache.get_collection(customer, "Orders").unwrap(), vec![order]);
}

#[test]
fn navigation_type_is_checked() {
    let mut cache = cache();
    let order = attach_order(&mut cache, 10, None);
    let other = attach_order(&mut cache, 11, None);
    assert!(matches!(
        cache.set_navigation(order, "Customer", Some(other)),
        Err(CacheError::InvalidOperation { .. })
    ));
    assert!(matches!(
        cache.set_navigation(order, "OrderDetails", None),
        Err(CacheError::InvalidOperation { .. })
    ));
}

#[test]
fn reject_restores_navigation() {
    let mut cache = cache();
    let first = attach_customer(&mut cache, 1, "A");
    let second = attach_customer(&mut cache, 2, "B");
    let order = attach_order(&mut cache, 10, Some(1));
    cache.set_navigation(order, "Customer", Some(second)).unwrap();
    cache.reject_entity_changes(order).unwrap();
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(first));
    assert_eq!(cache.get_collection(first, "Orders").unwrap(), vec![order]);
    assert!(cache.get_collection(second, "Orders").unwrap().is_empty());
}

// --- merge ---

fn merge(
    cache: &mut EntityCache,
    nodes: serde_json::Value,
    strategy: MergeStrategy,
) -> Vec<EntityHandle> {
    let nodes = nodes.as_array().cloned().unwrap();
    let batch = MergeBatch::parse(cache.metadata(), Some("Customer"), &nodes).unwrap();
    cache.merge_batch(&batch, strategy, MergeSource::Query).unwrap()
}

#[test]
fn merge_attaches_new_entities_unchanged() {
    let mut cache = cache();
    let handles = merge(
        &mut cache,
        json!([{ "CustomerId": 1, "CompanyName": "Alfreds",
                 "Orders": [{ "OrderId": 10, "CustomerId": 1 }] }]),
        MergeStrategy::PreserveChanges,
    );
    assert_eq!(handles.len(), 1);
    assert_eq!(cache.len(), 2);
    assert!(!cache.has_changes());
    let orders = cache.get_collection(handles[0], "Orders").unwrap();
    assert_eq!(orders.len(), 1);
}

#[test]
fn merge_returns_same_handle_for_known_key() {
    let mut cache = cache();
    let existing = attach_customer(&mut cache, 1, "Old");
    let handles = merge(
        &mut cache,
        json!([{ "CustomerId": 1, "CompanyName": "New" }]),
        MergeStrategy::PreserveChanges,
    );
    assert_eq!(handles, vec![existing]);
    assert_eq!(cache.get_value(existing, "CompanyName").unwrap(), Value::from("New"));
    assert_eq!(cache.entity_state(existing), EntityState::Unchanged);
}

#[test]
fn preserve_changes_keeps_local_edits() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Old");
    cache.set_value(handle, "CompanyName", "Local").unwrap();
    merge(
        &mut cache,
        json!([{ "CustomerId": 1, "CompanyName": "Server" }]),
        MergeStrategy::PreserveChanges,
    );
    assert_eq!(cache.get_value(handle, "CompanyName").unwrap(), Value::from("Local"));
    assert_eq!(cache.entity_state(handle), EntityState::Modified);
}

#[test]
fn overwrite_changes_takes_server_values() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Old");
    cache.set_value(handle, "CompanyName", "Local").unwrap();
    merge(
        &mut cache,
        json!([{ "CustomerId": 1, "CompanyName": "Server" }]),
        MergeStrategy::OverwriteChanges,
    );
    assert_eq!(cache.get_value(handle, "CompanyName").unwrap(), Value::from("Server"));
    assert_eq!(cache.entity_state(handle), EntityState::Unchanged);
    assert!(!cache.has_changes());
}

#[test]
fn skip_merge_leaves_existing_alone() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Old");
    let handles = merge(
        &mut cache,
        json!([{ "CustomerId": 1, "CompanyName": "Server" }, { "CustomerId": 2 }]),
        MergeStrategy::SkipMerge,
    );
    assert_eq!(handles[0], handle);
    assert_eq!(cache.get_value(handle, "CompanyName").unwrap(), Value::from("Old"));
    assert_eq!(cache.len(), 2);
}

// --- save support ---

#[test]
fn key_mapping_updates_identity_and_foreign_keys() {
    let mut cache = cache();
    let customer = cache.create_entity("Customer", &[("CompanyName", "New".into())]).unwrap();
    let order = cache.create_entity("Order", &[]).unwrap();
    cache.set_navigation(order, "Customer", Some(customer)).unwrap();
    let detail = cache
        .create_entity("OrderDetail", &[("ProductId", 3.into())])
        .unwrap_err();
    assert!(matches!(detail, CacheError::MissingKey { .. }));
    let detail = cache
        .create_entity("OrderDetail", &[("OrderId", (-2).into()), ("ProductId", 3.into())])
        .unwrap();

    cache
        .apply_key_mapping(&EntityKey::single("Customer", -1), &EntityKey::single("Customer", 42))
        .unwrap();
    cache
        .apply_key_mapping(&EntityKey::single("Order", -2), &EntityKey::single("Order", 77))
        .unwrap();

    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(-1)]), None);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(42)]), Some(customer));
    assert_eq!(cache.get_value(customer, "CustomerId").unwrap(), Value::Integer(42));
    assert_eq!(cache.get_value(order, "CustomerId").unwrap(), Value::Integer(42));
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(customer));
    assert_eq!(
        cache.entity_key(detail),
        Some(&EntityKey::new("OrderDetail", vec![77.into(), 3.into()]))
    );
    assert_eq!(cache.get_collection(order, "OrderDetails").unwrap(), vec![detail]);
}

#[test]
fn key_mapping_replaces_a_clean_copy_of_the_saved_row() {
    let mut cache = cache();
    let created = cache
        .create_entity("Customer", &[("CompanyName", "Contoso".into())])
        .unwrap();
    let fetched = attach_customer(&mut cache, 42, "Contoso");
    let order = attach_order(&mut cache, 5, Some(42));
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(fetched));

    let mapped = cache
        .apply_key_mapping(&EntityKey::single("Customer", -1), &EntityKey::single("Customer", 42))
        .unwrap();

    assert_eq!(mapped, Some(created));
    assert_eq!(cache.entity_state(fetched), EntityState::Detached);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(42)]), Some(created));
    assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(created));
    assert_eq!(cache.get_collection(created, "Orders").unwrap(), vec![order]);
}

#[test]
fn key_mapping_keeps_a_dirty_copy_of_the_saved_row() {
    let mut cache = cache();
    let created = cache
        .create_entity("Customer", &[("CompanyName", "Contoso".into())])
        .unwrap();
    let fetched = attach_customer(&mut cache, 42, "Contoso");
    cache.set_value(fetched, "City", "Oslo").unwrap();

    let err = cache
        .apply_key_mapping(&EntityKey::single("Customer", -1), &EntityKey::single("Customer", 42))
        .unwrap_err();

    assert!(matches!(err, CacheError::DuplicateKey { existing, .. } if existing == fetched));
    assert_eq!(cache.entity_state(fetched), EntityState::Modified);
    assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(-1)]), Some(created));
}

#[test]
fn unknown_key_mapping_is_ignored() {
    let mut cache = cache();
    let result = cache
        .apply_key_mapping(&EntityKey::single("Customer", -9), &EntityKey::single("Customer", 9))
        .unwrap();
    assert_eq!(result, None);
}

#[test]
fn complete_save_accepts_and_keeps_later_edits() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.set_value(handle, "CompanyName", "Saved").unwrap();
    let entries = cache.prepare_save(None).unwrap();
    assert_eq!(entries.len(), 1);

    cache.set_value(handle, "City", "Berlin").unwrap();

    let server: BTreeMap<String, Value> = [
        ("CompanyName".to_string(), Value::from("Saved")),
        ("City".to_string(), Value::Null),
    ]
    .into_iter()
    .collect();
    cache.complete_save(&entries[0], Some(&server)).unwrap();

    let entity = cache.entity(handle).unwrap();
    assert_eq!(entity.state(), EntityState::Modified);
    assert_eq!(entity.get("City"), &Value::from("Berlin"));
    assert_eq!(entity.original("City"), &Value::Null);
    assert_eq!(entity.original("CompanyName"), &Value::from("Saved"));
    assert_eq!(cache.get_changes(None), vec![handle]);
}

#[test]
fn complete_save_detaches_deleted() {
    let mut cache = cache();
    let handle = attach_customer(&mut cache, 1, "Alfreds");
    cache.delete_entity(handle).unwrap();
    let entries = cache.prepare_save(None).unwrap();
    cache.complete_save(&entries[0], None).unwrap();
    assert_eq!(cache.entity_state(handle), EntityState::Detached);
    assert!(!cache.has_changes());
}

#[test]
fn prepare_save_skips_clean_entities() {
    let mut cache = cache();
    let clean = attach_customer(&mut cache, 1, "A");
    let dirty = attach_customer(&mut cache, 2, "B");
    cache.set_value(dirty, "City", "X").unwrap();
    let entries = cache.prepare_save(Some(&[dirty, clean])).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].handle, dirty);
    assert_eq!(entries[0].original_values["City"], Value::Null);
}

// --- validation ---

#[test]
fn validate_entity_records_errors() {
    let mut cache = cache();
    let handle = cache.create_entity("Customer", &[]).unwrap();
    assert!(!cache.validate_entity(handle).unwrap());
    let errors = cache.get_validation_errors(handle);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ValidationKind::Required);

    cache.set_value(handle, "CompanyName", "Acme").unwrap();
    assert!(cache.validate_entity(handle).unwrap());
    assert!(cache.get_validation_errors(handle).is_empty());
}

// --- local queries ---

#[test]
fn execute_local_filters_orders_and_pages() {
    let mut cache = cache();
    let c1 = attach_customer(&mut cache, 1, "Alfreds");
    let c2 = attach_customer(&mut cache, 2, "Berglunds");
    let c3 = attach_customer(&mut cache, 3, "Around the Horn");
    cache.set_value(c1, "City", "Berlin").unwrap();
    cache.set_value(c3, "City", "London").unwrap();

    let query = EntityQuery::from("Customers")
        .filter(Predicate::starts_with("CompanyName", "A"))
        .order_by_desc("CompanyName");
    assert_eq!(cache.execute_local(&query).unwrap(), vec![c3, c1]);

    let query = EntityQuery::from("Customers").order_by("CustomerId").skip(1).take(1);
    assert_eq!(cache.execute_local(&query).unwrap(), vec![c2]);
}

#[test]
fn execute_local_orders_nan_last() {
    let mut cache = cache();
    let nan = attach_order(&mut cache, 1, None);
    let high = attach_order(&mut cache, 2, None);
    let unset = attach_order(&mut cache, 3, None);
    let low = attach_order(&mut cache, 4, None);
    cache.set_value(nan, "Freight", Value::Double(f64::NAN)).unwrap();
    cache.set_value(high, "Freight", Value::Double(9.5)).unwrap();
    cache.set_value(low, "Freight", Value::Double(0.5)).unwrap();

    let query = EntityQuery::for_type("Order").order_by("Freight");
    assert_eq!(cache.execute_local(&query).unwrap(), vec![unset, low, high, nan]);
    let query = EntityQuery::for_type("Order").order_by_desc("Freight");
    assert_eq!(cache.execute_local(&query).unwrap(), vec![nan, high, low, unset]);
}

#[test]
fn execute_local_follows_navigation_paths() {
    let mut cache = cache();
    let c1 = attach_customer(&mut cache, 1, "Alfreds");
    cache.set_value(c1, "City", "Berlin").unwrap();
    attach_customer(&mut cache, 2, "Berglunds");
    let o1 = attach_order(&mut cache, 10, Some(1));
    attach_order(&mut cache, 11, Some(2));

    let query = EntityQuery::for_type("Order").filter(Predicate::eq("Customer.City", "Berlin"));
    assert_eq!(cache.execute_local(&query).unwrap(), vec![o1]);
}
