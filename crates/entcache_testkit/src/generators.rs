//! Property-based test generators using proptest.
//!
//! Provides strategies for server rows and for scripts of local edits
//! against the Northwind catalog.

use entcache_core::{EntityCache, EntityHandle, EntityState, Value};
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};

/// Strategy for company names that pass the catalog's length limit.
pub fn company_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,15}( [A-Z][a-z]{0,10})?").expect("Invalid regex")
}

/// Strategy for optional city names.
pub fn city_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[A-Z][a-z]{2,12}").expect("Invalid regex"))
}

/// Strategy for customer rows with distinct keys `1..=n`.
pub fn customer_rows_strategy(max: usize) -> impl Strategy<Value = Vec<JsonValue>> {
    prop::collection::vec((company_name_strategy(), city_strategy()), 1..=max.max(1)).prop_map(
        |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (name, city))| {
                    json!({
                        "CustomerId": i + 1,
                        "CompanyName": name,
                        "City": city,
                        "RowVersion": 1
                    })
                })
                .collect()
        },
    )
}

/// One local edit against a set of tracked customers.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerEdit {
    /// Renames the customer at this index.
    Rename(usize, String),
    /// Moves the customer at this index.
    Relocate(usize, Option<String>),
    /// Deletes the customer at this index.
    Delete(usize),
    /// Creates a new customer.
    Create(String),
}

/// Strategy for a single edit.
pub fn customer_edit_strategy() -> impl Strategy<Value = CustomerEdit> {
    prop_oneof![
        4 => (any::<usize>(), company_name_strategy())
            .prop_map(|(i, n)| CustomerEdit::Rename(i, n)),
        2 => (any::<usize>(), city_strategy()).prop_map(|(i, c)| CustomerEdit::Relocate(i, c)),
        1 => any::<usize>().prop_map(CustomerEdit::Delete),
        1 => company_name_strategy().prop_map(CustomerEdit::Create),
    ]
}

/// Strategy for a script of edits.
pub fn customer_edits_strategy(max: usize) -> impl Strategy<Value = Vec<CustomerEdit>> {
    prop::collection::vec(customer_edit_strategy(), 0..=max)
}

/// Applies an edit to the cache. Indexes wrap around `handles`; edits
/// aimed at entities that no longer accept writes are skipped.
///
/// Created entities are appended to `handles`.
pub fn apply_customer_edit(
    cache: &mut EntityCache,
    handles: &mut Vec<EntityHandle>,
    edit: &CustomerEdit,
) {
    let pick = |handles: &[EntityHandle], i: usize| {
        (!handles.is_empty()).then(|| handles[i % handles.len()])
    };
    let writable = |cache: &EntityCache, handle: EntityHandle| {
        matches!(
            cache.entity_state(handle),
            EntityState::Unchanged | EntityState::Modified | EntityState::Added
        )
    };

    match edit {
        CustomerEdit::Rename(i, name) => {
            if let Some(handle) = pick(&handles[..], *i).filter(|h| writable(cache, *h)) {
                cache
                    .set_value(handle, "CompanyName", name.as_str())
                    .expect("rename");
            }
        }
        CustomerEdit::Relocate(i, city) => {
            if let Some(handle) = pick(&handles[..], *i).filter(|h| writable(cache, *h)) {
                cache
                    .set_value(handle, "City", Value::from(city.clone()))
                    .expect("relocate");
            }
        }
        CustomerEdit::Delete(i) => {
            if let Some(handle) = pick(&handles[..], *i).filter(|h| writable(cache, *h)) {
                cache.delete_entity(handle).expect("delete");
            }
        }
        CustomerEdit::Create(name) => {
            let handle = cache
                .create_entity("Customer", &[("CompanyName", Value::from(name.as_str()))])
                .expect("create");
            handles.push(handle);
        }
    }
}
