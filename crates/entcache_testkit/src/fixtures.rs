//! Metadata fixtures and manager helpers.
//!
//! The Northwind catalog covers every relationship shape the cache
//! handles: identity keys, a nullable foreign key, a composite key that
//! embeds a foreign key, and a concurrency token.

use crate::service::InMemoryService;
use entcache_client::{ClientConfig, EntityManager};
use entcache_core::{
    AutoGeneratedKey, DataProperty, DataType, EntityType, MetadataStore, NavigationProperty,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Namespace the in-memory service puts in front of type names.
pub const TYPE_NAMESPACE: &str = "Northwind.Models";

/// Customer, Order and OrderDetail.
pub fn northwind_metadata() -> Arc<MetadataStore> {
    let customer = EntityType::new("Customer")
        .with_resource_name("Customers")
        .with_key(["CustomerId"])
        .with_auto_generated_key(AutoGeneratedKey::Identity)
        .with_data_property(DataProperty::new("CustomerId", DataType::Int32).not_null())
        .with_data_property(
            DataProperty::new("CompanyName", DataType::String)
                .not_null()
                .with_max_length(40),
        )
        .with_data_property(DataProperty::new("City", DataType::String).with_max_length(15))
        .with_data_property(
            DataProperty::new("RowVersion", DataType::Int32)
                .not_null()
                .concurrency_token(),
        )
        .with_navigation(NavigationProperty::collection("Orders", "Order", "Customer"));

    let order = EntityType::new("Order")
        .with_resource_name("Orders")
        .with_key(["OrderId"])
        .with_auto_generated_key(AutoGeneratedKey::Identity)
        .with_data_property(DataProperty::new("OrderId", DataType::Int32).not_null())
        .with_data_property(DataProperty::new("CustomerId", DataType::Int32))
        .with_data_property(DataProperty::new("OrderDate", DataType::DateTime))
        .with_data_property(DataProperty::new("Freight", DataType::Decimal))
        .with_navigation(
            NavigationProperty::scalar("Customer", "Customer", ["CustomerId"])
                .with_inverse("Orders"),
        )
        .with_navigation(NavigationProperty::collection("Details", "OrderDetail", "Order"));

    let detail = EntityType::new("OrderDetail")
        .with_resource_name("OrderDetails")
        .with_key(["OrderId", "ProductId"])
        .with_data_property(DataProperty::new("OrderId", DataType::Int32).not_null())
        .with_data_property(DataProperty::new("ProductId", DataType::Int32).not_null())
        .with_data_property(DataProperty::new("Quantity", DataType::Int32).not_null())
        .with_navigation(
            NavigationProperty::scalar("Order", "Order", ["OrderId"]).with_inverse("Details"),
        );

    catalog([customer, order, detail])
}

/// A single TodoItem type with a server-generated key.
pub fn todo_metadata() -> Arc<MetadataStore> {
    let todo = EntityType::new("TodoItem")
        .with_resource_name("Todos")
        .with_key(["Id"])
        .with_auto_generated_key(AutoGeneratedKey::Identity)
        .with_data_property(DataProperty::new("Id", DataType::Int32).not_null())
        .with_data_property(
            DataProperty::new("Description", DataType::String)
                .not_null()
                .with_max_length(30),
        )
        .with_data_property(DataProperty::new("IsDone", DataType::Boolean).not_null())
        .with_data_property(DataProperty::new("CreatedAt", DataType::DateTime));

    catalog([todo])
}

fn catalog(types: impl IntoIterator<Item = EntityType>) -> Arc<MetadataStore> {
    let mut store = MetadataStore::new();
    for entity_type in types {
        store
            .add_entity_type(entity_type)
            .expect("fixture entity type");
    }
    store.validate().expect("fixture catalog is consistent");
    Arc::new(store)
}

/// Seed rows: three customers, three orders and one order line.
pub fn northwind_rows() -> Vec<(&'static str, Vec<JsonValue>)> {
    vec![
        (
            "Customer",
            vec![
                customer(1, "Alfreds Futterkiste", "Berlin"),
                customer(2, "Ana Trujillo", "Mexico"),
                customer(3, "Around the Horn", "London"),
            ],
        ),
        (
            "Order",
            vec![
                order(10, 1, "2024-03-01T00:00:00Z", 12.5),
                order(11, 1, "2024-03-05T00:00:00Z", 3.25),
                order(12, 3, "2024-04-02T00:00:00Z", 40.0),
            ],
        ),
        (
            "OrderDetail",
            vec![json!({ "OrderId": 10, "ProductId": 7, "Quantity": 2 })],
        ),
    ]
}

fn customer(id: i64, name: &str, city: &str) -> JsonValue {
    json!({ "CustomerId": id, "CompanyName": name, "City": city, "RowVersion": 1 })
}

fn order(id: i64, customer: i64, date: &str, freight: f64) -> JsonValue {
    json!({ "OrderId": id, "CustomerId": customer, "OrderDate": date, "Freight": freight })
}

/// An in-memory service holding the Northwind catalog and rows.
pub fn northwind_service() -> Arc<InMemoryService> {
    let service = InMemoryService::new(northwind_metadata());
    for (entity_type, rows) in northwind_rows() {
        service.seed(entity_type, rows);
    }
    Arc::new(service)
}

/// A manager over `service` with its catalog and default configuration.
pub fn manager_for(service: &Arc<InMemoryService>) -> EntityManager<InMemoryService> {
    manager_with_config(service, ClientConfig::new("northwind"))
}

/// A manager over `service` with the given configuration.
pub fn manager_with_config(
    service: &Arc<InMemoryService>,
    config: ClientConfig,
) -> EntityManager<InMemoryService> {
    EntityManager::new(service.metadata(), Arc::clone(service), config)
}
