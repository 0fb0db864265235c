//! Wire-level properties of query and save payloads.

use entcache_core::{
    DataProperty, DataType, EntityQuery, EntityType, MetadataStore, Predicate, Value,
};
use entcache_protocol::{format_literal, QueryRequest, SaveResponse, ServerErrorPayload};
use proptest::prelude::*;
use serde_json::json;

fn metadata() -> MetadataStore {
    MetadataStore::new()
        .with_entity_type(
            EntityType::new("Product")
                .with_resource_name("Products")
                .with_key(["ProductId"])
                .with_data_property(DataProperty::new("ProductId", DataType::Int32))
                .with_data_property(DataProperty::new("Name", DataType::String)),
        )
        .unwrap()
}

proptest! {
    #[test]
    fn text_literals_unescape_to_the_original(text in ".*") {
        let literal = format_literal(&Value::Text(text.clone()), Some(DataType::String));
        prop_assert!(literal.starts_with('\'') && literal.ends_with('\''));
        let inner = &literal[1..literal.len() - 1];
        prop_assert_eq!(inner.replace("''", "'"), text);
    }

    #[test]
    fn query_strings_stay_url_safe(name in "[ -~]{0,24}", skip in 0usize..1000) {
        let query = EntityQuery::from("Products")
            .filter(Predicate::eq("Name", name.as_str()))
            .skip(skip)
            .with_parameter("tag", name.as_str());
        let request = QueryRequest::from_query(&query, &metadata()).unwrap();
        let parts: Vec<&str> = request.query_string.split('&').collect();
        prop_assert_eq!(parts.len(), 3);
        for part in parts {
            prop_assert_eq!(part.matches('=').count(), 1);
            prop_assert!(!part.contains(' '));
        }
    }
}

#[test]
fn empty_save_response_defaults() {
    let response = SaveResponse::from_json(&json!({})).unwrap();
    assert!(response.entities.is_empty());
    assert!(response.key_mappings.is_empty());
}

#[test]
fn error_payload_serializes_compactly() {
    let body = ServerErrorPayload::message("boom").to_json().unwrap();
    assert_eq!(body, json!({ "message": "boom", "entityErrors": [] }));
}
