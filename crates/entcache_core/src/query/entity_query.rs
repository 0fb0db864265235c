//! Query builder.

use super::Predicate;
use crate::entity::EntityKey;
use crate::error::{CacheError, CacheResult};
use crate::merge::MergeStrategy;
use crate::metadata::{EntityType, MetadataStore};
use crate::value::Value;
use std::collections::BTreeMap;

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Property path.
    pub property: String,
    /// Sort descending.
    pub descending: bool,
}

/// Description of a server query.
///
/// Built fluently:
///
/// ```rust,ignore
/// let query = EntityQuery::from("Orders")
///     .filter(Predicate::gt("Freight", 100))
///     .order_by("OrderDate")
///     .expand("Customer")
///     .take(20);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityQuery {
    /// Resource path to query. Falls back to the entity type's resource.
    pub resource_name: Option<String>,
    /// Entity type of the results, when known up front.
    pub entity_type: Option<String>,
    /// Filter.
    pub predicate: Option<Predicate>,
    /// Sort keys, most significant first.
    pub order_by: Vec<OrderBy>,
    /// Navigation paths to expand (`Orders.OrderDetails`).
    pub expand: Vec<String>,
    /// Rows to skip.
    pub skip: Option<usize>,
    /// Maximum rows to return.
    pub take: Option<usize>,
    /// Ask the server for the total count before paging.
    pub inline_count: bool,
    /// Extra query string parameters.
    pub parameters: BTreeMap<String, String>,
    /// Merge strategy for this query, overriding the manager default.
    pub merge_strategy: Option<MergeStrategy>,
}

impl EntityQuery {
    /// Query against a resource path.
    pub fn from(resource: impl Into<String>) -> Self {
        Self {
            resource_name: Some(resource.into()),
            ..Self::default()
        }
    }

    /// Query against an entity type's default resource.
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Self::default()
        }
    }

    /// Query for the entity with `key`.
    pub fn for_key(entity_type: &EntityType, key: &EntityKey) -> Self {
        let predicate = entity_type
            .key_names
            .iter()
            .zip(key.values())
            .map(|(name, value)| Predicate::eq(name.as_str(), Value::from(value.clone())))
            .reduce(Predicate::and);
        Self {
            resource_name: Some(entity_type.resource_name().to_string()),
            entity_type: Some(entity_type.name.clone()),
            predicate,
            ..Self::default()
        }
    }

    /// Entity type of the results.
    ///
    /// Uses the explicit entity type if set, otherwise the type whose
    /// resource name matches, otherwise a type named like the resource.
    pub fn resolve_type<'m>(&self, metadata: &'m MetadataStore) -> CacheResult<&'m EntityType> {
        if let Some(entity_type) = &self.entity_type {
            return metadata.entity_type(entity_type);
        }
        let resource = self.resource_name.as_deref().ok_or_else(|| {
            CacheError::invalid_operation("query has neither a resource nor a type")
        })?;
        metadata
            .type_for_resource(resource)
            .map_or_else(|| metadata.entity_type(resource), Ok)
    }

    /// Resource path the query is sent to.
    pub fn resource(&self, metadata: &MetadataStore) -> CacheResult<String> {
        match &self.resource_name {
            Some(resource) => Ok(resource.clone()),
            None => Ok(self.resolve_type(metadata)?.resource_name().to_string()),
        }
    }

    /// Sets the result entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Adds a filter, and-ing it with any existing one.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Adds an ascending sort key.
    #[must_use]
    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            property: property.into(),
            descending: false,
        });
        self
    }

    /// Adds a descending sort key.
    #[must_use]
    pub fn order_by_desc(mut self, property: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            property: property.into(),
            descending: true,
        });
        self
    }

    /// Adds an expand path.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path.into());
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = Some(count);
        self
    }

    /// Sets the maximum number of rows.
    #[must_use]
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Requests the total row count.
    #[must_use]
    pub fn with_inline_count(mut self) -> Self {
        self.inline_count = true;
        self
    }

    /// Adds a custom query string parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Overrides the merge strategy for this query.
    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }
}
