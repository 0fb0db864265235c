//! Evaluating queries against the cache only.

use super::EntityCache;
use crate::entity::{EntityState, TrackedEntity};
use crate::error::CacheResult;
use crate::query::EntityQuery;
use crate::types::EntityHandle;
use crate::value::Value;
use std::cmp::Ordering;

impl EntityCache {
    /// Runs a query over tracked entities without contacting a server.
    ///
    /// Deleted entities are excluded. Filter, ordering and paging follow
    /// the same rules a server applies; `expand` is ignored because
    /// navigations resolve from the cache anyway.
    pub fn execute_local(&self, query: &EntityQuery) -> CacheResult<Vec<EntityHandle>> {
        let entity_type = query.resolve_type(&self.metadata)?;
        let mut matches: Vec<&TrackedEntity> = self
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type.name && e.state() != EntityState::Deleted)
            .filter(|e| {
                query.predicate.as_ref().map_or(true, |predicate| {
                    predicate.evaluate(&|path: &str| self.property_path_value(e.handle, path))
                })
            })
            .collect();

        if !query.order_by.is_empty() {
            matches.sort_by(|a, b| {
                query.order_by.iter().fold(Ordering::Equal, |acc, order| {
                    acc.then_with(|| {
                        let left = self.property_path_value(a.handle, &order.property);
                        let right = self.property_path_value(b.handle, &order.property);
                        let ord = left.sort_cmp(&right);
                        if order.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                })
            });
        }

        Ok(matches
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.take.unwrap_or(usize::MAX))
            .map(|e| e.handle)
            .collect())
    }

    /// Reads a dotted property path (`Customer.City`), following scalar
    /// navigations. Unresolvable paths read as null.
    pub fn property_path_value(&self, handle: EntityHandle, path: &str) -> Value {
        let mut current = handle;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                return self
                    .entities
                    .get(&current)
                    .map(|e| e.get(segment).clone())
                    .unwrap_or(Value::Null);
            }
            match self.get_navigation(current, segment) {
                Ok(Some(next)) => current = next,
                _ => return Value::Null,
            }
        }
        Value::Null
    }
}
