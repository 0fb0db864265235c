//! Merging server payloads into the cache.

use super::EntityCache;
use crate::change_feed::{ChangeKind, MergeSource};
use crate::entity::EntityState;
use crate::error::CacheResult;
use crate::merge::{EntitySnapshot, MergeBatch, MergeStrategy};
use crate::metadata::EntityType;
use crate::types::EntityHandle;
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

impl EntityCache {
    /// Merges a parsed payload and returns the handles of its top-level
    /// entities, in payload order.
    ///
    /// Keys not yet tracked are attached as Unchanged. Existing entities
    /// are updated according to `strategy`.
    pub fn merge_batch(
        &mut self,
        batch: &MergeBatch,
        strategy: MergeStrategy,
        source: MergeSource,
    ) -> CacheResult<Vec<EntityHandle>> {
        let metadata = Arc::clone(&self.metadata);
        let mut handles = Vec::with_capacity(batch.len());
        for snapshot in batch.snapshots() {
            let entity_type = metadata.entity_type(&snapshot.entity_type)?;
            let handle = match self.identity.get(&snapshot.key) {
                Some(handle) => {
                    self.merge_existing(handle, entity_type, snapshot, strategy, source);
                    handle
                }
                None => {
                    let mut values = snapshot.values.clone();
                    for property in &entity_type.data_properties {
                        values.entry(property.name.clone()).or_insert(Value::Null);
                    }
                    self.insert_entity(
                        entity_type,
                        snapshot.key.clone(),
                        values,
                        EntityState::Unchanged,
                        false,
                    )?
                }
            };
            handles.push(handle);
        }
        debug!(
            "Merged {} entities ({} top-level) with {strategy:?}",
            batch.len(),
            batch.root_indexes().len()
        );
        Ok(batch.root_indexes().iter().map(|i| handles[*i]).collect())
    }

    fn merge_existing(
        &mut self,
        handle: EntityHandle,
        entity_type: &EntityType,
        snapshot: &EntitySnapshot,
        strategy: MergeStrategy,
        source: MergeSource,
    ) {
        let state = self.entity_state(handle);
        let overwrite = match strategy {
            MergeStrategy::SkipMerge => false,
            MergeStrategy::PreserveChanges => state == EntityState::Unchanged,
            MergeStrategy::OverwriteChanges => true,
        };
        if !overwrite {
            return;
        }

        for (property, value) in &snapshot.values {
            if entity_type.is_key_property(property) {
                continue;
            }
            self.write_raw(handle, entity_type, property, value.clone());
        }
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.aspect.reset_tracking();
            entity.aspect.has_temp_key = false;
        }
        self.transition(handle, EntityState::Unchanged);
        self.feed.emit(ChangeKind::Merged {
            entity: handle,
            source,
        });
    }
}
