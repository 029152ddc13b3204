//! Scene entity store
//!
//! Slotmap of [`VolumeEntity`] values. Readers work from [`EntityQuery`]
//! snapshots taken when a frame is built; the only structural writer is
//! [`SceneStore::apply_deferred`], called from the flush task once every
//! reader of the frame has finished.

use std::sync::Arc;

use slotmap::SlotMap;
use thiserror::Error;

use crate::foundation::math::{Bounds, Transform, Vec3};
use crate::native::handle::{Instance, NativeRef, Volume};
use crate::native::registry::{HandleRegistry, RegistryError};
use crate::scene::commands::DeferredCommand;
use crate::scene::entity::{ComponentMask, EntityId, FormRef, VolumeEntity};

/// Entity creation failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Minimum exceeds maximum on some axis, or a bound is not finite
    #[error("invalid volume bounds {min:?}..{max:?}")]
    InvalidBounds {
        /// Requested minimum
        min: Vec3,
        /// Requested maximum
        max: Vec3,
    },

    /// The native volume could not be created
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One entity as seen by a frame
#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    /// Entity id
    pub id: EntityId,
    /// Native volume, valid until this entity's flush
    pub volume: NativeRef<Volume>,
    /// Forms at snapshot time
    pub forms: Vec<FormRef>,
    /// Destroy flag at snapshot time
    pub pending_destroy: bool,
}

/// Frozen query result.
///
/// Cheap to clone and iterable any number of times. Entities created or
/// removed after the snapshot are not reflected.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    items: Arc<[QueryItem]>,
}

impl EntityQuery {
    /// Iterate the snapshot from the start
    pub fn iter(&self) -> std::slice::Iter<'_, QueryItem> {
        self.items.iter()
    }

    /// Matching ids
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.items.iter().map(|item| item.id)
    }

    /// Items `start..end`, clamped to the snapshot
    pub fn slice(&self, start: usize, end: usize) -> &[QueryItem] {
        let end = end.min(self.items.len());
        &self.items[start.min(end)..end]
    }

    /// Number of matching entities
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a EntityQuery {
    type Item = &'a QueryItem;
    type IntoIter = std::slice::Iter<'a, QueryItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Registry of live volume entities
#[derive(Debug, Default)]
pub struct SceneStore {
    entities: SlotMap<EntityId, VolumeEntity>,
}

impl SceneStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity with a fresh native volume and apply its transform
    pub fn create(
        &mut self,
        registry: &HandleRegistry,
        min: Vec3,
        max: Vec3,
        transform: Transform,
        forms: Vec<FormRef>,
    ) -> Result<EntityId, StoreError> {
        let bounds = Bounds::new(min, max).ok_or(StoreError::InvalidBounds { min, max })?;
        let volume = registry.create_volume(&bounds)?;
        registry.set_volume_transform(volume.native_ref(), &transform);

        let id = self
            .entities
            .insert(VolumeEntity::new(bounds, transform, forms, volume));
        log::debug!("Created volume entity {id:?}");
        Ok(id)
    }

    /// Flag an entity for destruction at the next flush.
    ///
    /// Returns `false` for ids that are not live. No native call is made.
    pub fn mark_for_destroy(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.flag_destroy();
                true
            }
            None => {
                log::warn!("mark_for_destroy on stale entity {id:?}");
                false
            }
        }
    }

    /// Look up a live entity
    pub fn get(&self, id: EntityId) -> Option<&VolumeEntity> {
        self.entities.get(id)
    }

    /// Whether `id` is live
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Snapshot every entity carrying all components in `mask`
    pub fn query(&self, mask: ComponentMask) -> EntityQuery {
        let items: Vec<QueryItem> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.components().contains(mask))
            .map(|(id, entity)| QueryItem {
                id,
                volume: entity.volume(),
                forms: entity.forms().to_vec(),
                pending_destroy: entity.is_pending_destroy(),
            })
            .collect();
        EntityQuery { items: items.into() }
    }

    /// Apply flushed commands. Single writer; no reader may be in flight.
    ///
    /// Returns the number of entities destroyed. Commands naming an entity
    /// that is already gone are skipped.
    pub fn apply_deferred(
        &mut self,
        registry: &HandleRegistry,
        instance: NativeRef<Instance>,
        commands: impl IntoIterator<Item = DeferredCommand>,
    ) -> usize {
        let mut destroyed = 0;
        for command in commands {
            match command {
                DeferredCommand::DestroyEntity(id) => {
                    let Some(entity) = self.entities.remove(id) else {
                        log::warn!("Deferred destroy of stale entity {id:?} skipped");
                        continue;
                    };
                    registry.destroy_volume(instance, entity.into_volume());
                    log::trace!("Destroyed volume entity {id:?}");
                    destroyed += 1;
                }
            }
        }
        destroyed
    }

    /// Destroy every entity; used at shutdown
    pub fn drain_all(&mut self, registry: &HandleRegistry, instance: NativeRef<Instance>) -> usize {
        let count = self.entities.len();
        for (_, entity) in self.entities.drain() {
            registry.destroy_volume(instance, entity.into_volume());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::handle::Owned;
    use crate::native::recording::{CallKind, NativeCall, RecordingRenderer};

    struct Fixture {
        renderer: Arc<RecordingRenderer>,
        registry: HandleRegistry,
        instance: Option<Owned<Instance>>,
        store: SceneStore,
    }

    impl Fixture {
        fn new(renderer: RecordingRenderer) -> Self {
            let renderer = Arc::new(renderer);
            let registry = HandleRegistry::new(renderer.clone());
            let instance = registry.create_instance().unwrap();
            Self {
                renderer,
                registry,
                instance: Some(instance),
                store: SceneStore::new(),
            }
        }

        fn instance(&self) -> NativeRef<Instance> {
            self.instance.as_ref().unwrap().native_ref()
        }

        fn spawn(&mut self) -> EntityId {
            self.store
                .create(
                    &self.registry,
                    Vec3::new(-1.0, -1.0, -1.0),
                    Vec3::new(1.0, 1.0, 1.0),
                    Transform::from_position(Vec3::new(0.0, 5.0, 0.0)),
                    Vec::new(),
                )
                .unwrap()
        }

        fn finish(mut self) -> Arc<RecordingRenderer> {
            let instance = self.instance();
            self.store.drain_all(&self.registry, instance);
            if let Some(instance) = self.instance.take() {
                self.registry.destroy_instance(instance);
            }
            assert!(self.renderer.violations().is_empty(), "{:?}", self.renderer.violations());
            self.renderer
        }
    }

    #[test]
    fn test_create_applies_transform() {
        let mut fixture = Fixture::new(RecordingRenderer::new());
        let id = fixture.spawn();
        assert!(fixture.store.contains(id));
        let moved = fixture.renderer.count(|c| {
            matches!(c, NativeCall::SetVolumeTransform { transform, .. } if transform[(1, 3)] == 5.0)
        });
        assert_eq!(moved, 1);
        fixture.finish();
    }

    #[test]
    fn test_invalid_bounds_create_nothing() {
        let mut fixture = Fixture::new(RecordingRenderer::new());
        let err = fixture
            .store
            .create(&fixture.registry, Vec3::new(1.0, 0.0, 0.0), Vec3::zeros(), Transform::identity(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBounds { .. }));
        assert_eq!(fixture.renderer.count_kind(CallKind::CreateVolume), 0);
        fixture.finish();
    }

    #[test]
    fn test_null_volume_creates_no_entity() {
        let mut fixture = Fixture::new(RecordingRenderer::new().fail_volume_creation());
        let result = fixture
            .store
            .create(&fixture.registry, Vec3::zeros(), Vec3::zeros(), Transform::identity(), Vec::new());
        assert!(matches!(result, Err(StoreError::Registry(RegistryError::NullHandle("volume")))));
        assert!(fixture.store.is_empty());
        fixture.finish();
    }

    #[test]
    fn test_query_is_restartable_snapshot() {
        let mut fixture = Fixture::new(RecordingRenderer::new());
        let a = fixture.spawn();
        let b = fixture.spawn();
        fixture.store.mark_for_destroy(b);

        let all = fixture.store.query(ComponentMask::VOLUME);
        let pending = fixture.store.query(ComponentMask::PENDING_DESTROY);
        let late = fixture.spawn();

        assert_eq!(all.iter().count(), 2);
        assert_eq!(all.iter().count(), 2);
        assert!(!all.ids().any(|id| id == late));
        assert_eq!(pending.ids().collect::<Vec<_>>(), vec![b]);
        assert!(all.iter().any(|item| item.id == a && !item.pending_destroy));
        fixture.finish();
    }

    #[test]
    fn test_mark_for_destroy_makes_no_native_call() {
        let mut fixture = Fixture::new(RecordingRenderer::new());
        let id = fixture.spawn();
        let before = fixture.renderer.calls().len();
        assert!(fixture.store.mark_for_destroy(id));
        assert_eq!(fixture.renderer.calls().len(), before);
        assert!(fixture.store.get(id).unwrap().is_pending_destroy());
        fixture.finish();
    }

    #[test]
    fn test_apply_deferred_skips_stale_ids() {
        let mut fixture = Fixture::new(RecordingRenderer::new());
        let id = fixture.spawn();
        let keep = fixture.spawn();
        let instance = fixture.instance();

        let commands = [DeferredCommand::DestroyEntity(id), DeferredCommand::DestroyEntity(id)];
        let destroyed = fixture.store.apply_deferred(&fixture.registry, instance, commands);

        assert_eq!(destroyed, 1);
        assert!(!fixture.store.contains(id));
        assert!(fixture.store.contains(keep));
        assert!(!fixture.store.mark_for_destroy(id));

        let renderer = fixture.finish();
        assert_eq!(renderer.count_kind(CallKind::DestroyVolume), 2);
    }
}
