//! Volume entities and their component mask

use bitflags::bitflags;

use crate::foundation::math::{Bounds, Transform};
use crate::native::handle::{NativeRef, Owned, Volume};
use crate::native::resources::FormBinding;

slotmap::new_key_type! {
    /// Generational id of a volume entity
    pub struct EntityId;
}

/// A form applied to a region of a volume.
///
/// Weak: the pipeline it names is owned by whoever created it, not by the
/// entity.
pub type FormRef = FormBinding;

bitflags! {
    /// Components an entity carries, used to filter queries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComponentMask: u32 {
        /// Has a native volume; true for every live entity
        const VOLUME = 1 << 0;
        /// Has at least one form
        const FORMS = 1 << 1;
        /// Flagged for destruction at the next flush
        const PENDING_DESTROY = 1 << 2;
    }
}

/// A bounded, transformed volume backed by a native volume handle
#[derive(Debug)]
pub struct VolumeEntity {
    bounds: Bounds,
    transform: Transform,
    forms: Vec<FormRef>,
    volume: Owned<Volume>,
    pending_destroy: bool,
}

impl VolumeEntity {
    pub(crate) fn new(bounds: Bounds, transform: Transform, forms: Vec<FormRef>, volume: Owned<Volume>) -> Self {
        Self {
            bounds,
            transform,
            forms,
            volume,
            pending_destroy: false,
        }
    }

    /// Local-space bounds
    pub const fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// World placement
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Forms in application order
    pub fn forms(&self) -> &[FormRef] {
        &self.forms
    }

    /// Reference to the native volume
    pub const fn volume(&self) -> NativeRef<Volume> {
        self.volume.native_ref()
    }

    /// Whether the entity is waiting for the next flush
    pub const fn is_pending_destroy(&self) -> bool {
        self.pending_destroy
    }

    /// Set the destroy flag; it is never cleared
    pub(crate) fn flag_destroy(&mut self) {
        self.pending_destroy = true;
    }

    /// Components this entity carries
    pub fn components(&self) -> ComponentMask {
        let mut mask = ComponentMask::VOLUME;
        mask.set(ComponentMask::FORMS, !self.forms.is_empty());
        mask.set(ComponentMask::PENDING_DESTROY, self.pending_destroy);
        mask
    }

    /// Give up the native volume for destruction
    pub(crate) fn into_volume(self) -> Owned<Volume> {
        self.volume
    }
}
