//! Typed wrappers around opaque native handles
//!
//! The native renderer hands out plain integers. On the Rust side every handle
//! is tagged with the kind of resource it names and split in two:
//!
//! - [`Owned<K>`] is move-only. It can only be produced by a factory in
//!   [`crate::native::registry`] and is consumed by the matching destroy call,
//!   so a resource cannot be destroyed twice without the compiler noticing.
//! - [`NativeRef<K>`] is a `Copy` token borrowed from an owner. Parallel tasks
//!   carry these; the frame boundary guarantees the owner outlives them.
//!
//! The null sentinel is `Option::None`.

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU64;

/// Raw opaque handle value as exchanged with the native renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(NonZeroU64);

impl RawHandle {
    /// Wrap a raw value; zero is the native null and yields `None`
    pub const fn new(value: u64) -> Option<Self> {
        match NonZeroU64::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The raw integer value
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Marker trait for the resource kinds the renderer exposes
pub trait HandleKind: 'static {
    /// Human readable kind name used in logs
    const NAME: &'static str;
}

/// Renderer instance
#[derive(Debug)]
pub enum Instance {}

/// Native voxel volume backing a scene entity
#[derive(Debug)]
pub enum Volume {}

/// Native camera
#[derive(Debug)]
pub enum Camera {}

/// Form generator compute pipeline
#[derive(Debug)]
pub enum FormPipeline {}

impl HandleKind for Instance {
    const NAME: &'static str = "instance";
}

impl HandleKind for Volume {
    const NAME: &'static str = "volume";
}

impl HandleKind for Camera {
    const NAME: &'static str = "camera";
}

impl HandleKind for FormPipeline {
    const NAME: &'static str = "form pipeline";
}

/// Copyable, non-owning reference to a native resource
pub struct NativeRef<K: HandleKind> {
    raw: RawHandle,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind> NativeRef<K> {
    /// The raw handle passed across the native boundary
    pub const fn raw(self) -> RawHandle {
        self.raw
    }
}

impl<K: HandleKind> Clone for NativeRef<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: HandleKind> Copy for NativeRef<K> {}

impl<K: HandleKind> PartialEq for NativeRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K: HandleKind> Eq for NativeRef<K> {}

impl<K: HandleKind> fmt::Debug for NativeRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeRef<{}>({})", K::NAME, self.raw)
    }
}

/// Exclusive owner of a native resource.
///
/// Not `Clone`. Dropping an owner without handing it to its destroy call
/// leaks the native resource; this is logged.
pub struct Owned<K: HandleKind> {
    raw: RawHandle,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind> Owned<K> {
    pub(crate) const fn from_raw(raw: RawHandle) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// Borrow a copyable reference for passing to native calls
    pub const fn native_ref(&self) -> NativeRef<K> {
        NativeRef {
            raw: self.raw,
            _kind: PhantomData,
        }
    }

    /// The raw handle value
    pub const fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Give up ownership; only destroy paths call this.
    pub(crate) fn into_raw(self) -> RawHandle {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl<K: HandleKind> Drop for Owned<K> {
    fn drop(&mut self) {
        log::warn!("{} handle {} dropped without being destroyed", K::NAME, self.raw);
    }
}

impl<K: HandleKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({})", K::NAME, self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_null() {
        assert!(RawHandle::new(0).is_none());
        assert_eq!(RawHandle::new(7).map(RawHandle::get), Some(7));
    }

    #[test]
    fn test_refs_share_raw_value() {
        let raw = RawHandle::new(42).unwrap();
        let owned: Owned<Volume> = Owned::from_raw(raw);
        let a = owned.native_ref();
        let b = a;
        assert_eq!(a, b);
        assert_eq!(a.raw(), raw);
        assert_eq!(owned.into_raw(), raw);
    }

    #[test]
    fn test_debug_names_kind() {
        let owned: Owned<Camera> = Owned::from_raw(RawHandle::new(16).unwrap());
        assert_eq!(format!("{:?}", owned.native_ref()), "NativeRef<camera>(0x10)");
        let _ = owned.into_raw();
    }
}
