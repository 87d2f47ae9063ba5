use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::heap::{HeapResult, VirtualHeap};
use crate::memory::VirtualAddress;

/// Bytes of the liveness tag written immediately before an object's payload.
/// The tag is the object's id; a zeroed tag means "no live object here",
/// which `free` guarantees by zero-filling.
pub const OBJECT_HEADER_SIZE: u32 = 8;

/// The contract a type must satisfy to live in the heap as a virtual object.
///
/// Both hooks receive the heap so an object can reserve and release nested
/// storage of its own; a list reserves its backing region in `on_create` and
/// frees it in `on_destroy`. The default implementations do nothing, so any
/// plain `Pod` value can opt in with an empty `impl`.
pub trait VirtualObject: Pod {
    /// Called once after the object's region has been allocated
    fn on_create(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        let _ = heap;
        Ok(())
    }

    /// Called once before the object's region is freed
    fn on_destroy(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        let _ = heap;
        Ok(())
    }
}

/// An externally held reference to a virtual object.
///
/// Pairs the object's id with its address. The handle is live only while the
/// id stored at the address still matches; once the object is destroyed the
/// zeroed (or reused) tag can never match again, so stale handles are
/// detected instead of aliasing whatever now occupies the memory.
pub struct ObjectHandle<T> {
    id: u64,
    address: VirtualAddress,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectHandle<T> {
    pub(crate) fn new(id: u64, address: VirtualAddress) -> Self {
        Self {
            id,
            address,
            _marker: PhantomData,
        }
    }

    /// The object id this handle was issued for
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The address of the object's header tag
    pub fn address(&self) -> VirtualAddress {
        self.address
    }
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectHandle<T> {}

impl<T> PartialEq for ObjectHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}

impl<T> Eq for ObjectHandle<T> {}

impl<T> fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle(id={}, {})", self.id, self.address)
    }
}
