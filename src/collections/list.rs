use std::marker::PhantomData;
use std::mem;

use bytemuck::{Pod, Zeroable};

use crate::heap::{HeapError, HeapResult, VirtualHeap, VirtualObject};
use crate::memory::{RangeHandle, VirtualAddress};

/// Capacity floor for the first growth, so tiny lists do not reallocate on
/// every push
const MIN_CAPACITY: u32 = 4;

/// A growable typed view over heap storage: the classic amortized-doubling
/// vector, expressed entirely in terms of the heap's allocate/free/copy
/// primitives.
///
/// Like `VirtualArray`, the struct is plain data and can live inside other
/// virtual objects. Callers that reach a list through an object handle must
/// persist the modified struct (for example with `set_object`) after calling
/// a mutating method, since length and capacity live in the struct itself.
#[repr(C)]
#[derive(Debug)]
pub struct VirtualList<T: Pod> {
    len: u32,
    capacity: u32,
    data: RangeHandle,
    _marker: PhantomData<T>,
}

impl<T: Pod> Clone for VirtualList<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Pod> Copy for VirtualList<T> {}

// Safety: repr(C) with only u32-based fields and a zero-sized marker, so the
// layout has no padding for any T. The derive cannot reason about generic
// parameters, hence the manual impls.
unsafe impl<T: Pod> Zeroable for VirtualList<T> {}
unsafe impl<T: Pod> Pod for VirtualList<T> {}

impl<T: Pod> VirtualList<T> {
    /// Describe an empty list that will reserve room for `capacity` elements
    /// when it is created in a heap
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            len: 0,
            capacity,
            data: RangeHandle::null(),
            _marker: PhantomData,
        }
    }

    /// Describe an empty list with no reserved storage
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Number of elements currently stored
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true if the list holds no elements
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current storage can hold
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn element_size() -> u32 {
        mem::size_of::<T>() as u32
    }

    fn address_of(&self, index: u32) -> VirtualAddress {
        self.data
            .address()
            .offset_by(index * Self::element_size())
    }

    fn element_address(&self, index: u32) -> HeapResult<VirtualAddress> {
        if index >= self.len {
            return Err(HeapError::IndexOutOfBounds(index as usize));
        }
        Ok(self.address_of(index))
    }

    /// Read the element at `index`
    pub fn get(&self, heap: &VirtualHeap<'_>, index: u32) -> HeapResult<T> {
        heap.read(self.element_address(index)?)
    }

    /// Overwrite the element at `index`
    pub fn set(&self, heap: &mut VirtualHeap<'_>, index: u32, value: &T) -> HeapResult<()> {
        heap.write(self.element_address(index)?, value)
    }

    /// Append an element, growing the storage if needed
    pub fn push(&mut self, heap: &mut VirtualHeap<'_>, value: &T) -> HeapResult<()> {
        self.reserve_for(heap, self.len + 1)?;
        heap.write(self.address_of(self.len), value)?;
        self.len += 1;
        Ok(())
    }

    /// Insert an element at `index`, shifting the tail up by one.
    /// `index == len` appends.
    pub fn insert(&mut self, heap: &mut VirtualHeap<'_>, index: u32, value: &T) -> HeapResult<()> {
        if index > self.len {
            return Err(HeapError::IndexOutOfBounds(index as usize));
        }
        self.reserve_for(heap, self.len + 1)?;

        let tail = self.len - index;
        if tail > 0 {
            heap.copy(
                self.address_of(index),
                self.address_of(index + 1),
                (tail * Self::element_size()) as usize,
            )?;
        }
        heap.write(self.address_of(index), value)?;
        self.len += 1;
        Ok(())
    }

    /// Remove and return the element at `index`, preserving the order of the
    /// remaining elements with a shifting copy
    pub fn remove(&mut self, heap: &mut VirtualHeap<'_>, index: u32) -> HeapResult<T> {
        let value = self.get(heap, index)?;

        let tail = self.len - index - 1;
        if tail > 0 {
            heap.copy(
                self.address_of(index + 1),
                self.address_of(index),
                (tail * Self::element_size()) as usize,
            )?;
        }
        self.len -= 1;
        Ok(value)
    }

    /// Remove and return the element at `index` in O(1) by moving the last
    /// element into its place. Does not preserve order.
    pub fn swap_remove(&mut self, heap: &mut VirtualHeap<'_>, index: u32) -> HeapResult<T> {
        let value = self.get(heap, index)?;

        let last = self.len - 1;
        if index != last {
            let moved: T = heap.read(self.address_of(last))?;
            heap.write(self.address_of(index), &moved)?;
        }
        self.len -= 1;
        Ok(value)
    }

    /// Forget all elements without releasing the storage
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the backing storage with one sized for `new_capacity`
    /// elements, copying the live prefix across. The capacity can never drop
    /// below the current length.
    pub fn set_capacity(&mut self, heap: &mut VirtualHeap<'_>, new_capacity: u32) -> HeapResult<()> {
        if new_capacity < self.len {
            return Err(HeapError::InvalidArgument(format!(
                "capacity {} is below length {}",
                new_capacity, self.len
            )));
        }
        if new_capacity == self.capacity {
            return Ok(());
        }

        let old_data = self.data;
        let new_data = if new_capacity > 0 {
            heap.allocate_range((new_capacity * Self::element_size()) as usize)?
        } else {
            RangeHandle::null()
        };

        let live = self.len * Self::element_size();
        if live > 0 {
            heap.copy(old_data.address(), new_data.address(), live as usize)?;
        }
        if old_data.is_valid() {
            heap.free(old_data)?;
        }

        self.data = new_data;
        self.capacity = new_capacity;
        Ok(())
    }

    fn reserve_for(&mut self, heap: &mut VirtualHeap<'_>, needed: u32) -> HeapResult<()> {
        if needed <= self.capacity {
            return Ok(());
        }
        let new_capacity = (self.capacity * 2).max(needed).max(MIN_CAPACITY);
        self.set_capacity(heap, new_capacity)
    }
}

impl<T: Pod> Default for VirtualList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod> VirtualObject for VirtualList<T> {
    fn on_create(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        let bytes = self.capacity * Self::element_size();
        if bytes > 0 {
            self.data = heap.allocate_range(bytes as usize)?;
        }
        Ok(())
    }

    fn on_destroy(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        if self.data.is_valid() {
            heap.free(self.data)?;
            self.data = RangeHandle::null();
        }
        self.len = 0;
        self.capacity = 0;
        Ok(())
    }
}
