use std::marker::PhantomData;
use std::mem;

use bytemuck::{Pod, Zeroable};

use crate::heap::{HeapError, HeapResult, VirtualHeap, VirtualObject};
use crate::memory::{RangeHandle, VirtualAddress};

/// A fixed-length typed view over a contiguous region of the heap.
///
/// The struct itself is plain data: it can be stored as a field of another
/// virtual object and read back later. It never touches the buffer directly;
/// every element access goes through the heap, which resolves addresses
/// against the buffer's current location.
///
/// Storage is reserved by `on_create` and released by `on_destroy`, so an
/// array is only usable between those two hook invocations.
#[repr(C)]
#[derive(Debug)]
pub struct VirtualArray<T: Pod> {
    len: u32,
    data: RangeHandle,
    _marker: PhantomData<T>,
}

impl<T: Pod> Clone for VirtualArray<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Pod> Copy for VirtualArray<T> {}

// Safety: repr(C) with only u32-based fields and a zero-sized marker, so the
// layout has no padding for any T. The derive cannot reason about generic
// parameters, hence the manual impls.
unsafe impl<T: Pod> Zeroable for VirtualArray<T> {}
unsafe impl<T: Pod> Pod for VirtualArray<T> {}

impl<T: Pod> VirtualArray<T> {
    /// Describe an array of `len` elements. The backing storage is reserved
    /// when the array is created in a heap.
    pub fn new(len: u32) -> Self {
        Self {
            len,
            data: RangeHandle::null(),
            _marker: PhantomData,
        }
    }

    /// Number of elements
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true if the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn element_size() -> u32 {
        mem::size_of::<T>() as u32
    }

    fn element_address(&self, index: u32) -> HeapResult<VirtualAddress> {
        if index >= self.len {
            return Err(HeapError::IndexOutOfBounds(index as usize));
        }
        Ok(self
            .data
            .address()
            .offset_by(index * Self::element_size()))
    }

    /// Read the element at `index`
    pub fn get(&self, heap: &VirtualHeap<'_>, index: u32) -> HeapResult<T> {
        heap.read(self.element_address(index)?)
    }

    /// Overwrite the element at `index`
    pub fn set(&self, heap: &mut VirtualHeap<'_>, index: u32, value: &T) -> HeapResult<()> {
        heap.write(self.element_address(index)?, value)
    }

    /// Change the array's length.
    ///
    /// The heap has no realloc primitive, so this allocates a new block,
    /// copies the overlapping prefix, and frees the old block.
    pub fn resize(&mut self, heap: &mut VirtualHeap<'_>, new_len: u32) -> HeapResult<()> {
        if new_len == self.len {
            return Ok(());
        }

        let old_data = self.data;
        let new_data = if new_len > 0 {
            heap.allocate_range((new_len * Self::element_size()) as usize)?
        } else {
            RangeHandle::null()
        };

        let overlap = self.len.min(new_len) * Self::element_size();
        if overlap > 0 {
            heap.copy(old_data.address(), new_data.address(), overlap as usize)?;
        }
        if old_data.is_valid() {
            heap.free(old_data)?;
        }

        self.data = new_data;
        self.len = new_len;
        Ok(())
    }
}

impl<T: Pod> VirtualObject for VirtualArray<T> {
    fn on_create(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        let bytes = self.len * Self::element_size();
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::GrowableBuffer;

    fn heap_with(buffer: &mut GrowableBuffer) -> VirtualHeap<'_> {
        VirtualHeap::attach(buffer).unwrap()
    }

    fn create_array<T: Pod>(heap: &mut VirtualHeap<'_>, len: u32) -> VirtualArray<T> {
        let mut array = VirtualArray::new(len);
        array.on_create(heap).unwrap();
        array
    }

    #[test]
    fn test_new_array_reads_back_zeroed() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let array = create_array::<u64>(&mut heap, 4);
        assert_eq!(array.len(), 4);
        for index in 0..4 {
            // Allocations come from zero-filled space
            assert_eq!(array.get(&heap, index).unwrap(), 0);
        }
    }

    #[test]
    fn test_set_and_get_elements() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let array = create_array::<u32>(&mut heap, 3);
        array.set(&mut heap, 0, &10).unwrap();
        array.set(&mut heap, 1, &20).unwrap();
        array.set(&mut heap, 2, &30).unwrap();

        assert_eq!(array.get(&heap, 0).unwrap(), 10);
        assert_eq!(array.get(&heap, 1).unwrap(), 20);
        assert_eq!(array.get(&heap, 2).unwrap(), 30);
    }

    #[test]
    fn test_out_of_range_access_is_reported() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let array = create_array::<u32>(&mut heap, 2);
        match array.get(&heap, 2) {
            Err(HeapError::IndexOutOfBounds(2)) => {}
            other => panic!("Expected IndexOutOfBounds, got {:?}", other),
        }
        assert!(array.set(&mut heap, 5, &1).is_err());
    }

    #[test]
    fn test_resize_grow_preserves_prefix() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut array = create_array::<u32>(&mut heap, 2);
        array.set(&mut heap, 0, &7).unwrap();
        array.set(&mut heap, 1, &8).unwrap();

        array.resize(&mut heap, 5).unwrap();
        assert_eq!(array.len(), 5);
        assert_eq!(array.get(&heap, 0).unwrap(), 7);
        assert_eq!(array.get(&heap, 1).unwrap(), 8);
        // New elements come from zeroed space
        assert_eq!(array.get(&heap, 4).unwrap(), 0);
    }

    #[test]
    fn test_resize_shrink_keeps_remaining_elements() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut array = create_array::<u32>(&mut heap, 4);
        for index in 0..4 {
            array.set(&mut heap, index, &(index * 100)).unwrap();
        }

        array.resize(&mut heap, 2).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(&heap, 0).unwrap(), 0);
        assert_eq!(array.get(&heap, 1).unwrap(), 100);
        assert!(array.get(&heap, 2).is_err());
    }

    #[test]
    fn test_resize_to_zero_releases_storage() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);
        let baseline = heap.free_bytes();

        let mut array = create_array::<u64>(&mut heap, 8);
        assert!(heap.free_bytes() < baseline);

        array.resize(&mut heap, 0).unwrap();
        assert!(array.is_empty());
        assert_eq!(heap.free_bytes(), baseline);
    }

    #[test]
    fn test_destroy_releases_storage() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);
        let baseline = heap.free_bytes();

        let mut array = create_array::<u32>(&mut heap, 16);
        array.on_destroy(&mut heap).unwrap();
        assert_eq!(heap.free_bytes(), baseline);
        assert_eq!(array.len(), 0);
    }

    #[test]
    fn test_array_nested_in_virtual_object() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);
        let baseline = heap.free_bytes();

        let handle = heap.create_object(VirtualArray::<u32>::new(4)).unwrap();

        // The creation hook reserved the backing storage
        let array = heap.get_object(&handle).unwrap();
        array.set(&mut heap, 3, &99).unwrap();
        assert_eq!(array.get(&heap, 3).unwrap(), 99);

        assert!(heap.destroy_object(&handle).unwrap());
        assert_eq!(heap.free_bytes(), baseline);
    }
}
