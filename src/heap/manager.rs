use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::Pod;

use crate::buffer::ByteStore;
use crate::heap::header::{self, HeapHeader, FREE_ENTRY_SIZE, HEADER_SIZE};
use crate::heap::{HeapConfig, HeapError, HeapResult, ObjectHandle, VirtualObject, OBJECT_HEADER_SIZE};
use crate::memory::{FreeRange, RangeHandle, VirtualAddress};

/// The allocator that manages a single relocatable byte buffer.
///
/// The heap's own state is stored inside the buffer it manages: a serialized
/// header at offset 0 and the free-list entry storage in a region allocated
/// from the heap itself. `attach` deserializes that state, every mutating
/// operation writes it back before returning, so the buffer alone is always
/// enough to reattach later.
///
/// While a `VirtualHeap` is attached it holds the only mutable borrow of the
/// store, so nothing else can observe the buffer mid-operation or keep a
/// reference into it across a resize. All cross-call references are
/// `VirtualAddress` offsets, resolved at the point of use.
pub struct VirtualHeap<'buf> {
    store: &'buf mut dyn ByteStore,
    object_id_counter: u64,
    free_list: RangeHandle,
    free_ranges: Vec<FreeRange>,
}

impl<'buf> VirtualHeap<'buf> {
    /// Attach to a buffer with default configuration
    pub fn attach(store: &'buf mut dyn ByteStore) -> HeapResult<Self> {
        Self::attach_with_config(store, &HeapConfig::default())
    }

    /// Attach to a buffer, bootstrapping it with `config` if it is fresh.
    ///
    /// A buffer whose header magic is zero is treated as brand new and
    /// initialized; a buffer carrying a valid header is deserialized and
    /// structurally validated; anything else is rejected.
    pub fn attach_with_config(
        store: &'buf mut dyn ByteStore,
        config: &HeapConfig,
    ) -> HeapResult<Self> {
        match header::read_header(store.bytes())? {
            Some(head) => Self::reattach(store, head),
            None => Self::bootstrap(store, config),
        }
    }

    fn bootstrap(store: &'buf mut dyn ByteStore, config: &HeapConfig) -> HeapResult<Self> {
        let entry_capacity = config.initial_free_capacity.max(2);
        let storage_size = entry_capacity * FREE_ENTRY_SIZE;
        let pool_start = HEADER_SIZE + storage_size;
        let needed = pool_start + config.initial_pool_size;
        if needed > u32::MAX as usize {
            return Err(HeapError::InvalidArgument(format!(
                "initial layout of {} bytes exceeds the addressable size",
                needed
            )));
        }
        if store.len() < needed {
            store.resize(needed);
        }

        let free_list = RangeHandle::new(
            VirtualAddress::new(HEADER_SIZE as u32),
            storage_size as u32,
        );
        let mut free_ranges = Vec::new();
        if store.len() > pool_start {
            free_ranges.push(FreeRange::new(pool_start as u32, store.len() as u32));
        }

        let mut heap = Self {
            store,
            object_id_counter: 0,
            free_list,
            free_ranges,
        };
        heap.flush()?;
        Ok(heap)
    }

    fn reattach(store: &'buf mut dyn ByteStore, head: HeapHeader) -> HeapResult<Self> {
        let free_ranges =
            header::read_entries(store.bytes(), head.free_list.address(), head.free_len)?;
        header::validate_ranges(&free_ranges, store.len())?;

        // A free range claiming bytes of the entry storage region means the
        // bookkeeping is corrupt: that region is allocated, never free.
        let storage_start = head.free_list.address().offset() as u32;
        let storage_end = storage_start + head.free_list.size();
        for range in &free_ranges {
            if range.start() < storage_end && storage_start < range.end() {
                return Err(HeapError::InvalidHeader(format!(
                    "free range {:?} overlaps the free-list storage",
                    range
                )));
            }
        }

        Ok(Self {
            store,
            object_id_counter: head.object_id_counter,
            free_list: head.free_list,
            free_ranges,
        })
    }

    // ---- allocation -----------------------------------------------------

    /// Allocate `size` bytes and return the region's start address.
    ///
    /// First-fit: the free list is scanned in address order and the first
    /// range large enough is carved from its front. When nothing fits, the
    /// buffer grows by at least its current length.
    pub fn allocate(&mut self, size: usize) -> HeapResult<VirtualAddress> {
        Ok(self.allocate_range(size)?.address())
    }

    /// Allocate `size` bytes and return a handle carrying the size, so the
    /// caller can free later without recomputing it
    pub fn allocate_range(&mut self, size: usize) -> HeapResult<RangeHandle> {
        if size == 0 {
            return Err(HeapError::InvalidArgument(
                "allocation size must be positive".to_string(),
            ));
        }
        if size > u32::MAX as usize {
            return Err(HeapError::InvalidArgument(format!(
                "allocation of {} bytes exceeds the addressable size",
                size
            )));
        }
        let address = self.allocate_inner(size as u32)?;
        self.flush()?;
        Ok(RangeHandle::new(address, size as u32))
    }

    fn allocate_inner(&mut self, size: u32) -> HeapResult<VirtualAddress> {
        let index = match self
            .free_ranges
            .iter()
            .position(|range| range.available_size() >= size)
        {
            Some(index) => index,
            None => self.grow_for(size)?,
        };

        let address = VirtualAddress::new(self.free_ranges[index].start());
        self.free_ranges[index].carve_front(size);
        if self.free_ranges[index].is_empty() {
            self.free_ranges.remove(index);
        }
        Ok(address)
    }

    /// Grow the buffer until a range of at least `size` bytes exists,
    /// returning that range's index
    fn grow_for(&mut self, size: u32) -> HeapResult<usize> {
        let old_len = self.store.len();
        let grow_by = old_len.max(size as usize);
        let new_len = old_len + grow_by;
        if new_len > u32::MAX as usize {
            return Err(HeapError::InvalidArgument(format!(
                "buffer growth to {} bytes exceeds the addressable size",
                new_len
            )));
        }
        self.store.resize(new_len);

        match self.free_ranges.last_mut() {
            // The grown region continues the current last range
            Some(last) if last.end() as usize == old_len => {
                *last = FreeRange::new(last.start(), new_len as u32);
            }
            _ => self
                .free_ranges
                .push(FreeRange::new(old_len as u32, new_len as u32)),
        }
        Ok(self.free_ranges.len() - 1)
    }

    // ---- deallocation ---------------------------------------------------

    /// Free the region described by `handle`
    pub fn free(&mut self, handle: RangeHandle) -> HeapResult<()> {
        self.free_raw(handle.address(), handle.size() as usize)
    }

    /// Free `size` bytes starting at `address`.
    ///
    /// The region is zero-filled before it is returned to the free list.
    /// That zeroing is a hard contract, not hygiene: it is what invalidates
    /// any object header living in the region, so stale handles can never
    /// match again.
    pub fn free_raw(&mut self, address: VirtualAddress, size: usize) -> HeapResult<()> {
        self.free_inner(address, size)?;
        self.flush()
    }

    fn free_inner(&mut self, address: VirtualAddress, size: usize) -> HeapResult<()> {
        if !address.is_valid() || size == 0 {
            return Err(HeapError::InvalidFree(format!(
                "cannot free {} bytes at {}",
                size, address
            )));
        }
        let start = address.offset();
        let end = start + size;
        if start < HEADER_SIZE {
            return Err(HeapError::InvalidFree(format!(
                "range {}..{} overlaps the heap header",
                start, end
            )));
        }
        if end > self.store.len() {
            return Err(HeapError::InvalidFree(format!(
                "range {}..{} exceeds buffer length {}",
                start,
                end,
                self.store.len()
            )));
        }

        let freed = FreeRange::new(start as u32, end as u32);
        let index = self
            .free_ranges
            .partition_point(|range| range.start() < freed.start());
        if index > 0 && self.free_ranges[index - 1].overlaps(&freed) {
            return Err(HeapError::InvalidFree(format!(
                "range {}..{} overlaps an existing free range",
                start, end
            )));
        }
        if index < self.free_ranges.len() && freed.overlaps(&self.free_ranges[index]) {
            return Err(HeapError::InvalidFree(format!(
                "range {}..{} overlaps an existing free range",
                start, end
            )));
        }

        self.store.bytes_mut()[start..end].fill(0);

        let merges_prev = index > 0 && self.free_ranges[index - 1].is_followed_by(&freed);
        let merges_next =
            index < self.free_ranges.len() && freed.is_followed_by(&self.free_ranges[index]);
        match (merges_prev, merges_next) {
            (true, true) => {
                let merged = FreeRange::new(
                    self.free_ranges[index - 1].start(),
                    self.free_ranges[index].end(),
                );
                self.free_ranges[index - 1] = merged;
                self.free_ranges.remove(index);
            }
            (true, false) => {
                self.free_ranges[index - 1] =
                    FreeRange::new(self.free_ranges[index - 1].start(), freed.end());
            }
            (false, true) => {
                self.free_ranges[index] =
                    FreeRange::new(freed.start(), self.free_ranges[index].end());
            }
            (false, false) => {
                self.free_ranges.insert(index, freed);
            }
        }
        Ok(())
    }

    // ---- raw access -----------------------------------------------------

    /// Read a value at `address`, resolving the address against the current
    /// buffer at the point of use
    pub fn read<T: Pod>(&self, address: VirtualAddress) -> HeapResult<T> {
        let bytes = self.span(address, mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Write a value at `address`
    pub fn write<T: Pod>(&mut self, address: VirtualAddress, value: &T) -> HeapResult<()> {
        self.write_bytes(address, bytemuck::bytes_of(value))
    }

    /// Borrow `len` raw bytes starting at `address`.
    ///
    /// The borrow is tied to the heap, so it cannot outlive any operation
    /// that could move the buffer.
    pub fn read_bytes(&self, address: VirtualAddress, len: usize) -> HeapResult<&[u8]> {
        self.span(address, len)
    }

    /// Overwrite raw bytes starting at `address`
    pub fn write_bytes(&mut self, address: VirtualAddress, bytes: &[u8]) -> HeapResult<()> {
        let start = self.check_span(address, bytes.len())?;
        self.store.bytes_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst` inside the buffer. The regions
    /// may overlap.
    pub fn copy(
        &mut self,
        src: VirtualAddress,
        dst: VirtualAddress,
        len: usize,
    ) -> HeapResult<()> {
        if len == 0 {
            return Ok(());
        }
        let src_start = self.check_span(src, len)?;
        let dst_start = self.check_span(dst, len)?;
        self.store
            .bytes_mut()
            .copy_within(src_start..src_start + len, dst_start);
        Ok(())
    }

    fn span(&self, address: VirtualAddress, len: usize) -> HeapResult<&[u8]> {
        let start = self.check_span(address, len)?;
        Ok(&self.store.bytes()[start..start + len])
    }

    fn check_span(&self, address: VirtualAddress, len: usize) -> HeapResult<usize> {
        if !address.is_valid() {
            return Err(HeapError::OutOfBounds(format!(
                "invalid address {}",
                address
            )));
        }
        let start = address.offset();
        let end = start + len;
        if end > self.store.len() {
            return Err(HeapError::OutOfBounds(format!(
                "range {}..{} exceeds buffer length {}",
                start,
                end,
                self.store.len()
            )));
        }
        Ok(start)
    }

    // ---- object lifecycle -----------------------------------------------

    /// Allocate a virtual object: header tag plus payload. Assigns the next
    /// monotonically increasing id, runs the value's `on_create` hook (which
    /// may itself allocate), persists the payload and returns the handle.
    pub fn create_object<T: VirtualObject>(&mut self, value: T) -> HeapResult<ObjectHandle<T>> {
        let payload_size = mem::size_of::<T>();
        let region = self.allocate_range(OBJECT_HEADER_SIZE as usize + payload_size)?;

        self.object_id_counter += 1;
        let id = self.object_id_counter;
        self.write_object_id(region.address(), id)?;

        let mut value = value;
        if let Err(err) = value.on_create(self) {
            // Unwind the half-created object so the region does not leak
            let _ = self.free_raw(region.address(), region.size() as usize);
            return Err(err);
        }
        self.write(region.address().offset_by(OBJECT_HEADER_SIZE), &value)?;
        self.flush()?;
        Ok(ObjectHandle::new(id, region.address()))
    }

    /// Destroy the object behind `handle`, running its `on_destroy` hook
    /// before the region is freed.
    ///
    /// Returns `Ok(false)` without touching anything when the handle is
    /// stale; destroying twice is safe.
    pub fn destroy_object<T: VirtualObject>(
        &mut self,
        handle: &ObjectHandle<T>,
    ) -> HeapResult<bool> {
        if !self.is_live(handle) {
            return Ok(false);
        }
        // The hook runs before the free: it needs the still-valid object to
        // know which nested regions to release.
        let mut value: T = self.read(handle.address().offset_by(OBJECT_HEADER_SIZE))?;
        value.on_destroy(self)?;
        self.free_raw(
            handle.address(),
            OBJECT_HEADER_SIZE as usize + mem::size_of::<T>(),
        )?;
        Ok(true)
    }

    /// Check whether the object behind `handle` still exists
    pub fn is_live<T>(&self, handle: &ObjectHandle<T>) -> bool {
        match self.read_object_id(handle.address()) {
            Ok(stored) => stored != 0 && stored == handle.id(),
            Err(_) => false,
        }
    }

    /// Read a copy of the object behind `handle`
    pub fn get_object<T: VirtualObject>(&self, handle: &ObjectHandle<T>) -> HeapResult<T> {
        self.check_handle(handle)?;
        self.read(handle.address().offset_by(OBJECT_HEADER_SIZE))
    }

    /// Overwrite the object behind `handle` with `value`
    pub fn set_object<T: VirtualObject>(
        &mut self,
        handle: &ObjectHandle<T>,
        value: &T,
    ) -> HeapResult<()> {
        self.check_handle(handle)?;
        self.write(handle.address().offset_by(OBJECT_HEADER_SIZE), value)
    }

    /// Read the object, apply `f` to it, and persist the result.
    ///
    /// This is the only supported way to mutate an object in place; the heap
    /// never hands out references into the buffer that could dangle across a
    /// resize.
    pub fn update_object<T: VirtualObject, R>(
        &mut self,
        handle: &ObjectHandle<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> HeapResult<R> {
        let mut value = self.get_object(handle)?;
        let result = f(&mut value);
        self.set_object(handle, &value)?;
        Ok(result)
    }

    fn check_handle<T>(&self, handle: &ObjectHandle<T>) -> HeapResult<()> {
        if self.is_live(handle) {
            Ok(())
        } else {
            Err(HeapError::StaleHandle(format!(
                "object {} at {} no longer exists",
                handle.id(),
                handle.address()
            )))
        }
    }

    fn write_object_id(&mut self, address: VirtualAddress, id: u64) -> HeapResult<()> {
        let mut buf = [0u8; OBJECT_HEADER_SIZE as usize];
        LittleEndian::write_u64(&mut buf, id);
        self.write_bytes(address, &buf)
    }

    fn read_object_id(&self, address: VirtualAddress) -> HeapResult<u64> {
        let bytes = self.read_bytes(address, OBJECT_HEADER_SIZE as usize)?;
        Ok(LittleEndian::read_u64(bytes))
    }

    // ---- compaction -----------------------------------------------------

    /// Shrink the buffer when the last free range touches its logical end
    /// and holds more than `max_trailing_free_bytes` of slack.
    ///
    /// This is the only operation that ever shrinks the buffer, and it only
    /// runs when explicitly called. Returns the number of bytes released.
    pub fn trim(&mut self, max_trailing_free_bytes: usize) -> HeapResult<usize> {
        let buffer_len = self.store.len();
        let last = match self.free_ranges.last().copied() {
            Some(last) => last,
            None => return Ok(0),
        };
        if last.end() as usize != buffer_len {
            return Ok(0);
        }
        let available = last.available_size() as usize;
        if available <= max_trailing_free_bytes {
            return Ok(0);
        }

        let excess = available - max_trailing_free_bytes;
        let new_len = buffer_len - excess;
        if max_trailing_free_bytes == 0 {
            self.free_ranges.pop();
        } else {
            let index = self.free_ranges.len() - 1;
            self.free_ranges[index] = FreeRange::new(last.start(), new_len as u32);
        }
        self.store.resize(new_len);
        self.flush()?;
        Ok(excess)
    }

    // ---- statistics -----------------------------------------------------

    /// Current length of the managed buffer in bytes
    pub fn buffer_len(&self) -> usize {
        self.store.len()
    }

    /// Total bytes currently available for allocation
    pub fn free_bytes(&self) -> usize {
        self.free_ranges
            .iter()
            .map(|range| range.available_size() as usize)
            .sum()
    }

    /// Number of entries in the free list
    pub fn free_range_count(&self) -> usize {
        self.free_ranges.len()
    }

    /// The current free ranges, sorted ascending by start
    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free_ranges
    }

    // ---- write-back -----------------------------------------------------

    /// Serialize the heap state back into the buffer. Called by every
    /// mutating operation before it returns, so the buffer can always be
    /// reattached as-is.
    fn flush(&mut self) -> HeapResult<()> {
        // Grow the self-hosted entry storage until the list fits. The new
        // region always doubles, so the relocation itself cannot run out of
        // slots.
        while self.free_ranges.len() * FREE_ENTRY_SIZE > self.free_list.size() as usize {
            self.grow_free_list_storage()?;
        }

        let head = HeapHeader {
            object_id_counter: self.object_id_counter,
            free_list: self.free_list,
            free_len: self.free_ranges.len() as u32,
        };
        header::write_header(self.store.bytes_mut(), &head)?;
        header::write_entries(
            self.store.bytes_mut(),
            self.free_list.address(),
            &self.free_ranges,
        )?;
        Ok(())
    }

    fn grow_free_list_storage(&mut self) -> HeapResult<()> {
        let needed = (self.free_ranges.len() + 2) * FREE_ENTRY_SIZE;
        let new_size = (self.free_list.size() as usize * 2).max(needed);
        let address = self.allocate_inner(new_size as u32)?;
        let old = self.free_list;
        self.free_list = RangeHandle::new(address, new_size as u32);
        self.free_inner(old.address(), old.size() as usize)?;
        Ok(())
    }
}
