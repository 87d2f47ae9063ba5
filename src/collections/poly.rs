use bytemuck::{Pod, Zeroable};

use crate::collections::VirtualList;
use crate::heap::{HeapError, HeapResult, VirtualHeap, VirtualObject};
use crate::memory::{RangeHandle, VirtualAddress};

/// Byte capacity floor for the payload region's first growth
const MIN_BYTE_CAPACITY: u32 = 64;

/// The serialization contract for elements of a `PolymorphicList`.
///
/// Elements report their own encoded size and write themselves into the span
/// the list carves out for them, so the list never needs to know their
/// concrete layout.
pub trait PolymorphicElement: Sized {
    /// Number of bytes `encode` will produce for this value
    fn encoded_size(&self) -> usize;

    /// Serialize into `out`, which is exactly `encoded_size()` bytes long
    fn encode(&self, out: &mut [u8]);

    /// Deserialize from the bytes a previous `encode` produced
    fn decode(bytes: &[u8]) -> Option<Self>;
}

/// Placement record for one element: where its bytes start inside the
/// payload region and how many there are
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ElementMeta {
    start: u32,
    size: u32,
}

impl ElementMeta {
    /// Offset of the element's first byte, relative to the payload region
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Encoded size of the element in bytes
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// A list of variable-sized, heterogeneous elements.
///
/// Elements are packed back to back in one payload region; a side list of
/// `ElementMeta` records, kept parallel to the physical element order,
/// answers "where is element i" independently of "how large is element i"
/// (which only the element's writer knows).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PolymorphicList {
    used: u32,
    reserved: u32,
    data: RangeHandle,
    meta: VirtualList<ElementMeta>,
}

impl PolymorphicList {
    /// Describe an empty list with no reserved storage
    pub fn new() -> Self {
        Self::with_capacity(0, 0)
    }

    /// Describe an empty list that will reserve `bytes` of payload room and
    /// metadata room for `elements` entries when created in a heap
    pub fn with_capacity(bytes: u32, elements: u32) -> Self {
        Self {
            used: 0,
            reserved: bytes,
            data: RangeHandle::null(),
            meta: VirtualList::with_capacity(elements),
        }
    }

    /// Number of elements currently stored
    pub fn len(&self) -> u32 {
        self.meta.len()
    }

    /// Returns true if the list holds no elements
    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Total payload bytes currently occupied by elements
    pub fn used_bytes(&self) -> u32 {
        self.used
    }

    /// The placement record for the element at `index`
    pub fn meta_at(&self, heap: &VirtualHeap<'_>, index: u32) -> HeapResult<ElementMeta> {
        self.meta.get(heap, index)
    }

    /// Append an element, letting it serialize itself into the span reserved
    /// for it
    pub fn push<E: PolymorphicElement>(
        &mut self,
        heap: &mut VirtualHeap<'_>,
        element: &E,
    ) -> HeapResult<()> {
        self.insert(heap, self.len(), element)
    }

    /// Insert an element at `index`, shifting the payload bytes of every
    /// later element up and adjusting their placement records.
    /// `index == len` appends.
    pub fn insert<E: PolymorphicElement>(
        &mut self,
        heap: &mut VirtualHeap<'_>,
        index: u32,
        element: &E,
    ) -> HeapResult<()> {
        let len = self.len();
        if index > len {
            return Err(HeapError::IndexOutOfBounds(index as usize));
        }
        let size = element.encoded_size() as u32;

        self.reserve_bytes(heap, self.used + size)?;

        // Elements are packed in order, so the insertion offset is where the
        // displaced element currently starts (or the end of the payload)
        let offset = if index < len {
            self.meta.get(heap, index)?.start
        } else {
            self.used
        };

        let tail = self.used - offset;
        if tail > 0 {
            heap.copy(
                self.payload_address(offset),
                self.payload_address(offset + size),
                tail as usize,
            )?;
        }
        for later in index..len {
            let mut record = self.meta.get(heap, later)?;
            record.start += size;
            self.meta.set(heap, later, &record)?;
        }
        self.meta
            .insert(heap, index, &ElementMeta { start: offset, size })?;

        let mut encoded = vec![0u8; size as usize];
        element.encode(&mut encoded);
        heap.write_bytes(self.payload_address(offset), &encoded)?;
        self.used += size;
        Ok(())
    }

    /// Remove the element at `index`, shifting the payload bytes of every
    /// later element down and adjusting their placement records
    pub fn remove(&mut self, heap: &mut VirtualHeap<'_>, index: u32) -> HeapResult<()> {
        let record = self.meta.get(heap, index)?;
        let hole_end = record.start + record.size;

        let tail = self.used - hole_end;
        if tail > 0 {
            heap.copy(
                self.payload_address(hole_end),
                self.payload_address(record.start),
                tail as usize,
            )?;
        }
        for later in (index + 1)..self.len() {
            let mut moved = self.meta.get(heap, later)?;
            moved.start -= record.size;
            self.meta.set(heap, later, &moved)?;
        }
        self.meta.remove(heap, index)?;
        self.used -= record.size;
        Ok(())
    }

    /// Decode a copy of the element at `index`
    pub fn get<E: PolymorphicElement>(
        &self,
        heap: &VirtualHeap<'_>,
        index: u32,
    ) -> HeapResult<E> {
        let record = self.meta.get(heap, index)?;
        let bytes = heap.read_bytes(self.payload_address(record.start), record.size as usize)?;
        E::decode(bytes).ok_or_else(|| {
            HeapError::DecodeFailed(format!(
                "element {} ({} bytes) did not decode",
                index, record.size
            ))
        })
    }

    fn payload_address(&self, offset: u32) -> VirtualAddress {
        self.data.address().offset_by(offset)
    }

    fn reserve_bytes(&mut self, heap: &mut VirtualHeap<'_>, needed: u32) -> HeapResult<()> {
        let capacity = self.data.size();
        if needed <= capacity {
            return Ok(());
        }
        let new_capacity = (capacity * 2).max(needed).max(MIN_BYTE_CAPACITY);

        let old_data = self.data;
        let new_data = heap.allocate_range(new_capacity as usize)?;
        if self.used > 0 {
            heap.copy(old_data.address(), new_data.address(), self.used as usize)?;
        }
        if old_data.is_valid() {
            heap.free(old_data)?;
        }
        self.data = new_data;
        Ok(())
    }
}

impl Default for PolymorphicList {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualObject for PolymorphicList {
    fn on_create(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        self.meta.on_create(heap)?;
        if self.reserved > 0 {
            self.data = heap.allocate_range(self.reserved as usize)?;
        }
        Ok(())
    }

    fn on_destroy(&mut self, heap: &mut VirtualHeap<'_>) -> HeapResult<()> {
        if self.data.is_valid() {
            heap.free(self.data)?;
            self.data = RangeHandle::null();
        }
        self.used = 0;
        self.meta.on_destroy(heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::GrowableBuffer;
    use byteorder::{ByteOrder, LittleEndian};

    /// A small variable-size value family, encoded as a tag byte plus a
    /// type-specific payload
    #[derive(Debug, Clone, PartialEq)]
    enum Value {
        Flag(bool),
        Number(i64),
        Text(String),
    }

    impl PolymorphicElement for Value {
        fn encoded_size(&self) -> usize {
            match self {
                Value::Flag(_) => 2,
                Value::Number(_) => 9,
                Value::Text(text) => 5 + text.len(),
            }
        }

        fn encode(&self, out: &mut [u8]) {
            match self {
                Value::Flag(flag) => {
                    out[0] = 0;
                    out[1] = *flag as u8;
                }
                Value::Number(number) => {
                    out[0] = 1;
                    LittleEndian::write_i64(&mut out[1..9], *number);
                }
                Value::Text(text) => {
                    out[0] = 2;
                    LittleEndian::write_u32(&mut out[1..5], text.len() as u32);
                    out[5..].copy_from_slice(text.as_bytes());
                }
            }
        }

        fn decode(bytes: &[u8]) -> Option<Self> {
            match bytes.first()? {
                0 => Some(Value::Flag(*bytes.get(1)? != 0)),
                1 => {
                    if bytes.len() < 9 {
                        return None;
                    }
                    Some(Value::Number(LittleEndian::read_i64(&bytes[1..9])))
                }
                2 => {
                    if bytes.len() < 5 {
                        return None;
                    }
                    let len = LittleEndian::read_u32(&bytes[1..5]) as usize;
                    let text = bytes.get(5..5 + len)?;
                    Some(Value::Text(String::from_utf8_lossy(text).to_string()))
                }
                _ => None,
            }
        }
    }

    fn heap_with(buffer: &mut GrowableBuffer) -> VirtualHeap<'_> {
        VirtualHeap::attach(buffer).unwrap()
    }

    fn create_poly(heap: &mut VirtualHeap<'_>) -> PolymorphicList {
        let mut list = PolymorphicList::new();
        list.on_create(heap).unwrap();
        list
    }

    #[test]
    fn test_push_and_get_mixed_sizes() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        list.push(&mut heap, &Value::Flag(true)).unwrap();
        list.push(&mut heap, &Value::Number(-7)).unwrap();
        list.push(&mut heap, &Value::Text("hello".to_string())).unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.used_bytes(), 2 + 9 + 10);
        assert_eq!(list.get::<Value>(&heap, 0).unwrap(), Value::Flag(true));
        assert_eq!(list.get::<Value>(&heap, 1).unwrap(), Value::Number(-7));
        assert_eq!(
            list.get::<Value>(&heap, 2).unwrap(),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn test_metadata_tracks_physical_order() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        list.push(&mut heap, &Value::Flag(false)).unwrap();
        list.push(&mut heap, &Value::Number(5)).unwrap();

        let first = list.meta_at(&heap, 0).unwrap();
        let second = list.meta_at(&heap, 1).unwrap();
        assert_eq!(first.start(), 0);
        assert_eq!(first.size(), 2);
        // The second element starts exactly where the first ends
        assert_eq!(second.start(), 2);
        assert_eq!(second.size(), 9);
    }

    #[test]
    fn test_insert_shifts_later_elements() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        list.push(&mut heap, &Value::Number(1)).unwrap();
        list.push(&mut heap, &Value::Number(3)).unwrap();

        list.insert(&mut heap, 1, &Value::Text("two".to_string()))
            .unwrap();
        list.insert(&mut heap, 0, &Value::Flag(true)).unwrap();

        assert_eq!(list.len(), 4);
        assert_eq!(list.get::<Value>(&heap, 0).unwrap(), Value::Flag(true));
        assert_eq!(list.get::<Value>(&heap, 1).unwrap(), Value::Number(1));
        assert_eq!(
            list.get::<Value>(&heap, 2).unwrap(),
            Value::Text("two".to_string())
        );
        assert_eq!(list.get::<Value>(&heap, 3).unwrap(), Value::Number(3));

        assert!(list
            .insert(&mut heap, 9, &Value::Flag(false))
            .is_err());
    }

    #[test]
    fn test_remove_closes_the_hole() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        list.push(&mut heap, &Value::Number(1)).unwrap();
        list.push(&mut heap, &Value::Text("middle".to_string())).unwrap();
        list.push(&mut heap, &Value::Number(3)).unwrap();
        let before = list.used_bytes();

        list.remove(&mut heap, 1).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.used_bytes(), before - 11);
        assert_eq!(list.get::<Value>(&heap, 0).unwrap(), Value::Number(1));
        assert_eq!(list.get::<Value>(&heap, 1).unwrap(), Value::Number(3));

        // The surviving records are tightly packed again
        let first = list.meta_at(&heap, 0).unwrap();
        let second = list.meta_at(&heap, 1).unwrap();
        assert_eq!(second.start(), first.start() + first.size());

        assert!(list.remove(&mut heap, 5).is_err());
    }

    #[test]
    fn test_growth_preserves_elements() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        for round in 0..40i64 {
            list.push(&mut heap, &Value::Number(round)).unwrap();
        }

        // 40 nine-byte elements forced several payload reallocations
        assert_eq!(list.used_bytes(), 360);
        for round in 0..40 {
            assert_eq!(
                list.get::<Value>(&heap, round as u32).unwrap(),
                Value::Number(round)
            );
        }
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = create_poly(&mut heap);
        list.push(&mut heap, &Value::Flag(true)).unwrap();

        // Corrupt the stored tag byte so the decoder rejects it
        let record = list.meta_at(&heap, 0).unwrap();
        heap.write_bytes(list.payload_address(record.start()), &[0xFF])
            .unwrap();

        match list.get::<Value>(&heap, 0) {
            Err(HeapError::DecodeFailed(_)) => {}
            other => panic!("Expected DecodeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_in_virtual_object_releases_everything() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);
        let baseline = heap.free_bytes();

        let handle = heap.create_object(PolymorphicList::new()).unwrap();

        let mut list = heap.get_object(&handle).unwrap();
        list.push(&mut heap, &Value::Text("persisted".to_string()))
            .unwrap();
        heap.set_object(&handle, &list).unwrap();

        let list = heap.get_object(&handle).unwrap();
        assert_eq!(
            list.get::<Value>(&heap, 0).unwrap(),
            Value::Text("persisted".to_string())
        );

        // Destroy tears down payload, metadata storage, and the object
        assert!(heap.destroy_object(&handle).unwrap());
        assert_eq!(heap.free_bytes(), baseline);
    }

    #[test]
    fn test_with_capacity_preallocates() {
        let mut buffer = GrowableBuffer::new();
        let mut heap = heap_with(&mut buffer);

        let mut list = PolymorphicList::with_capacity(128, 8);
        list.on_create(&mut heap).unwrap();

        let free_before_pushes = heap.free_bytes();
        for round in 0..8i64 {
            list.push(&mut heap, &Value::Number(round)).unwrap();
        }
        // Everything fit in the reserved storage: no further allocations
        assert_eq!(heap.free_bytes(), free_before_pushes);

        list.on_destroy(&mut heap).unwrap();
    }
}
