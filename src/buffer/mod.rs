//! The backing byte store the virtual heap allocates from

/// The contract the heap requires from its backing storage.
///
/// The heap does not care whether the bytes live in a plain growable vector,
/// a component buffer, or a memory-mapped region; it only needs a contiguous
/// view of the current bytes and the ability to resize it. Resizing may move
/// the storage in memory, which is why nothing outside the heap may hold a
/// reference into it across a call that can resize.
pub trait ByteStore {
    /// Current length of the store in bytes
    fn len(&self) -> usize;

    /// Returns true if the store holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable view of the current bytes
    fn bytes(&self) -> &[u8];

    /// Mutable view of the current bytes
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Grow or shrink the store to `new_len` bytes.
    ///
    /// Bytes added by growth must read as zero. The heap relies on this: a
    /// freshly grown region can never contain a byte pattern that looks like
    /// a live object header.
    fn resize(&mut self, new_len: usize);
}

/// A plain `Vec<u8>`-backed byte store
#[derive(Debug, Clone, Default)]
pub struct GrowableBuffer {
    bytes: Vec<u8>,
}

impl GrowableBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Create a buffer of `len` zeroed bytes
    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// Adopt previously persisted buffer contents
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Consume the buffer, returning its raw contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ByteStore for GrowableBuffer {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn resize(&mut self, new_len: usize) {
        self.bytes.resize(new_len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growable_buffer_starts_empty() {
        let buffer = GrowableBuffer::new();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert!(buffer.bytes().is_empty());
    }

    #[test]
    fn test_growable_buffer_with_len_is_zeroed() {
        let buffer = GrowableBuffer::with_len(64);
        assert_eq!(buffer.len(), 64);
        assert!(buffer.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resize_growth_zero_fills() {
        let mut buffer = GrowableBuffer::new();
        buffer.resize(8);
        buffer.bytes_mut().fill(0xAB);

        buffer.resize(16);
        assert_eq!(buffer.len(), 16);
        assert!(buffer.bytes()[..8].iter().all(|&b| b == 0xAB));
        assert!(buffer.bytes()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resize_shrink_discards_tail() {
        let mut buffer = GrowableBuffer::with_len(16);
        buffer.bytes_mut().fill(0xCD);

        buffer.resize(4);
        assert_eq!(buffer.len(), 4);

        // Regrown bytes must come back zeroed, not with stale contents
        buffer.resize(16);
        assert!(buffer.bytes()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let original = vec![1u8, 2, 3, 4];
        let buffer = GrowableBuffer::from_bytes(original.clone());
        assert_eq!(buffer.bytes(), &original[..]);
        assert_eq!(buffer.into_bytes(), original);
    }
}
