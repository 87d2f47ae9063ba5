use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::memory::VirtualAddress;

/// A contiguous span of unused buffer bytes, as the half-open interval
/// `[start, end)`.
///
/// The heap keeps its free ranges sorted ascending by `start` with no two
/// ranges overlapping or touching; touching neighbors are always merged.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FreeRange {
    start: u32,
    end: u32,
}

impl FreeRange {
    /// Create a range covering `[start, end)`
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// First byte offset covered by the range
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last byte offset covered by the range
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of bytes available in the range
    pub fn available_size(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if the range covers no bytes
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Consume `bytes` from the front of the range
    pub fn carve_front(&mut self, bytes: u32) {
        self.start += bytes;
    }

    /// Returns true if `other` begins exactly where this range ends
    pub fn is_followed_by(&self, other: &FreeRange) -> bool {
        self.end == other.start
    }

    /// Returns true if the two ranges share at least one byte
    pub fn overlaps(&self, other: &FreeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Debug for FreeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FreeRange({}..{})", self.start, self.end)
    }
}

/// Descriptor of an allocated region: where it starts and how many bytes it
/// spans. Higher layers hold one of these per allocation so they can request
/// deallocation without recomputing sizes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RangeHandle {
    address: VirtualAddress,
    size: u32,
}

impl RangeHandle {
    /// Create a handle for `size` bytes starting at `address`
    pub fn new(address: VirtualAddress, size: u32) -> Self {
        Self { address, size }
    }

    /// A handle that refers to nothing
    pub fn null() -> Self {
        Self {
            address: VirtualAddress::null(),
            size: 0,
        }
    }

    /// Start address of the region
    pub fn address(&self) -> VirtualAddress {
        self.address
    }

    /// Size of the region in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// A handle is valid when it points at a positive address and spans at
    /// least one byte
    pub fn is_valid(&self) -> bool {
        self.address.is_valid() && self.size > 0
    }
}

impl fmt::Debug for RangeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "RangeHandle({}, {} bytes)", self.address, self.size)
        } else {
            write!(f, "RangeHandle(null)")
        }
    }
}
