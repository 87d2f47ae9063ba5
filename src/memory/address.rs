use std::fmt;

use bytemuck::{Pod, Zeroable};

/// A logical byte offset into the managed buffer.
///
/// Virtual addresses replace native pointers so that references stay valid
/// when the buffer's physical memory moves on resize. Offset 0 is reserved
/// for the heap header, so a zero address doubles as the null value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct VirtualAddress {
    offset: u32,
}

impl VirtualAddress {
    /// Create an address at the given byte offset
    pub fn new(offset: u32) -> Self {
        Self { offset }
    }

    /// The null address (offset 0, reserved for the heap header)
    pub fn null() -> Self {
        Self { offset: 0 }
    }

    /// Byte offset into the buffer
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Check whether this address can refer to allocated storage
    pub fn is_valid(&self) -> bool {
        self.offset > 0
    }

    /// Check if this is the null address
    pub fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// Address `bytes` past this one
    pub fn offset_by(&self, bytes: u32) -> Self {
        Self {
            offset: self.offset + bytes,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "VirtualAddress(null)")
        } else {
            write!(f, "VirtualAddress({})", self.offset)
        }
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "@{}", self.offset)
        }
    }
}
