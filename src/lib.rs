// VHeap - a relocatable heap allocator living inside a single growable byte buffer

pub mod buffer;
pub mod collections;
pub mod heap;
pub mod memory;

pub use buffer::{ByteStore, GrowableBuffer};
pub use collections::{PolymorphicElement, PolymorphicList, VirtualArray, VirtualList};
pub use heap::{HeapConfig, HeapError, HeapResult, ObjectHandle, VirtualHeap, VirtualObject};
pub use memory::{FreeRange, RangeHandle, VirtualAddress};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
