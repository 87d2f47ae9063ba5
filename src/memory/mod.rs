mod address;
mod range;

pub use address::VirtualAddress;
pub use range::{FreeRange, RangeHandle};
