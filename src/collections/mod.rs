mod array;
mod list;
mod poly;

pub use array::VirtualArray;
pub use list::VirtualList;
pub use poly::{ElementMeta, PolymorphicElement, PolymorphicList};
