mod config;
mod header;
mod manager;
mod object;

pub use config::HeapConfig;
pub use manager::VirtualHeap;
pub use object::{ObjectHandle, VirtualObject, OBJECT_HEADER_SIZE};

use thiserror::Error;

/// Errors that can occur in virtual heap operations
#[derive(Error, Debug)]
pub enum HeapError {
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    #[error("Access out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Stale object handle: {0}")]
    StaleHandle(String),

    #[error("Invalid free: {0}")]
    InvalidFree(String),

    #[error("Invalid heap header: {0}")]
    InvalidHeader(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Element decode failed: {0}")]
    DecodeFailed(String),

    #[error("Header I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for heap operations
pub type HeapResult<T> = Result<T, HeapError>;
