//! Virtual heap configuration options

/// Configuration options for bootstrapping a fresh buffer.
///
/// These only matter on the first attach; a buffer that already carries a
/// valid heap header keeps whatever layout it was created with.
#[derive(Clone, Debug)]
pub struct HeapConfig {
    /// Bytes of allocatable space reserved when the buffer is bootstrapped
    pub initial_pool_size: usize,
    /// Free-list entries the self-hosted entry storage starts with
    pub initial_free_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: 256,
            initial_free_capacity: 16,
        }
    }
}

impl HeapConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size of the initial allocatable pool in bytes
    pub fn with_initial_pool_size(mut self, bytes: usize) -> Self {
        self.initial_pool_size = bytes;
        self
    }

    /// Set the starting capacity of the free-list entry storage
    pub fn with_initial_free_capacity(mut self, entries: usize) -> Self {
        self.initial_free_capacity = entries;
        self
    }
}
