//! Copy-on-write value with a monotonically increasing version.

use std::sync::Arc;

/// A value replaced wholesale; readers clone the `Arc` and never observe a
/// partial update.
#[derive(Debug)]
pub struct Versioned<T> {
    version: u64,
    value: Arc<T>,
}

impl<T> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            version: 0,
            value: Arc::new(value),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn value(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    /// Swap in `value`, bump the version, and return the new shared value.
    pub fn replace(&mut self, value: T) -> Arc<T> {
        self.version += 1;
        self.value = Arc::new(value);
        Arc::clone(&self.value)
    }
}
