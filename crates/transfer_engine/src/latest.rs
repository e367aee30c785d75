use std::sync::{Arc, PoisonError, RwLock};

/// Shared cell holding the most recent value of something that changes while
/// a long-lived task is reading it. Readers always see the current value, never
/// the one captured when the task started.
#[derive(Debug, Default)]
pub struct LatestBox<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for LatestBox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LatestBox<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: Clone> LatestBox<T> {
    pub fn get(&self) -> T {
        self.with(T::clone)
    }
}
