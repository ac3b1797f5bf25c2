use parking_lot::ReentrantMutex;

/// Reentrant so a guarded helper may call another guarded helper.
#[derive(Debug, Default)]
pub struct PdfResourceLock {
    inner: ReentrantMutex<()>,
}

impl PdfResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, operation: impl FnOnce() -> T) -> T {
        let _guard = self.inner.lock();
        operation()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
