use crate::buffer::Disposable;

/// Registrations owned by a session, released together
#[derive(Default)]
pub struct DisposeList {
    items: Vec<Box<dyn Disposable>>,
}

impl DisposeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Box<dyn Disposable>) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dispose everything. A failing item does not stop the rest.
    /// Returns how many items failed; a second call is a no-op.
    pub fn dispose_all(&mut self) -> usize {
        let mut failed = 0;
        for mut item in self.items.drain(..) {
            if let Err(e) = item.dispose() {
                tracing::warn!(error = %e, "failed to dispose observer");
                failed += 1;
            }
        }
        failed
    }
}

impl Drop for DisposeList {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
