//! In-process buffer host
//!
//! Documents live in a shared map. The owner of the provider plays the user:
//! [`MemoryBufferProvider::edit`] types into a document and
//! [`MemoryBufferProvider::close`] closes it. Used by the test suite and by
//! embedders that drive their own UI.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    BufferProvider, Disposable, Document, DocumentEvent, DocumentId, Editor, EventSink,
    NotifyOrdering, OnDispose, ScratchResource,
};
use crate::error::{BridgeError, ResourceStage, Result};

#[derive(Debug, Clone)]
struct MemoryEntry {
    title: String,
    text: String,
    open: bool,
    released: bool,
}

#[derive(Default)]
struct MemoryHost {
    next_id: u64,
    next_watch: u64,
    entries: HashMap<DocumentId, MemoryEntry>,
    change_watchers: HashMap<u64, (DocumentId, EventSink)>,
    close_watchers: HashMap<u64, EventSink>,
    notifications: Vec<String>,
    fail_stage: Option<ResourceStage>,
    fail_release: bool,
}

impl MemoryHost {
    fn take_failure(&mut self, stage: ResourceStage) -> Result<()> {
        if self.fail_stage == Some(stage) {
            self.fail_stage = None;
            return Err(BridgeError::resource(
                stage,
                anyhow!("injected {} failure", stage),
            ));
        }
        Ok(())
    }

    fn set_text(&mut self, id: DocumentId, text: &str) -> Result<()> {
        let entry = self.entries.get_mut(&id).filter(|e| e.open).ok_or_else(|| {
            BridgeError::resource(ResourceStage::Edit, anyhow!("{} is not open", id))
        })?;
        entry.text = text.to_string();

        for (doc, sink) in self.change_watchers.values() {
            if *doc == id {
                let _ = sink.send(DocumentEvent::Changed(id));
            }
        }
        Ok(())
    }
}

/// Buffer host backed by in-memory strings
#[derive(Clone, Default)]
pub struct MemoryBufferProvider {
    host: Arc<Mutex<MemoryHost>>,
    ordering: NotifyOrdering,
}

impl MemoryBufferProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `ordering` to sessions instead of the default
    pub fn with_ordering(mut self, ordering: NotifyOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Make the next materialization step at `stage` fail once
    pub fn fail_next(&self, stage: ResourceStage) {
        self.host.lock().fail_stage = Some(stage);
    }

    /// Make the next scratch release fail once
    pub fn fail_next_release(&self) {
        self.host.lock().fail_release = true;
    }

    /// Ids of every document ever created, oldest first
    pub fn documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.host.lock().entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Most recently created document whose title is `title`
    pub fn find(&self, title: &str) -> Option<DocumentId> {
        let host = self.host.lock();
        host.entries
            .iter()
            .filter(|(_, e)| e.title == title)
            .map(|(id, _)| *id)
            .max()
    }

    pub fn text(&self, id: DocumentId) -> Option<String> {
        self.host.lock().entries.get(&id).map(|e| e.text.clone())
    }

    pub fn is_open(&self, id: DocumentId) -> bool {
        self.host.lock().entries.get(&id).is_some_and(|e| e.open)
    }

    pub fn is_released(&self, id: DocumentId) -> bool {
        self.host.lock().entries.get(&id).is_some_and(|e| e.released)
    }

    /// Live change + close subscriptions
    pub fn watcher_count(&self) -> usize {
        let host = self.host.lock();
        host.change_watchers.len() + host.close_watchers.len()
    }

    /// Messages passed to `notify_error`
    pub fn notifications(&self) -> Vec<String> {
        self.host.lock().notifications.clone()
    }

    /// Simulate the user typing: replace the text and fire change observers
    pub fn edit(&self, id: DocumentId, text: &str) -> Result<()> {
        self.host.lock().set_text(id, text)
    }

    /// Simulate the user closing the document
    pub fn close(&self, id: DocumentId) {
        let mut host = self.host.lock();
        if let Some(entry) = host.entries.get_mut(&id) {
            entry.open = false;
        }
        for sink in host.close_watchers.values() {
            let _ = sink.send(DocumentEvent::Closed(id));
        }
    }
}

struct MemoryScratch {
    id: DocumentId,
    host: Arc<Mutex<MemoryHost>>,
}

impl ScratchResource for MemoryScratch {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn release(&mut self) -> anyhow::Result<()> {
        let mut host = self.host.lock();
        if std::mem::take(&mut host.fail_release) {
            anyhow::bail!("injected release failure for {}", self.id);
        }
        let entry = host
            .entries
            .get_mut(&self.id)
            .ok_or_else(|| anyhow!("{} vanished", self.id))?;
        entry.released = true;
        Ok(())
    }
}

struct MemoryDocument {
    id: DocumentId,
    host: Arc<Mutex<MemoryHost>>,
}

#[async_trait]
impl Document for MemoryDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    async fn text(&self) -> Result<String> {
        let host = self.host.lock();
        host.entries
            .get(&self.id)
            .map(|e| e.text.clone())
            .ok_or_else(|| BridgeError::resource(ResourceStage::Read, anyhow!("{} vanished", self.id)))
    }
}

struct MemoryEditor {
    id: DocumentId,
    host: Arc<Mutex<MemoryHost>>,
}

#[async_trait]
impl Editor for MemoryEditor {
    async fn replace_all(&mut self, text: &str) -> Result<()> {
        let mut host = self.host.lock();
        host.take_failure(ResourceStage::Edit)?;
        host.set_text(self.id, text)
    }
}

#[async_trait]
impl BufferProvider for MemoryBufferProvider {
    async fn create_scratch(&self, title: &str) -> Result<Box<dyn ScratchResource>> {
        let mut host = self.host.lock();
        host.take_failure(ResourceStage::Allocate)?;

        host.next_id += 1;
        let id = DocumentId(host.next_id);
        host.entries.insert(
            id,
            MemoryEntry {
                title: title.to_string(),
                text: String::new(),
                open: false,
                released: false,
            },
        );

        Ok(Box::new(MemoryScratch {
            id,
            host: self.host.clone(),
        }))
    }

    async fn open(&self, scratch: &dyn ScratchResource) -> Result<Arc<dyn Document>> {
        let mut host = self.host.lock();
        host.take_failure(ResourceStage::Open)?;

        let id = scratch.id();
        let entry = host.entries.get_mut(&id).ok_or_else(|| {
            BridgeError::resource(ResourceStage::Open, anyhow!("unknown scratch {}", id))
        })?;
        entry.open = true;

        Ok(Arc::new(MemoryDocument {
            id,
            host: self.host.clone(),
        }))
    }

    async fn present(&self, document: &Arc<dyn Document>) -> Result<Box<dyn Editor>> {
        self.host.lock().take_failure(ResourceStage::Present)?;
        Ok(Box::new(MemoryEditor {
            id: document.id(),
            host: self.host.clone(),
        }))
    }

    fn watch_changes(
        &self,
        document: DocumentId,
        sink: EventSink,
    ) -> Result<Box<dyn Disposable>> {
        let mut host = self.host.lock();
        host.next_watch += 1;
        let key = host.next_watch;
        host.change_watchers.insert(key, (document, sink));

        let weak = Arc::downgrade(&self.host);
        Ok(Box::new(OnDispose::new(move || {
            if let Some(host) = weak.upgrade() {
                host.lock().change_watchers.remove(&key);
            }
        })))
    }

    fn watch_closes(&self, sink: EventSink) -> Box<dyn Disposable> {
        let mut host = self.host.lock();
        host.next_watch += 1;
        let key = host.next_watch;
        host.close_watchers.insert(key, sink);

        let weak = Arc::downgrade(&self.host);
        Box::new(OnDispose::new(move || {
            if let Some(host) = weak.upgrade() {
                host.lock().close_watchers.remove(&key);
            }
        }))
    }

    fn ordering(&self) -> NotifyOrdering {
        self.ordering
    }

    fn notify_error(&self, error: &BridgeError) {
        tracing::warn!(error = %error, "buffer host notification");
        self.host.lock().notifications.push(error.to_string());
    }
}
