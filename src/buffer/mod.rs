//! Editor-side buffers
//!
//! A session never talks to an editor directly. It goes through a
//! [`BufferProvider`], which hands out scratch storage, opens it as a
//! document, presents it to the user, and reports changes and closes as
//! [`DocumentEvent`]s pushed into a channel the session owns.
//!
//! Two hosts ship with the crate:
//! - [`ScratchFileProvider`]: temp file + external editor process + file watcher
//! - [`MemoryBufferProvider`]: in-process documents, driven by the caller

pub mod memory;
pub mod scratch;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

pub use memory::MemoryBufferProvider;
pub use scratch::ScratchFileProvider;

/// Identifies one document for the lifetime of its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Notification delivered to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The document's text changed (from any origin)
    Changed(DocumentId),
    /// The document was closed by the user
    Closed(DocumentId),
}

/// Where providers push events for a subscriber
pub type EventSink = mpsc::UnboundedSender<DocumentEvent>;

/// How a provider orders an edit against the change event it causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyOrdering {
    /// `replace_all` has returned before the matching `Changed` is observable,
    /// and reading the document at that point yields the written text
    #[default]
    WriteBeforeNotify,
    /// Exactly one `Changed` per write, delivered at an unspecified time
    Unordered,
}

/// A cancelable registration (subscription, watcher, ...)
pub trait Disposable: Send {
    /// Release the registration. Calling twice must be harmless.
    fn dispose(&mut self) -> anyhow::Result<()>;
}

/// Scratch storage backing one document
pub trait ScratchResource: Send + Sync {
    fn id(&self) -> DocumentId;

    /// Free the storage. Calling twice must be harmless.
    fn release(&mut self) -> anyhow::Result<()>;
}

/// Readable side of an open document
#[async_trait]
pub trait Document: Send + Sync {
    fn id(&self) -> DocumentId;

    /// Full current text
    async fn text(&self) -> Result<String>;
}

/// Writable view of a presented document
#[async_trait]
pub trait Editor: Send {
    /// Replace the whole document with `text`
    async fn replace_all(&mut self, text: &str) -> Result<()>;
}

/// The host editor environment
#[async_trait]
pub trait BufferProvider: Send + Sync {
    /// Allocate fresh scratch storage labelled with `title`
    async fn create_scratch(&self, title: &str) -> Result<Box<dyn ScratchResource>>;

    /// Open scratch storage as a document
    async fn open(&self, scratch: &dyn ScratchResource) -> Result<Arc<dyn Document>>;

    /// Show the document to the user and return an editor for it
    async fn present(&self, document: &Arc<dyn Document>) -> Result<Box<dyn Editor>>;

    /// Deliver `Changed` events for `document` into `sink`
    fn watch_changes(&self, document: DocumentId, sink: EventSink)
        -> Result<Box<dyn Disposable>>;

    /// Deliver `Closed` events for every document into `sink`
    fn watch_closes(&self, sink: EventSink) -> Box<dyn Disposable>;

    fn ordering(&self) -> NotifyOrdering {
        NotifyOrdering::WriteBeforeNotify
    }

    /// Surface an error to the user
    fn notify_error(&self, error: &BridgeError) {
        tracing::error!("{}", error.user_message());
    }
}

/// Disposable that runs a closure once
pub struct OnDispose(Option<Box<dyn FnOnce() + Send>>);

impl OnDispose {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }
}

impl Disposable for OnDispose {
    fn dispose(&mut self) -> anyhow::Result<()> {
        if let Some(f) = self.0.take() {
            f();
        }
        Ok(())
    }
}
