//! Sync Session - one per browser connection
//!
//! ```text
//! AwaitingFirstMessage --message--> Active --document closed / transport closed--> Closed
//! ```
//!
//! The session owns its buffer, its observers and the echo filter. It is
//! driven by a single task ([`SyncSession::run`]) that multiplexes three
//! sources: document events from the buffer host, the settle timer of the
//! oldest queued outbound frame, and frames from the browser. Exactly one
//! handler runs at a time, so a remote write always finishes (and is
//! recorded) before the change event it caused is looked at.

mod dispose;
mod echo;

pub use dispose::DisposeList;
pub use echo::EchoFilter;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::buffer::{
    BufferProvider, Document, DocumentEvent, DocumentId, Editor, EventSink, ScratchResource,
};
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::protocol::{ClientMessage, EditorMessage};

/// Default settle delay before a local edit is forwarded
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstMessage,
    Active,
    Closed,
}

/// What the transport tells the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame from the browser
    Message(String),
    /// The browser went away
    Closed,
}

/// What the session asks the transport to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Close the connection; nothing follows
    Close,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Race mitigation: some hosts report an emptied document right before
    /// the close event. Holding local edits this long lets the close win.
    pub settle_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            settle_delay: config.settle_delay,
        }
    }
}

struct PendingSend {
    due: Instant,
    frame: String,
}

pub struct SyncSession {
    id: Uuid,
    provider: Arc<dyn BufferProvider>,
    options: SessionOptions,
    state: SessionState,
    title: Option<String>,
    echo: EchoFilter,

    scratch: Option<Box<dyn ScratchResource>>,
    document: Option<Arc<dyn Document>>,
    editor: Option<Box<dyn Editor>>,
    observers: DisposeList,

    events_tx: EventSink,
    events_rx: mpsc::UnboundedReceiver<DocumentEvent>,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: VecDeque<PendingSend>,

    /// We closed the transport ourselves
    hung_up: bool,
    cleaned_up: bool,
}

impl SyncSession {
    pub fn new(
        provider: Arc<dyn BufferProvider>,
        options: SessionOptions,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let echo = EchoFilter::new(provider.ordering());

        Self {
            id: Uuid::new_v4(),
            provider,
            options,
            state: SessionState::AwaitingFirstMessage,
            title: None,
            echo,
            scratch: None,
            document: None,
            editor: None,
            observers: DisposeList::new(),
            events_tx,
            events_rx,
            outbound,
            pending: VecDeque::new(),
            hung_up: false,
            cleaned_up: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.document.as_ref().map(|d| d.id())
    }

    /// Outbound frames still waiting out the settle delay
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Drive the session until the browser disconnects or the user closes
    /// the document.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        debug!("session started");

        loop {
            let deadline = self.pending.front().map(|p| p.due);

            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => {
                    self.on_document_event(event).await;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_due(Instant::now());
                }
                incoming = inbound.recv() => match incoming {
                    Some(TransportEvent::Message(frame)) => self.on_message(&frame).await,
                    Some(TransportEvent::Closed) | None => {
                        self.on_transport_closed();
                        break;
                    }
                },
            }

            if self.hung_up {
                break;
            }
        }

        self.cleanup();
        debug!("session finished");
    }

    /// Handle one frame from the browser
    pub async fn on_message(&mut self, frame: &str) {
        if self.is_closed() {
            trace!("ignoring frame on closed session");
            return;
        }

        let message = match ClientMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                self.provider.notify_error(&e);
                return;
            }
        };

        let result = match self.state {
            SessionState::AwaitingFirstMessage => self.activate(message).await,
            SessionState::Active => self.apply_remote(message.text).await,
            SessionState::Closed => Ok(()),
        };

        if let Err(e) = result {
            self.fail(e);
        }
    }

    async fn activate(&mut self, message: ClientMessage) -> Result<()> {
        let title = message.title.unwrap_or_default();
        self.title = Some(title.clone());
        let provider = self.provider.clone();

        let scratch = provider.create_scratch(&title).await?;
        let scratch = self.scratch.insert(scratch);
        let document = provider.open(scratch.as_ref()).await?;
        self.document = Some(document.clone());
        let mut editor = provider.present(&document).await?;

        // The seed write may start the editor, which can close right away
        self.observers
            .push(provider.watch_closes(self.events_tx.clone()));

        // No change observer yet, so this write needs no echo bookkeeping
        editor.replace_all(&message.text).await?;
        self.editor = Some(editor);

        self.observers
            .push(provider.watch_changes(document.id(), self.events_tx.clone())?);

        self.echo.record_remote(message.text);
        self.state = SessionState::Active;

        info!(title = %title, document = %document.id(), "session active");
        Ok(())
    }

    async fn apply_remote(&mut self, text: String) -> Result<()> {
        let Some(editor) = self.editor.as_mut() else {
            return Ok(());
        };

        // Write first, then record: the change event for this write must find
        // the new text already recorded.
        self.echo.before_write();
        if let Err(e) = editor.replace_all(&text).await {
            self.echo.write_failed();
            return Err(e);
        }
        self.echo.record_remote(text);

        trace!("applied remote text");
        Ok(())
    }

    /// Handle a notification from the buffer host
    pub async fn on_document_event(&mut self, event: DocumentEvent) {
        if self.is_closed() {
            return;
        }

        match event {
            DocumentEvent::Changed(id) if Some(id) == self.document_id() => {
                self.on_buffer_changed().await;
            }
            DocumentEvent::Closed(id) if Some(id) == self.document_id() => {
                self.on_buffer_closed();
            }
            _ => {}
        }
    }

    async fn on_buffer_changed(&mut self) {
        let Some(document) = self.document.clone() else {
            return;
        };

        let current = match document.text().await {
            Ok(text) => text,
            Err(e) => {
                // Editors that save via rename leave a short window with no file
                debug!(error = %e, "could not read document after change");
                return;
            }
        };

        if self.echo.is_echo(&current) {
            trace!("suppressed echo of remote text");
            return;
        }

        let title = self.title.clone().unwrap_or_default();
        match EditorMessage::new(current, title).to_frame() {
            Ok(frame) => self.pending.push_back(PendingSend {
                due: Instant::now() + self.options.settle_delay,
                frame,
            }),
            Err(e) => warn!(error = %e, "failed to encode local change"),
        }
    }

    fn on_buffer_closed(&mut self) {
        info!("document closed by user, closing connection");
        self.state = SessionState::Closed;
        self.hung_up = true;
        let _ = self.outbound.send(Outbound::Close);
        self.cleanup();
    }

    /// The browser disconnected. The document is left open.
    pub fn on_transport_closed(&mut self) {
        if !self.is_closed() {
            info!("browser disconnected");
        }
        self.state = SessionState::Closed;
        self.cleanup();
    }

    /// Send every queued frame whose settle delay has passed by `now`
    pub fn flush_due(&mut self, now: Instant) {
        while self.pending.front().is_some_and(|p| p.due <= now) {
            let Some(send) = self.pending.pop_front() else {
                break;
            };

            if self.is_closed() {
                debug!("session closed during settle delay, dropping local change");
                continue;
            }

            if self.outbound.send(Outbound::Text(send.frame)).is_err() {
                debug!("transport gone, dropping local change");
            }
        }
    }

    fn fail(&mut self, error: BridgeError) {
        if error.category().keeps_session_alive() {
            warn!(error = %error, "session error");
            self.provider.notify_error(&error);
            return;
        }

        warn!(error = %error, "session unusable until the browser reconnects");
        self.provider.notify_error(&error);
        self.state = SessionState::Closed;
        self.cleanup();
    }

    /// Release scratch storage and every observer. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if let Some(scratch) = self.scratch.as_mut() {
            if let Err(e) = scratch.release() {
                warn!(error = %e, "failed to release scratch buffer");
            }
        }

        let failed = self.observers.dispose_all();
        if failed > 0 {
            warn!(failed, "some observers failed to dispose");
        }

        if !self.pending.is_empty() {
            debug!(
                dropped = self.pending.len(),
                "session closed during settle delay, dropping local changes"
            );
            self.pending.clear();
        }

        self.editor = None;
    }
}
