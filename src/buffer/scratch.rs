//! Scratch-file buffer host
//!
//! Each document is a file inside its own temp directory. The configured
//! editor is launched on the file once it holds its initial text, and the
//! editor exiting is the document close. Changes are picked up by a debounced watcher on the
//! directory, so editors that save via rename are seen too.

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;

use super::{
    BufferProvider, Disposable, Document, DocumentEvent, DocumentId, Editor, EventSink,
    OnDispose, ScratchResource,
};
use crate::config::EditorCommand;
use crate::error::{BridgeError, ResourceStage, Result};

const FALLBACK_FILE_STEM: &str = "ghosttext";
const MAX_FILE_STEM: usize = 64;
const WATCH_DEBOUNCE: Duration = Duration::from_millis(20);

/// Map a browser-supplied title to a safe file stem
pub fn sanitize_title(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM)
        .collect();

    let stem = stem.trim_matches(|c| c == '.' || c == '_');
    if stem.is_empty() {
        FALLBACK_FILE_STEM.to_string()
    } else {
        stem.to_string()
    }
}

type CloseWatchers = Arc<Mutex<HashMap<u64, EventSink>>>;
type ScratchPaths = Arc<Mutex<HashMap<DocumentId, PathBuf>>>;

/// Buffer host that edits temp files in an external editor
pub struct ScratchFileProvider {
    editor: EditorCommand,
    scratch_dir: Option<PathBuf>,
    extension: String,
    next_id: AtomicU64,
    paths: ScratchPaths,
    close_watchers: CloseWatchers,
    next_watch: AtomicU64,
}

impl ScratchFileProvider {
    pub fn new(editor: EditorCommand) -> Self {
        Self {
            editor,
            scratch_dir: None,
            extension: "txt".to_string(),
            next_id: AtomicU64::new(1),
            paths: Arc::new(Mutex::new(HashMap::new())),
            close_watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watch: AtomicU64::new(1),
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn file_name(&self, title: &str) -> String {
        let stem = sanitize_title(title);
        let ext = self.extension.trim_start_matches('.');
        if ext.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, ext)
        }
    }

    fn documents_path(&self, id: DocumentId) -> Option<PathBuf> {
        self.paths.lock().get(&id).cloned()
    }
}

/// Temp directory + the file inside it
pub struct ScratchFile {
    id: DocumentId,
    dir: Option<TempDir>,
    registry: Weak<Mutex<HashMap<DocumentId, PathBuf>>>,
}

impl ScratchResource for ScratchFile {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn release(&mut self) -> anyhow::Result<()> {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
        if let Some(dir) = self.dir.take() {
            let location = dir.path().display().to_string();
            dir.close()
                .with_context(|| format!("Failed to remove scratch dir: {}", location))?;
        }
        Ok(())
    }
}

struct FileDocument {
    id: DocumentId,
    path: PathBuf,
}

#[async_trait]
impl Document for FileDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    async fn text(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| BridgeError::resource(ResourceStage::Read, e))
    }
}

/// Deferred editor start. The process is launched after the first write so
/// the user never sees the empty placeholder file.
struct EditorLaunch {
    id: DocumentId,
    command: EditorCommand,
    close_watchers: CloseWatchers,
}

impl EditorLaunch {
    fn spawn(self, path: &Path) -> Result<()> {
        let EditorLaunch {
            id,
            command,
            close_watchers,
        } = self;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to launch editor: {}", command))
            .map_err(|e| BridgeError::resource(ResourceStage::Present, e))?;

        tracing::info!(%id, editor = %command, "opened document in editor");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%id, %status, "editor exited"),
                Err(e) => tracing::warn!(%id, error = %e, "lost track of editor process"),
            }
            for sink in close_watchers.lock().values() {
                let _ = sink.send(DocumentEvent::Closed(id));
            }
        });

        Ok(())
    }
}

struct FileEditor {
    path: PathBuf,
    launch: Option<EditorLaunch>,
}

#[async_trait]
impl Editor for FileEditor {
    async fn replace_all(&mut self, text: &str) -> Result<()> {
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| BridgeError::resource(ResourceStage::Edit, e))?;

        if let Some(launch) = self.launch.take() {
            launch.spawn(&self.path)?;
        }
        Ok(())
    }
}

/// Keeps a debouncer alive until disposed
struct WatchGuard<T> {
    debouncer: Option<T>,
}

impl<T: Send> Disposable for WatchGuard<T> {
    fn dispose(&mut self) -> anyhow::Result<()> {
        self.debouncer = None;
        Ok(())
    }
}

#[async_trait]
impl BufferProvider for ScratchFileProvider {
    async fn create_scratch(&self, title: &str) -> Result<Box<dyn ScratchResource>> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dx-ghost-");
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| BridgeError::resource(ResourceStage::Allocate, e))?;

        let path = dir.path().join(self.file_name(title));
        tokio::fs::write(&path, "")
            .await
            .map_err(|e| BridgeError::resource(ResourceStage::Allocate, e))?;

        let id = DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, path = %path.display(), "allocated scratch file");
        self.paths.lock().insert(id, path);

        Ok(Box::new(ScratchFile {
            id,
            dir: Some(dir),
            registry: Arc::downgrade(&self.paths),
        }))
    }

    async fn open(&self, scratch: &dyn ScratchResource) -> Result<Arc<dyn Document>> {
        let id = scratch.id();
        let path = self.documents_path(id).ok_or_else(|| {
            BridgeError::resource(ResourceStage::Open, anyhow!("unknown scratch {}", id))
        })?;
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BridgeError::resource(ResourceStage::Open, e))?
        {
            return Err(BridgeError::resource(
                ResourceStage::Open,
                anyhow!("{} does not exist", path.display()),
            ));
        }
        Ok(Arc::new(FileDocument { id, path }))
    }

    async fn present(&self, document: &Arc<dyn Document>) -> Result<Box<dyn Editor>> {
        let id = document.id();
        let path = self.documents_path(id).ok_or_else(|| {
            BridgeError::resource(ResourceStage::Present, anyhow!("unknown {}", id))
        })?;

        Ok(Box::new(FileEditor {
            path,
            launch: Some(EditorLaunch {
                id,
                command: self.editor.clone(),
                close_watchers: self.close_watchers.clone(),
            }),
        }))
    }

    fn watch_changes(
        &self,
        document: DocumentId,
        sink: EventSink,
    ) -> Result<Box<dyn Disposable>> {
        let path = self.documents_path(document).ok_or_else(|| {
            BridgeError::resource(ResourceStage::Open, anyhow!("unknown {}", document))
        })?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BridgeError::resource(ResourceStage::Open, anyhow!("no parent dir")))?;
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut debouncer = new_debouncer(
            WATCH_DEBOUNCE,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let touched = events.iter().any(|debounced| {
                        matches!(
                            debounced.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_)
                        ) && debounced
                            .event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
                    });
                    if touched {
                        let _ = sink.send(DocumentEvent::Changed(document));
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(%document, error = %error, "scratch watcher error");
                    }
                }
            },
        )
        .map_err(|e| BridgeError::resource(ResourceStage::Open, e))?;

        debouncer
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch: {}", dir.display()))
            .map_err(|e| BridgeError::resource(ResourceStage::Open, e))?;

        Ok(Box::new(WatchGuard {
            debouncer: Some(debouncer),
        }))
    }

    fn watch_closes(&self, sink: EventSink) -> Box<dyn Disposable> {
        let key = self.next_watch.fetch_add(1, Ordering::Relaxed);
        self.close_watchers.lock().insert(key, sink);

        let watchers = Arc::downgrade(&self.close_watchers);
        Box::new(OnDispose::new(move || {
            if let Some(watchers) = watchers.upgrade() {
                watchers.lock().remove(&key);
            }
        }))
    }
}
