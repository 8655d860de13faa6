//! File content cache
//!
//! Fetches file contents by path and keeps them for the rest of the session.
//! The cache also owns the one piece of "which file is on screen" state.
//!
//! Several selections may be in flight at once. Each outstanding fetch is
//! tied to the path it was issued for. When it settles, the result is always
//! cached, but it only becomes the active view if that path is still the
//! latest selection. A slow response for an abandoned path can never clobber
//! a newer one. Fetches run as tokio tasks, so `select` needs a runtime.

use crate::backend::{FilePayload, RepoBackend};
use crate::error::{BackendError, ContentError};
use crate::util::format_file_size;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// What the viewer shows instead of bytes for a binary file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDescriptor {
    pub name: String,
    pub mime: String,
    /// Coarse category reported by the server (`image`, `archive`, ...)
    pub category: String,
    pub size_bytes: u64,
    pub download_url: String,
}

impl BinaryDescriptor {
    /// One-line stand-in used wherever text is expected
    pub fn summary(&self) -> String {
        format!(
            "[Binary file: {} ({})]",
            self.name,
            format_file_size(self.size_bytes)
        )
    }

    pub fn is_image(&self) -> bool {
        self.category == "image" || self.mime.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(BinaryDescriptor),
}

impl FileContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FileContent::Binary(_))
    }

    /// Text handed to the assistant; binary files are summarised, never sent
    pub fn context_text(&self) -> String {
        match self {
            FileContent::Text(text) => text.clone(),
            FileContent::Binary(descriptor) => descriptor.summary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: String,
    pub content: FileContent,
    pub fetched_at: DateTime<Utc>,
}

/// Settled outcome of [`ContentCache::select`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// This path is now the active view
    Active(CacheEntry),
    /// A newer selection won while this one was in flight; nothing to show
    Superseded { path: String },
}

type FetchFuture = Shared<BoxFuture<'static, Result<CacheEntry, ContentError>>>;

struct PendingFetch {
    id: u64,
    waiters: FetchFuture,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Path whose content is on screen
    current: Option<String>,
    /// Latest select target; settling fetches for any other path are stale
    requested: Option<String>,
    in_flight: HashMap<String, PendingFetch>,
    next_fetch: u64,
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Session-wide cache; clones share the same state
#[derive(Clone)]
pub struct ContentCache {
    backend: Arc<dyn RepoBackend>,
    state: Arc<Mutex<CacheState>>,
}

impl ContentCache {
    pub fn new(backend: Arc<dyn RepoBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    /// Select `path` for viewing.
    ///
    /// A cached path resolves without a network call. Otherwise exactly one
    /// fetch is issued per path, shared by every caller waiting on it. The
    /// fetch runs as its own tokio task and lands in the cache even if every
    /// waiter is dropped. Errors are only reported for the live selection;
    /// a failed stale fetch settles as [`Selection::Superseded`].
    pub async fn select(&self, path: &str) -> Result<Selection, ContentError> {
        let waiters = {
            let mut state = self.lock();
            state.requested = Some(path.to_string());

            if let Some(entry) = state.entries.get(path).cloned() {
                tracing::debug!(path, "content cache hit");
                state.current = Some(path.to_string());
                return Ok(Selection::Active(entry));
            }

            match state.in_flight.get(path) {
                Some(pending) => pending.waiters.clone(),
                None => {
                    tracing::debug!(path, "content cache miss, fetching");
                    state.next_fetch += 1;
                    let id = state.next_fetch;
                    let waiters = self.spawn_fetch(path, id);
                    state.in_flight.insert(
                        path.to_string(),
                        PendingFetch {
                            id,
                            waiters: waiters.clone(),
                        },
                    );
                    waiters
                }
            }
        };

        let outcome = waiters.await;
        self.settle(path, outcome)
    }

    fn spawn_fetch(&self, path: &str, id: u64) -> FetchFuture {
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let owned = path.to_string();
        let task = tokio::spawn(async move {
            let result = backend.fetch_file(&owned).await;
            absorb(&state, &owned, id, result)
        });

        let state = Arc::clone(&self.state);
        let owned = path.to_string();
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    release(&mut lock_state(&state), &owned, id);
                    Err(ContentError::Fetch {
                        path: owned,
                        source: BackendError::Transport(format!("fetch task failed: {}", err)),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Decide what a settled fetch means for the view
    fn settle(
        &self,
        path: &str,
        outcome: Result<CacheEntry, ContentError>,
    ) -> Result<Selection, ContentError> {
        let mut state = self.lock();
        let live = state.requested.as_deref() == Some(path);

        match outcome {
            Ok(entry) if live => {
                state.current = Some(path.to_string());
                Ok(Selection::Active(entry))
            }
            Ok(_) => {
                tracing::debug!(path, "cached stale response without showing it");
                Ok(Selection::Superseded {
                    path: path.to_string(),
                })
            }
            Err(err) if live => {
                tracing::warn!(path, error = %err, "file load failed");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(path, error = %err, "stale file load failed");
                Ok(Selection::Superseded {
                    path: path.to_string(),
                })
            }
        }
    }

    /// Path currently on screen
    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    pub fn current_entry(&self) -> Option<CacheEntry> {
        let state = self.lock();
        state
            .current
            .as_ref()
            .and_then(|path| state.entries.get(path))
            .cloned()
    }

    pub fn entry(&self, path: &str) -> Option<CacheEntry> {
        self.lock().entries.get(path).cloned()
    }

    pub fn is_cached(&self, path: &str) -> bool {
        self.lock().entries.contains_key(path)
    }

    pub fn is_loading(&self, path: &str) -> bool {
        self.lock().in_flight.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

/// Store a finished fetch; runs on the fetch task whether or not anyone waits
fn absorb(
    state: &Mutex<CacheState>,
    path: &str,
    id: u64,
    result: Result<FilePayload, BackendError>,
) -> Result<CacheEntry, ContentError> {
    let content = result
        .map_err(|source| ContentError::Fetch {
            path: path.to_string(),
            source,
        })
        .and_then(|payload| classify(path, payload));

    let mut state = lock_state(state);
    release(&mut state, path, id);
    let content = content?;
    let entry = state
        .entries
        .entry(path.to_string())
        .or_insert_with(|| CacheEntry {
            path: path.to_string(),
            content,
            fetched_at: Utc::now(),
        });
    Ok(entry.clone())
}

fn release(state: &mut CacheState, path: &str, id: u64) {
    if state.in_flight.get(path).is_some_and(|pending| pending.id == id) {
        state.in_flight.remove(path);
    }
}

/// Text or binary by the server's flag only; content is never sniffed
fn classify(path: &str, payload: FilePayload) -> Result<FileContent, ContentError> {
    if payload.is_binary == Some(true) {
        let name = payload
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| file_name(path).to_string());
        let category = payload.file_type.unwrap_or_else(|| "binary".to_string());
        let mime = mime_for(&name, &category).to_string();
        return Ok(FileContent::Binary(BinaryDescriptor {
            name,
            mime,
            category,
            size_bytes: payload.size.unwrap_or(0),
            download_url: payload.download_url.unwrap_or_default(),
        }));
    }

    match payload.content {
        Some(text) => Ok(FileContent::Text(text)),
        None => Err(ContentError::Unreadable {
            path: path.to_string(),
        }),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn mime_for(name: &str, category: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => match category {
            "image" => "image/*",
            "audio" => "audio/*",
            "video" => "video/*",
            _ => "application/octet-stream",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_payload, ScriptedBackend};

    fn cache_with(backend: &Arc<ScriptedBackend>) -> ContentCache {
        ContentCache::new(backend.clone())
    }

    #[tokio::test]
    async fn test_second_select_is_served_from_cache() {
        let backend = Arc::new(ScriptedBackend::new().with_text("a.py", "print(1)"));
        let cache = cache_with(&backend);

        let first = cache.select("a.py").await.unwrap();
        let second = cache.select("a.py").await.unwrap();

        assert_eq!(backend.file_calls("a.py"), 1);
        assert_eq!(first, second);
        assert_eq!(cache.current().as_deref(), Some("a.py"));
    }

    #[tokio::test]
    async fn test_stale_response_does_not_replace_newer_selection() {
        let backend = Arc::new(ScriptedBackend::new());
        let gate_a = backend.gate_file("a.py");
        let gate_b = backend.gate_file("b.py");
        let cache = cache_with(&backend);

        let mut select_a = Box::pin(cache.select("a.py"));
        let mut select_b = Box::pin(cache.select("b.py"));
        assert!(futures::poll!(&mut select_a).is_pending());
        assert!(futures::poll!(&mut select_b).is_pending());

        gate_a.send(Ok(text_payload("A"))).unwrap();
        let outcome_a = select_a.await.unwrap();
        assert_eq!(
            outcome_a,
            Selection::Superseded {
                path: "a.py".into()
            }
        );
        assert_eq!(cache.current(), None);

        gate_b.send(Ok(text_payload("B"))).unwrap();
        let outcome_b = select_b.await.unwrap();
        match outcome_b {
            Selection::Active(entry) => {
                assert_eq!(entry.content, FileContent::Text("B".into()))
            }
            other => panic!("expected active selection, got {:?}", other),
        }

        assert_eq!(cache.current().as_deref(), Some("b.py"));
        assert_eq!(
            cache.current_entry().unwrap().content.as_text(),
            Some("B")
        );
        // The abandoned response is still cached for later.
        assert!(cache.is_cached("a.py"));
    }

    #[tokio::test]
    async fn test_concurrent_selects_share_one_fetch() {
        let backend = Arc::new(ScriptedBackend::new());
        let gate = backend.gate_file("a.py");
        let cache = cache_with(&backend);

        let mut first = Box::pin(cache.select("a.py"));
        let mut second = Box::pin(cache.select("a.py"));
        assert!(futures::poll!(&mut first).is_pending());
        assert!(futures::poll!(&mut second).is_pending());
        assert!(cache.is_loading("a.py"));

        gate.send(Ok(text_payload("A"))).unwrap();
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Ok(Selection::Active(_))));
        assert!(matches!(second, Ok(Selection::Active(_))));
        assert_eq!(backend.file_calls("a.py"), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_loading("a.py"));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_view_and_caches_nothing() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_text("a.py", "print(1)")
                .with_file_error(
                    "b.py",
                    BackendError::Server {
                        status: 500,
                        message: None,
                    },
                ),
        );
        let cache = cache_with(&backend);

        cache.select("a.py").await.unwrap();
        let err = cache.select("b.py").await.unwrap_err();

        assert_eq!(err.path(), "b.py");
        assert!(matches!(err, ContentError::Fetch { .. }));
        assert_eq!(cache.current().as_deref(), Some("a.py"));
        assert!(!cache.is_cached("b.py"));
        assert_eq!(
            cache.entry("a.py").unwrap().content.as_text(),
            Some("print(1)")
        );

        // No failure entry: selecting again goes back to the network.
        let _ = cache.select("b.py").await;
        assert_eq!(backend.file_calls("b.py"), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_lands_in_cache() {
        let backend = Arc::new(ScriptedBackend::new().with_text("b.py", "B"));
        let gate_a = backend.gate_file("a.py");
        let cache = cache_with(&backend);

        {
            let mut select_a = Box::pin(cache.select("a.py"));
            assert!(futures::poll!(&mut select_a).is_pending());
        }
        cache.select("b.py").await.unwrap();
        gate_a.send(Ok(text_payload("A"))).unwrap();

        for _ in 0..100 {
            if !cache.is_loading("a.py") {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!cache.is_loading("a.py"));
        assert_eq!(cache.entry("a.py").unwrap().content.as_text(), Some("A"));
        assert_eq!(cache.current().as_deref(), Some("b.py"));

        // Served from the cache on the next visit.
        cache.select("a.py").await.unwrap();
        assert_eq!(backend.file_calls("a.py"), 1);
    }

    #[tokio::test]
    async fn test_stale_failure_is_not_reported() {
        let backend = Arc::new(ScriptedBackend::new().with_text("b.py", "ok"));
        let gate_a = backend.gate_file("a.py");
        let cache = cache_with(&backend);

        let mut select_a = Box::pin(cache.select("a.py"));
        assert!(futures::poll!(&mut select_a).is_pending());
        cache.select("b.py").await.unwrap();

        gate_a
            .send(Err(BackendError::Transport("reset".into())))
            .unwrap();
        assert_eq!(
            select_a.await.unwrap(),
            Selection::Superseded {
                path: "a.py".into()
            }
        );
        assert_eq!(cache.current().as_deref(), Some("b.py"));
    }

    #[tokio::test]
    async fn test_binary_flag_decides_classification() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_payload(
                    "img/logo.png",
                    FilePayload {
                        content: Some("ignored".into()),
                        is_binary: Some(true),
                        name: Some("logo.png".into()),
                        file_type: Some("image".into()),
                        size: Some(2048),
                        download_url: Some("https://example.com/logo.png".into()),
                    },
                )
                .with_text("weird.txt", "\u{0}PNG looks binary"),
        );
        let cache = cache_with(&backend);

        let Selection::Active(entry) = cache.select("img/logo.png").await.unwrap() else {
            panic!("expected active selection");
        };
        let FileContent::Binary(descriptor) = &entry.content else {
            panic!("expected binary content");
        };
        assert_eq!(descriptor.mime, "image/png");
        assert_eq!(descriptor.size_bytes, 2048);
        assert!(descriptor.is_image());
        assert_eq!(
            entry.content.context_text(),
            "[Binary file: logo.png (2.0 KB)]"
        );

        // No flag means text, whatever the bytes look like.
        let Selection::Active(entry) = cache.select("weird.txt").await.unwrap() else {
            panic!("expected active selection");
        };
        assert!(!entry.content.is_binary());
    }

    #[tokio::test]
    async fn test_missing_content_without_flag_is_unreadable() {
        let backend =
            Arc::new(ScriptedBackend::new().with_payload("empty.bin", FilePayload::default()));
        let cache = cache_with(&backend);

        let err = cache.select("empty.bin").await.unwrap_err();
        assert_eq!(
            err,
            ContentError::Unreadable {
                path: "empty.bin".into()
            }
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mime_falls_back_to_category() {
        assert_eq!(mime_for("photo.heic", "image"), "image/*");
        assert_eq!(mime_for("data.bin", "binary"), "application/octet-stream");
        assert_eq!(mime_for("REPORT.PDF", "document"), "application/pdf");
    }
}
