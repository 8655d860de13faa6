//! Per-file explanation panel
//!
//! Asks the backend to explain the text file currently on screen and keeps
//! the rendered answer for display. Like chat, only one explanation is
//! generated at a time.

use crate::backend::{ExplainRequest, RepoBackend};
use crate::content::{ContentCache, FileContent};
use crate::error::ExplainError;
use crate::markdown;
use crate::session::{EventBus, SessionEvent};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExplainState {
    #[default]
    Idle,
    Loading {
        path: String,
    },
    Ready {
        path: String,
        markup: String,
    },
    Failed {
        path: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct ExplainPanel {
    backend: Arc<dyn RepoBackend>,
    cache: ContentCache,
    events: EventBus,
    state: Arc<Mutex<ExplainState>>,
}

/// Clears `Loading` if the explain future is dropped early
struct LoadingGuard<'a> {
    panel: &'a ExplainPanel,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.panel.lock() = ExplainState::Idle;
        }
    }
}

impl ExplainPanel {
    pub fn new(backend: Arc<dyn RepoBackend>, cache: ContentCache, events: EventBus) -> Self {
        Self {
            backend,
            cache,
            events,
            state: Arc::new(Mutex::new(ExplainState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExplainState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> ExplainState {
        self.lock().clone()
    }

    /// Explain the selected file and return the rendered markup
    pub async fn explain(&self) -> Result<String, ExplainError> {
        let entry = self.cache.current_entry().ok_or(ExplainError::NoSelection)?;
        let code = match entry.content {
            FileContent::Text(text) => text,
            FileContent::Binary(_) => return Err(ExplainError::BinaryFile(entry.path)),
        };
        let path = entry.path;

        {
            let mut state = self.lock();
            if matches!(*state, ExplainState::Loading { .. }) {
                return Err(ExplainError::InFlight);
            }
            *state = ExplainState::Loading { path: path.clone() };
        }
        self.events
            .publish(SessionEvent::ExplainStarted { path: path.clone() });
        tracing::debug!(path = %path, "requesting explanation");

        let mut guard = LoadingGuard {
            panel: self,
            armed: true,
        };
        let request = ExplainRequest {
            code,
            path: path.clone(),
        };
        let result = self.backend.explain(&request).await;
        guard.armed = false;

        match result {
            Ok(reply) => {
                let markup = markdown::render(&reply.text);
                *self.lock() = ExplainState::Ready {
                    path: path.clone(),
                    markup: markup.clone(),
                };
                self.events.publish(SessionEvent::ExplainReady { path });
                Ok(markup)
            }
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "explanation failed");
                let reason = err.user_message();
                *self.lock() = ExplainState::Failed {
                    path: path.clone(),
                    reason: reason.clone(),
                };
                self.events
                    .publish(SessionEvent::ExplainFailed { path, reason });
                Err(ExplainError::Backend(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FilePayload;
    use crate::error::BackendError;
    use crate::testing::ScriptedBackend;

    fn setup(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, ContentCache, ExplainPanel) {
        let backend = Arc::new(backend);
        let cache = ContentCache::new(backend.clone());
        let panel = ExplainPanel::new(backend.clone(), cache.clone(), EventBus::new());
        (backend, cache, panel)
    }

    #[tokio::test]
    async fn test_explain_requires_selection() {
        let (backend, _, panel) = setup(ScriptedBackend::new());

        assert_eq!(panel.explain().await, Err(ExplainError::NoSelection));
        assert!(backend.explain_requests().is_empty());
    }

    #[tokio::test]
    async fn test_explain_sends_code_and_renders_reply() {
        let (backend, cache, panel) = setup(ScriptedBackend::new().with_text("a.py", "print(1)"));
        backend.push_explain_reply(Ok("# Summary\nPrints `1`".into()));
        cache.select("a.py").await.unwrap();

        let markup = panel.explain().await.unwrap();

        let requests = backend.explain_requests();
        assert_eq!(requests[0].code, "print(1)");
        assert_eq!(requests[0].path, "a.py");
        assert!(markup.contains("<h1>Summary</h1>"));
        assert!(markup.contains("<code>1</code>"));
        assert!(matches!(panel.state(), ExplainState::Ready { path, .. } if path == "a.py"));
    }

    #[tokio::test]
    async fn test_binary_file_is_not_explained() {
        let (backend, cache, panel) = setup(ScriptedBackend::new().with_payload(
            "logo.png",
            FilePayload {
                is_binary: Some(true),
                size: Some(10),
                ..FilePayload::default()
            },
        ));
        cache.select("logo.png").await.unwrap();

        assert_eq!(
            panel.explain().await,
            Err(ExplainError::BinaryFile("logo.png".into()))
        );
        assert!(backend.explain_requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_explain_while_loading_is_rejected() {
        let (backend, cache, panel) = setup(ScriptedBackend::new().with_text("a.py", "x = 1"));
        let gate = backend.gate_explain();
        cache.select("a.py").await.unwrap();

        let mut first = Box::pin(panel.explain());
        assert!(futures::poll!(&mut first).is_pending());
        assert_eq!(panel.explain().await, Err(ExplainError::InFlight));

        gate.send(Err(BackendError::Transport("connection reset".into())))
            .unwrap();
        assert!(matches!(first.await, Err(ExplainError::Backend(_))));
        assert!(matches!(
            panel.state(),
            ExplainState::Failed { reason, .. } if reason.contains("connection reset")
        ));
    }
}
