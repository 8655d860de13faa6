//! Repository session
//!
//! One explorer tab's worth of state: the repository being browsed, its
//! tree, the content cache, the conversation and the explanation panel.
//! Everything the view needs hangs off a [`RepoSession`]; there is no
//! ambient global state.

mod events;

pub use events::{EventBus, SessionEvent};

use crate::backend::{HttpBackend, RepoBackend, RepoId};
use crate::chat::{ChatOrchestrator, SendOutcome};
use crate::config::Config;
use crate::content::{ContentCache, Selection};
use crate::error::{ContentError, ExplainError, TreeError};
use crate::explain::ExplainPanel;
use crate::tree::TreeModel;
use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub struct RepoSession {
    repo: RepoId,
    backend: Arc<dyn RepoBackend>,
    tree: Option<TreeModel>,
    cache: ContentCache,
    chat: ChatOrchestrator,
    explainer: ExplainPanel,
    events: EventBus,
}

impl RepoSession {
    pub fn new(repo: RepoId, backend: Arc<dyn RepoBackend>) -> Self {
        let events = EventBus::new();
        let cache = ContentCache::new(Arc::clone(&backend));
        let chat = ChatOrchestrator::new(Arc::clone(&backend), cache.clone(), events.clone());
        let explainer = ExplainPanel::new(Arc::clone(&backend), cache.clone(), events.clone());
        Self {
            repo,
            backend,
            tree: None,
            cache,
            chat,
            explainer,
            events,
        }
    }

    /// Session talking to the configured HTTP server
    pub fn connect(config: &Config, repo: RepoId) -> Result<Self> {
        let backend = HttpBackend::new(
            config.server_base()?,
            repo.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.chat_timeout_secs),
        )?;
        Ok(Self::new(repo, Arc::new(backend)))
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Fetch the repository snapshot and build the tree.
    ///
    /// A failed load keeps whichever tree was loaded before.
    pub async fn load_tree(&mut self) -> Result<&TreeModel, TreeError> {
        let built = match self.backend.fetch_tree().await {
            Ok(snapshot) => TreeModel::build(&snapshot),
            Err(err) => Err(TreeError::from(err)),
        };

        match built {
            Ok(model) => {
                tracing::info!(
                    repo = %self.repo,
                    nodes = model.len(),
                    files = model.file_count(),
                    "repository tree loaded"
                );
                self.events.publish(SessionEvent::TreeLoaded {
                    files: model.file_count(),
                });
                self.chat.notice(format!(
                    "Loaded {} ({} files). Select a file to ask about it.",
                    self.repo,
                    model.file_count()
                ));
                Ok(self.tree.insert(model))
            }
            Err(err) => {
                tracing::warn!(repo = %self.repo, error = %err, "tree load failed");
                self.events.publish(SessionEvent::TreeFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn tree(&self) -> Option<&TreeModel> {
        self.tree.as_ref()
    }

    pub async fn select(&self, path: &str) -> Result<Selection, ContentError> {
        self.events.publish(SessionEvent::FileLoading {
            path: path.to_string(),
        });
        let result = self.cache.select(path).await;
        match &result {
            Ok(Selection::Active(entry)) => self.events.publish(SessionEvent::FileSelected {
                path: entry.path.clone(),
            }),
            Ok(Selection::Superseded { .. }) => {}
            Err(err) => self.events.publish(SessionEvent::FileFailed {
                path: err.path().to_string(),
                reason: err.to_string(),
            }),
        }
        result
    }

    pub async fn send(&self, query: &str) -> SendOutcome {
        self.chat.send(query).await
    }

    pub async fn explain(&self) -> Result<String, ExplainError> {
        self.explainer.explain().await
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn chat(&self) -> &ChatOrchestrator {
        &self.chat
    }
}
