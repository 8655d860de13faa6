//! Error taxonomy shared by the tree, content and chat components.
//!
//! Every network-facing failure is turned into one of these at the
//! component boundary. None of them is fatal to a session: a failed fetch
//! degrades one panel and leaves every state machine back at rest.

use thiserror::Error;

/// Failure talking to the repository backend.
///
/// `Clone` so a single in-flight fetch can be awaited by several callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network failure, no response at all
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-2xx status
    #[error("server responded with status {status}{}", detail_suffix(.message))]
    Server { status: u16, message: Option<String> },
    /// Response arrived but is missing expected fields
    #[error("malformed payload: {0}")]
    Malformed(String),
}

fn detail_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

impl BackendError {
    /// Short human-readable reason, used for chat error messages and banners
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Transport(e) => format!("Network error: {}", e),
            BackendError::Server { status, message } => match message {
                Some(m) if !m.is_empty() => {
                    format!("Server responded with status {}: {}", status, m)
                }
                _ => format!("Server responded with status {}", status),
            },
            BackendError::Malformed(e) => format!("Unexpected response from server: {}", e),
        }
    }
}

/// Why a repository snapshot could not become a tree.
///
/// `Empty` and `Malformed` describe the snapshot itself and are kept
/// distinct from a transient fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("repository snapshot is empty")]
    Empty,
    #[error("repository snapshot is malformed: {0}")]
    Malformed(String),
    #[error("failed to fetch repository tree: {0}")]
    Fetch(#[from] BackendError),
}

/// Why a file could not be shown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("failed to load {path}: {source}")]
    Fetch { path: String, source: BackendError },
    /// Server answered without content and without the binary flag
    #[error("unable to read {path}")]
    Unreadable { path: String },
}

impl ContentError {
    pub fn path(&self) -> &str {
        match self {
            ContentError::Fetch { path, .. } | ContentError::Unreadable { path } => path,
        }
    }
}

/// Why an explanation could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExplainError {
    #[error("no file is selected")]
    NoSelection,
    #[error("binary files cannot be explained: {0}")]
    BinaryFile(String),
    #[error("an explanation is already being generated")]
    InFlight,
    #[error(transparent)]
    Backend(#[from] BackendError),
}
