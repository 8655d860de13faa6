//! Backend contract consumed by the core
//!
//! The explorer talks to four endpoints: the repository tree, file contents,
//! chat and explain. Components only see [`RepoBackend`], so tests can script
//! responses and the binary can plug in [`HttpBackend`].

mod http;

pub use http::HttpBackend;

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `owner/name` of the repository a session is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = String;

    /// Accepts `owner/name`, optionally as a github.com URL or with `.git`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('/');
        let rest = trimmed
            .split_once("github.com/")
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed);
        let mut parts = rest.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                let name = name.strip_suffix(".git").unwrap_or(name);
                Ok(RepoId::new(owner, name))
            }
            _ => Err(format!("expected owner/name, got '{}'", s)),
        }
    }
}

/// Body of `GET /repo/{owner}/{name}/contents/{path}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_binary: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    /// Coarse category such as `image` or `archive`
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// File bound to a chat question. Both fields absent serialises as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Body of `POST /repo/chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub context: ChatContext,
}

/// Body of `POST /repo/explain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub code: String,
    pub path: String,
}

/// `{text}` answer shared by chat and explain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextReply {
    pub text: String,
}

#[async_trait]
pub trait RepoBackend: Send + Sync {
    /// Raw tree snapshot; shape is validated by `TreeModel::build`
    async fn fetch_tree(&self) -> Result<serde_json::Value, BackendError>;

    async fn fetch_file(&self, path: &str) -> Result<FilePayload, BackendError>;

    async fn chat(&self, request: &ChatRequest) -> Result<TextReply, BackendError>;

    async fn explain(&self, request: &ExplainRequest) -> Result<TextReply, BackendError>;
}
