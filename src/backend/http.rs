use super::{ChatRequest, ExplainRequest, FilePayload, RepoBackend, RepoId, TextReply};
use crate::error::BackendError;
use crate::util::truncate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Maximum length of a server error body carried into messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// [`RepoBackend`] over the explorer's HTTP API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    repo: RepoId,
    chat_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        base: Url,
        repo: RepoId,
        request_timeout: Duration,
        chat_timeout: Duration,
    ) -> Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("server URL '{}' cannot be used as a base", base);
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base,
            repo,
            chat_timeout,
        })
    }

    /// Base URL plus percent-encoded path segments
    fn endpoint<'a, I>(&self, segments: I) -> Result<Url, BackendError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport(format!("invalid server URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BackendError> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn post_for_text<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<TextReply, BackendError> {
        tracing::debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .timeout(self.chat_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let value: Value = read_json(response).await?;
        text_reply(value)
    }
}

#[async_trait]
impl RepoBackend for HttpBackend {
    async fn fetch_tree(&self) -> Result<Value, BackendError> {
        let url = self.endpoint([
            "repo",
            self.repo.owner.as_str(),
            self.repo.name.as_str(),
            "tree",
        ])?;
        self.get_json(url).await
    }

    async fn fetch_file(&self, path: &str) -> Result<FilePayload, BackendError> {
        let prefix = ["repo", self.repo.owner.as_str(), self.repo.name.as_str(), "contents"];
        let segments = prefix
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        let url = self.endpoint(segments)?;
        self.get_json(url).await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<TextReply, BackendError> {
        let url = self.endpoint(["repo", "chat"])?;
        self.post_for_text(url, request).await
    }

    async fn explain(&self, request: &ExplainRequest) -> Result<TextReply, BackendError> {
        let url = self.endpoint(["repo", "explain"])?;
        self.post_for_text(url, request).await
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Transport("request timed out".to_string())
    } else {
        BackendError::Transport(err.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "backend request failed");
        return Err(BackendError::Server {
            status: status.as_u16(),
            message: error_detail(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
}

/// `{text}` on success; a 2xx `{error}` body is still a failure
fn text_reply(value: Value) -> Result<TextReply, BackendError> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Ok(TextReply {
            text: text.to_string(),
        });
    }
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(BackendError::Malformed(format!(
            "server reported: {}",
            truncate(error, MAX_ERROR_BODY_LEN)
        ))),
        None => Err(BackendError::Malformed("response has no text field".to_string())),
    }
}

/// Pull a readable reason out of an error body (`{error}` or `{detail}`)
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        for key in ["error", "detail"] {
            if let Some(detail) = value.get(key).and_then(Value::as_str) {
                return Some(truncate(detail, MAX_ERROR_BODY_LEN));
            }
        }
    }
    Some(truncate(trimmed, MAX_ERROR_BODY_LEN))
}
