//! Scripted backend for unit tests
//!
//! Responses are either canned up front or held behind a oneshot gate so a
//! test decides exactly when (and in which order) each call settles.

use crate::backend::{ChatRequest, ExplainRequest, FilePayload, RepoBackend, TextReply};
use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

type Reply = Result<String, BackendError>;

pub(crate) fn text_payload(text: &str) -> FilePayload {
    FilePayload {
        content: Some(text.to_string()),
        ..FilePayload::default()
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    tree: Mutex<Option<Result<Value, BackendError>>>,
    files: Mutex<HashMap<String, Result<FilePayload, BackendError>>>,
    file_gates: Mutex<HashMap<String, oneshot::Receiver<Result<FilePayload, BackendError>>>>,
    file_calls: Mutex<HashMap<String, usize>>,
    chat_replies: Mutex<VecDeque<Reply>>,
    chat_gate: Mutex<Option<oneshot::Receiver<Reply>>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    explain_replies: Mutex<VecDeque<Reply>>,
    explain_gate: Mutex<Option<oneshot::Receiver<Reply>>>,
    explain_requests: Mutex<Vec<ExplainRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(self, tree: Value) -> Self {
        *self.tree.lock().unwrap() = Some(Ok(tree));
        self
    }

    pub fn with_tree_error(self, err: BackendError) -> Self {
        *self.tree.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn with_text(self, path: &str, text: &str) -> Self {
        self.with_payload(path, text_payload(text))
    }

    pub fn with_payload(self, path: &str, payload: FilePayload) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(payload));
        self
    }

    pub fn with_file_error(self, path: &str, err: BackendError) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), Err(err));
        self
    }

    /// The next fetch of `path` waits until the returned sender fires
    pub fn gate_file(&self, path: &str) -> oneshot::Sender<Result<FilePayload, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.file_gates
            .lock()
            .unwrap()
            .insert(path.to_string(), rx);
        tx
    }

    pub fn file_calls(&self, path: &str) -> usize {
        self.file_calls
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn push_chat_reply(&self, reply: Reply) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn gate_chat(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        *self.chat_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    pub fn push_explain_reply(&self, reply: Reply) {
        self.explain_replies.lock().unwrap().push_back(reply);
    }

    pub fn gate_explain(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        *self.explain_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn explain_requests(&self) -> Vec<ExplainRequest> {
        self.explain_requests.lock().unwrap().clone()
    }
}

async fn settle(
    gate: Option<oneshot::Receiver<Reply>>,
    queue: &Mutex<VecDeque<Reply>>,
) -> Result<TextReply, BackendError> {
    let reply = match gate {
        Some(rx) => rx
            .await
            .unwrap_or_else(|_| Err(BackendError::Transport("gate dropped".into()))),
        None => {
            let next = queue.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(BackendError::Transport("no scripted reply".into())))
        }
    };
    reply.map(|text| TextReply { text })
}

#[async_trait]
impl RepoBackend for ScriptedBackend {
    async fn fetch_tree(&self) -> Result<Value, BackendError> {
        self.tree
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Value::Array(Vec::new())))
    }

    async fn fetch_file(&self, path: &str) -> Result<FilePayload, BackendError> {
        *self
            .file_calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;

        let gate = self.file_gates.lock().unwrap().remove(path);
        if let Some(rx) = gate {
            return rx
                .await
                .unwrap_or_else(|_| Err(BackendError::Transport("gate dropped".into())));
        }

        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(Err(BackendError::Server {
                status: 404,
                message: Some("File not found or unable to read".into()),
            }))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<TextReply, BackendError> {
        self.chat_requests.lock().unwrap().push(request.clone());
        let gate = self.chat_gate.lock().unwrap().take();
        settle(gate, &self.chat_replies).await
    }

    async fn explain(&self, request: &ExplainRequest) -> Result<TextReply, BackendError> {
        self.explain_requests.lock().unwrap().push(request.clone());
        let gate = self.explain_gate.lock().unwrap().take();
        settle(gate, &self.explain_replies).await
    }
}
