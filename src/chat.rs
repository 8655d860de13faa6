//! Chat orchestration
//!
//! One conversation per session and at most one request in flight. The
//! request lifecycle is `Idle -> Sending -> AwaitingResponse -> Idle`, and
//! every path out of `AwaitingResponse` (answer, failure, or the caller
//! dropping the future) lands back in `Idle`.

use crate::backend::{ChatContext, ChatRequest, RepoBackend, TextReply};
use crate::content::ContentCache;
use crate::error::BackendError;
use crate::markdown;
use crate::session::{EventBus, SessionEvent};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Body of the transient entry shown while a reply is pending
pub const PLACEHOLDER_TEXT: &str = "Thinking...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Sending,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
    Error,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    /// Raw text, except assistant replies which hold rendered markup
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Pending-reply placeholder; removed once the reply settles
    pub loading: bool,
}

impl ChatMessage {
    fn new(role: Role, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            body: body.into(),
            created_at: Utc::now(),
            loading: false,
        }
    }

    fn placeholder() -> Self {
        Self {
            loading: true,
            ..Self::new(Role::Assistant, PLACEHOLDER_TEXT)
        }
    }

    /// Markup safe to insert into the transcript
    pub fn markup(&self) -> String {
        match self.role {
            Role::Assistant => self.body.clone(),
            _ => markdown::escape_html(&self.body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    RequestInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Answered(ChatMessage),
    /// The request failed; the message is the Error entry now in the transcript
    Failed(ChatMessage),
    Ignored(IgnoreReason),
}

struct ChatSession {
    messages: Vec<ChatMessage>,
    state: ChatState,
    /// Placeholder id of the request in flight
    pending: Option<Uuid>,
    /// File the last request was bound to
    context_path: Option<String>,
}

/// Owns the transcript and the request lifecycle.
///
/// Clones share one conversation.
#[derive(Clone)]
pub struct ChatOrchestrator {
    backend: Arc<dyn RepoBackend>,
    cache: ContentCache,
    events: EventBus,
    session: Arc<Mutex<ChatSession>>,
}

/// Returns the session to `Idle` if the send future is dropped mid-request
struct PendingGuard<'a> {
    chat: &'a ChatOrchestrator,
    placeholder: Option<Uuid>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.placeholder.take() {
            self.chat.abandon(id);
        }
    }
}

impl ChatOrchestrator {
    pub fn new(backend: Arc<dyn RepoBackend>, cache: ContentCache, events: EventBus) -> Self {
        Self {
            backend,
            cache,
            events,
            session: Arc::new(Mutex::new(ChatSession {
                messages: Vec::new(),
                state: ChatState::Idle,
                pending: None,
                context_path: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatSession> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> ChatState {
        self.lock().state
    }

    /// Snapshot of the transcript, placeholder included
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn context_path(&self) -> Option<String> {
        self.lock().context_path.clone()
    }

    /// Append a system notice, e.g. when a repository finishes loading
    pub fn notice(&self, text: impl Into<String>) {
        self.lock().messages.push(ChatMessage::new(Role::System, text));
        self.events.publish(SessionEvent::MessageAppended { role: Role::System });
    }

    /// Ask a question about the file currently on screen.
    ///
    /// Blank input and sends while a request is in flight are ignored
    /// without touching the transcript. The file context is captured
    /// before the request goes out; selecting another file meanwhile does
    /// not change what this request was about.
    pub async fn send(&self, query: &str) -> SendOutcome {
        let (request, placeholder) = match self.begin(query.trim()) {
            Ok(started) => started,
            Err(reason) => {
                tracing::debug!(?reason, "chat send ignored");
                return SendOutcome::Ignored(reason);
            }
        };

        let mut guard = PendingGuard {
            chat: self,
            placeholder: Some(placeholder),
        };
        let result = self.backend.chat(&request).await;
        guard.placeholder = None;

        self.finish(placeholder, result)
    }

    fn begin(&self, query: &str) -> Result<(ChatRequest, Uuid), IgnoreReason> {
        if query.is_empty() {
            return Err(IgnoreReason::EmptyInput);
        }

        let mut session = self.lock();
        if session.state != ChatState::Idle {
            return Err(IgnoreReason::RequestInFlight);
        }

        session.messages.push(ChatMessage::new(Role::User, query));
        let placeholder = ChatMessage::placeholder();
        let id = placeholder.id;
        session.messages.push(placeholder);
        self.transition(&mut session, ChatState::Sending);

        let context = self.context();
        session.context_path = context.path.clone();
        session.pending = Some(id);
        self.transition(&mut session, ChatState::AwaitingResponse);
        drop(session);

        self.events.publish(SessionEvent::MessageAppended { role: Role::User });
        Ok((
            ChatRequest {
                query: query.to_string(),
                context,
            },
            id,
        ))
    }

    fn finish(&self, placeholder: Uuid, result: Result<TextReply, BackendError>) -> SendOutcome {
        let mut session = self.lock();
        session.messages.retain(|m| m.id != placeholder);
        session.pending = None;

        let (message, answered) = match result {
            Ok(reply) => (
                ChatMessage::new(Role::Assistant, markdown::render(&reply.text)),
                true,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "chat request failed");
                (ChatMessage::new(Role::Error, err.user_message()), false)
            }
        };
        session.messages.push(message.clone());
        self.transition(&mut session, ChatState::Idle);
        drop(session);

        self.events.publish(SessionEvent::MessageAppended { role: message.role });
        if answered {
            SendOutcome::Answered(message)
        } else {
            SendOutcome::Failed(message)
        }
    }

    fn abandon(&self, placeholder: Uuid) {
        let mut session = self.lock();
        if session.pending != Some(placeholder) {
            return;
        }
        tracing::debug!("chat request abandoned before a reply arrived");
        session.messages.retain(|m| m.id != placeholder);
        session.pending = None;
        self.transition(&mut session, ChatState::Idle);
    }

    fn transition(&self, session: &mut ChatSession, next: ChatState) {
        tracing::debug!(from = ?session.state, to = ?next, "chat state");
        session.state = next;
        self.events.publish(SessionEvent::ChatStateChanged(next));
    }

    fn context(&self) -> ChatContext {
        match self.cache.current_entry() {
            Some(entry) => ChatContext {
                content: Some(entry.content.context_text()),
                path: Some(entry.path),
            },
            None => ChatContext::default(),
        }
    }
}
