//! Typed notifications between the core components and whatever view is
//! bound to them.

use crate::chat::{ChatState, Role};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TreeLoaded { files: usize },
    TreeFailed { reason: String },
    FileLoading { path: String },
    FileSelected { path: String },
    FileFailed { path: String, reason: String },
    ChatStateChanged(ChatState),
    MessageAppended { role: Role },
    ExplainStarted { path: String },
    ExplainReady { path: String },
    ExplainFailed { path: String, reason: String },
}

/// Fan-out of [`SessionEvent`]s to every live subscriber.
///
/// A subscriber that dropped its receiver is pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::Sender<SessionEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
