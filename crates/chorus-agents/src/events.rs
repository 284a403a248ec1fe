//! Synchronous publish/subscribe bus used for session-local and global
//! lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Value, json};

pub const THINKING: &str = "thinking";
pub const CHUNK: &str = "chunk";
pub const TOOL_CALL: &str = "toolCall";
pub const TOOL_RESULT: &str = "toolResult";
pub const RESPONSE: &str = "response";
pub const ERROR: &str = "error";
pub const SWITCHED: &str = "switched";
pub const CONVERSATION_RESET: &str = "conversationReset";

/// Events a chat session re-emits on the global bus.
pub const SESSION_EVENTS: [&str; 8] = [
    THINKING,
    CHUNK,
    TOOL_CALL,
    TOOL_RESULT,
    RESPONSE,
    ERROR,
    SWITCHED,
    CONVERSATION_RESET,
];

/// Listener registered under this name receives every event.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentEvent {
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

struct Listener {
    id: SubscriptionId,
    event: String,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Listener {
            id,
            event: event.to_string(),
            handler,
        });
        id
    }

    /// Returns `false` if the subscription was already removed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Handlers run on the caller's task, outside the listener lock, so they
    /// may subscribe, unsubscribe or emit on other buses.
    pub fn emit(&self, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = self
            .lock()
            .iter()
            .filter(|l| l.event == event || l.event == WILDCARD)
            .map(|l| Arc::clone(&l.handler))
            .collect();
        if handlers.is_empty() {
            return;
        }

        let event = AgentEvent {
            name: event.to_string(),
            payload,
        };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().iter().filter(|l| l.event == event).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Attach `sessionId` to an event payload. Objects gain a field; anything
/// else is wrapped under `data`.
pub fn with_session_id(payload: &Value, session_id: &str) -> Value {
    match payload {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
            Value::Object(map)
        }
        Value::Null => json!({ "sessionId": session_id }),
        other => json!({ "sessionId": session_id, "data": other }),
    }
}
