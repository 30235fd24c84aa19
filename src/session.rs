//! The chat widget's session logic, lifted out of the DOM.
//!
//! The browser side of this system is glue: it collects text, renders
//! messages, and keeps history in local storage. What is worth modeling is
//! the state it carries and the rules for mutating it: an ordered history
//! anchored by a hidden system message. `ChatSession` owns that state over
//! an injected [`HistoryStore`], so the logic tests without a DOM or a real
//! storage backend.
use crate::models::CompletionPayload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key under which the widget persists its serialized history.
pub const STORAGE_KEY: &str = "chat-widget-history";

/// Greeting the widget renders before any user turn, and again after a reset.
pub const GREETING: &str = "Hi! Ask me anything to get started.";

/// A single turn. Content is opaque to the session except when flattening an
/// assistant reply for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
}

impl Message {
    pub fn new(role: &str, content: impl Into<Value>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    fn is_system(&self) -> bool {
        self.role == "system"
    }
}

impl From<&Message> for Value {
    fn from(message: &Message) -> Value {
        serde_json::json!({"role": message.role, "content": message.content})
    }
}

#[derive(Debug, thiserror::Error)]
#[error("history store failed: {0}")]
pub struct StoreError(pub String);

/// Where history lives between page loads. The browser backs this with local
/// storage under [`STORAGE_KEY`]; tests and embedders back it with memory.
pub trait HistoryStore {
    fn load(&self) -> Result<Option<Vec<Message>>, StoreError>;
    fn save(&self, history: &[Message]) -> Result<(), StoreError>;
}

/// In-process stand-in for the widget's key-value store. History is held as
/// serialized JSON under [`STORAGE_KEY`], the way the browser holds it.
/// Cloning shares the backing map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<Vec<Message>> {
        let entries = self.entries.lock().ok()?;
        serde_json::from_str(entries.get(STORAGE_KEY)?).ok()
    }

    #[cfg(test)]
    fn insert_raw(&self, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(STORAGE_KEY.to_string(), value.to_string());
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Message>>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError("memory store poisoned".to_string()))?;
        // Unreadable history counts as absent; the session reseeds it.
        Ok(entries
            .get(STORAGE_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok()))
    }

    fn save(&self, history: &[Message]) -> Result<(), StoreError> {
        let serialized =
            serde_json::to_string(history).map_err(|e| StoreError(e.to_string()))?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError("memory store poisoned".to_string()))?;
        entries.insert(STORAGE_KEY.to_string(), serialized);
        Ok(())
    }
}

/// One conversation: ordered history whose first entry is always the system
/// message, persisted through the store after every mutation.
#[derive(Debug)]
pub struct ChatSession<S: HistoryStore> {
    history: Vec<Message>,
    system: Message,
    model: String,
    store: S,
}

impl<S: HistoryStore> ChatSession<S> {
    /// Opens a session on top of `store`. A missing history, or one that has
    /// lost its leading system entry, is reset to just the system message.
    pub fn open(store: S, system_prompt: &str, model: &str) -> Result<Self, StoreError> {
        let system = Message::new("system", system_prompt);
        let history = match store.load()? {
            Some(history) if history.first().is_some_and(Message::is_system) => history,
            _ => {
                let history = vec![system.clone()];
                store.save(&history)?;
                history
            }
        };
        Ok(Self {
            history,
            system,
            model: model.to_string(),
            store,
        })
    }

    /// Submits user input. Blank input is a no-op; otherwise the user turn is
    /// appended, persisted, and the full history (system message included)
    /// comes back as the payload to send to the relay.
    pub fn submit(&mut self, text: &str) -> Result<Option<CompletionPayload>, StoreError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        self.history.push(Message::new("user", trimmed));
        self.store.save(&self.history)?;

        Ok(Some(CompletionPayload {
            model: self.model.clone(),
            messages: self.history.iter().map(Value::from).collect(),
        }))
    }

    /// Records the relay's answer and returns the text to render. JSON bodies
    /// yield `choices[0].message.content` flattened to a string; anything
    /// else is rendered as-is. Call this only for successful requests, since
    /// a failed request must leave history untouched.
    pub fn absorb_response(&mut self, body: &str) -> Result<String, StoreError> {
        let reply = serde_json::from_str::<Value>(body)
            .ok()
            .as_ref()
            .and_then(assistant_text)
            .unwrap_or_else(|| body.to_string());

        self.history.push(Message::new("assistant", reply.clone()));
        self.store.save(&self.history)?;
        Ok(reply)
    }

    /// History minus the leading system entry, in render order. The system
    /// message is never shown.
    pub fn visible(&self) -> &[Message] {
        &self.history[1..]
    }

    /// Lines the widget renders: [`GREETING`] while no turn is visible,
    /// otherwise each visible turn flattened to text.
    pub fn rendered(&self) -> Vec<String> {
        if self.visible().is_empty() {
            return vec![GREETING.to_string()];
        }
        self.visible().iter().map(display_text).collect()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Clears the conversation back to exactly the system message.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.history = vec![self.system.clone()];
        self.store.save(&self.history)
    }
}

/// The shapes `choices[0].message.content` arrives in. Each maps
/// deterministically to the flat string the widget renders.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantContent {
    PlainText(String),
    PartList(Vec<Value>),
    StructuredObject(Map<String, Value>),
}

impl AssistantContent {
    pub fn classify(content: &Value) -> Option<Self> {
        match content {
            Value::String(text) => Some(Self::PlainText(text.clone())),
            Value::Array(parts) => Some(Self::PartList(parts.clone())),
            Value::Object(map) => Some(Self::StructuredObject(map.clone())),
            _ => None,
        }
    }

    pub fn flatten(&self) -> String {
        match self {
            Self::PlainText(text) => text.clone(),
            Self::PartList(parts) => parts.iter().filter_map(part_text).collect::<Vec<_>>().join(""),
            Self::StructuredObject(map) => match map.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => Value::Object(map.clone()).to_string(),
            },
        }
    }
}

/// The flat string a stored message renders as.
fn display_text(message: &Message) -> String {
    match AssistantContent::classify(&message.content) {
        Some(content) => content.flatten(),
        None => message.content.to_string(),
    }
}

fn part_text(part: &Value) -> Option<String> {
    match part {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Extracts the assistant turn from a completion response body, or `None`
/// when the response does not carry the expected shape.
pub fn assistant_text(response: &Value) -> Option<String> {
    let content = response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;
    AssistantContent::classify(content).map(|content| content.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SYSTEM_PROMPT: &str = "You are a helpful assistant. Stay on topic.";

    fn open_session(store: MemoryStore) -> ChatSession<MemoryStore> {
        ChatSession::open(store, SYSTEM_PROMPT, "gpt-4o-mini").unwrap()
    }

    #[test]
    fn fresh_store_seeds_system_message() {
        let store = MemoryStore::new();
        let session = open_session(store.clone());

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, "system");
        assert!(session.visible().is_empty());
        // The seed is persisted immediately.
        assert_eq!(store.contents().unwrap().len(), 1);
    }

    #[test]
    fn fresh_session_renders_the_greeting() {
        let session = open_session(MemoryStore::new());
        assert_eq!(session.rendered(), vec![GREETING.to_string()]);
    }

    #[test]
    fn unreadable_persisted_history_is_reseeded() {
        let store = MemoryStore::new();
        store.insert_raw("not even json");

        let session = open_session(store.clone());

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, "system");
        assert_eq!(store.contents().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_store_resets_to_system_message() {
        let store = MemoryStore::new();
        store
            .save(&[Message::new("user", "orphaned turn")])
            .unwrap();

        let session = open_session(store.clone());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, "system");
    }

    #[test]
    fn existing_history_is_reloaded() {
        let store = MemoryStore::new();
        {
            let mut session = open_session(store.clone());
            session.submit("Hello").unwrap();
        }

        let session = open_session(store);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.visible()[0].content, json!("Hello"));
    }

    #[test]
    fn submit_appends_persists_and_builds_payload() {
        let store = MemoryStore::new();
        let mut session = open_session(store.clone());

        let payload = session.submit("Hello").unwrap().unwrap();

        assert_eq!(payload.model, "gpt-4o-mini");
        assert_eq!(payload.messages.len(), 2);
        assert_eq!(payload.messages[0]["role"], "system");
        assert_eq!(payload.messages[0]["content"], SYSTEM_PROMPT);
        assert_eq!(payload.messages[1]["role"], "user");
        assert_eq!(payload.messages[1]["content"], "Hello");

        let persisted = store.contents().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1], Message::new("user", "Hello"));
    }

    #[test]
    fn blank_input_is_a_no_op() {
        let store = MemoryStore::new();
        let mut session = open_session(store.clone());

        assert!(session.submit("   ").unwrap().is_none());
        assert_eq!(session.history().len(), 1);
        assert_eq!(store.contents().unwrap().len(), 1);
    }

    #[test]
    fn submitted_text_is_trimmed() {
        let mut session = open_session(MemoryStore::new());
        let payload = session.submit("  Hello  ").unwrap().unwrap();
        assert_eq!(payload.messages[1]["content"], "Hello");
    }

    #[test]
    fn absorb_plain_text_reply() {
        let mut session = open_session(MemoryStore::new());
        session.submit("Hi").unwrap();

        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Hello there"}}]});
        let reply = session.absorb_response(&body.to_string()).unwrap();

        assert_eq!(reply, "Hello there");
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.history()[2].role, "assistant");
    }

    #[test]
    fn absorb_falls_back_to_raw_body() {
        let mut session = open_session(MemoryStore::new());
        session.submit("Hi").unwrap();

        let reply = session.absorb_response("upstream said something odd").unwrap();
        assert_eq!(reply, "upstream said something odd");
    }

    #[test]
    fn reset_returns_to_system_only() {
        let store = MemoryStore::new();
        let mut session = open_session(store.clone());
        session.submit("Hello").unwrap();
        session.absorb_response(r#"{"choices":[{"message":{"content":"Hi"}}]}"#)
            .unwrap();

        assert_eq!(session.rendered(), vec!["Hello", "Hi"]);

        session.reset().unwrap();

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, "system");
        assert_eq!(store.contents().unwrap().len(), 1);
        assert!(session.visible().is_empty());
        // The widget is back to its initial view.
        assert_eq!(session.rendered(), vec![GREETING.to_string()]);
    }

    #[test]
    fn classify_rejects_scalars() {
        assert!(AssistantContent::classify(&json!(42)).is_none());
        assert!(AssistantContent::classify(&json!(null)).is_none());
    }

    #[test]
    fn flatten_plain_text() {
        let content = AssistantContent::classify(&json!("hello")).unwrap();
        assert_eq!(content.flatten(), "hello");
    }

    #[test]
    fn flatten_part_list() {
        let content = AssistantContent::classify(&json!([
            {"type": "text", "text": "Hello "},
            {"type": "text", "text": "world"},
            {"type": "image", "url": "ignored"},
            "!"
        ]))
        .unwrap();
        assert_eq!(content.flatten(), "Hello world!");
    }

    #[test]
    fn flatten_structured_object_with_text_field() {
        let content = AssistantContent::classify(&json!({"text": "inner"})).unwrap();
        assert_eq!(content.flatten(), "inner");
    }

    #[test]
    fn flatten_structured_object_without_text_field() {
        let content = AssistantContent::classify(&json!({"data": 1})).unwrap();
        assert_eq!(content.flatten(), r#"{"data":1}"#);
    }

    #[test]
    fn assistant_text_requires_expected_shape() {
        assert!(assistant_text(&json!({"choices": []})).is_none());
        assert!(assistant_text(&json!({"error": "nope"})).is_none());
        assert_eq!(
            assistant_text(&json!({"choices": [{"message": {"content": "ok"}}]})),
            Some("ok".to_string())
        );
    }
}
