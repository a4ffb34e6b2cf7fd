//! Per-chat session data
//!
//! Everything a chat owns lives here and dies with it: the id used on the
//! wire, the conversation history, and the ended flag.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent_api::ChatMessage;

/// Monotonic "chat has ended" flag. There is no way to clear it.
#[derive(Debug, Default)]
pub struct EndedFlag(bool);

impl EndedFlag {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

#[derive(Debug)]
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    history: Vec<ChatMessage>,
    ended: EndedFlag,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
            history: Vec::new(),
            ended: EndedFlag::default(),
        }
    }

    /// New session with a random id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Replace the history with the server's copy (initial load)
    pub fn replace_history(&mut self, history: Vec<ChatMessage>) {
        self.history = history;
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_set()
    }

    pub fn mark_ended(&mut self) {
        if !self.ended.is_set() {
            log::info!(
                "Session: {} ended after {}s with {} messages",
                self.id,
                (Utc::now() - self.started_at).num_seconds(),
                self.history.len()
            );
        }
        self.ended.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new("s1");
        assert_eq!(session.id(), "s1");
        assert!(session.history().is_empty());
        assert!(!session.is_ended());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(Session::generate().id(), Session::generate().id());
    }

    #[test]
    fn test_ended_is_monotonic() {
        let mut session = Session::new("s1");
        session.mark_ended();
        session.mark_ended();
        assert!(session.is_ended());
    }

    #[test]
    fn test_history() {
        let mut session = Session::new("s1");
        session.replace_history(vec![ChatMessage::user("a")]);
        session.push(ChatMessage::assistant("b"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1], ChatMessage::assistant("b"));
    }
}
