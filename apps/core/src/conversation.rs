//! Bounded per-session chat history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a session. `sequence` increases monotonically per session
/// and is never reused, even after old turns are dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Session {
    turns: VecDeque<ConversationTurn>,
    next_sequence: u64,
}

impl Session {
    fn push(&mut self, role: Role, text: String, max_turns: usize) {
        self.turns.push_back(ConversationTurn {
            role,
            text,
            sequence: self.next_sequence,
            created_at: Utc::now(),
        });
        self.next_sequence += 1;
        if self.turns.len() > max_turns {
            while self.turns.len() > max_turns {
                self.turns.pop_front();
            }
            // Eviction never leaves a reply without its question.
            while self.turns.front().is_some_and(|turn| turn.role == Role::Assistant) {
                self.turns.pop_front();
            }
        }
    }
}

/// Holds the last `max_turns` turns of every chat session.
#[derive(Debug)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one turn, dropping the oldest when the session is full.
    pub fn append(&self, session_id: &str, role: Role, text: impl Into<String>) {
        let mut sessions = self.lock();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(role, text.into(), self.max_turns);
    }

    /// Appends a user message and its reply under one lock, so concurrent
    /// exchanges on the same session never interleave.
    pub fn append_exchange(&self, session_id: &str, user: impl Into<String>, assistant: impl Into<String>) {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        session.push(Role::User, user.into(), self.max_turns);
        session.push(Role::Assistant, assistant.into(), self.max_turns);
    }

    /// Turns of a session, oldest first. Unknown sessions are empty.
    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.lock()
            .get(session_id)
            .map(|session| session.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes a session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
