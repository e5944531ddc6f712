//! In-memory conversation sessions.
//!
//! A session is an ordered list of query/response turns keyed by an opaque
//! id. Only the last `max_history` turns are rendered into the prompt, and
//! at most `max_turns` are retained per session. At most `max_sessions`
//! sessions are kept; starting one more evicts the least recently used.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Instant;

use crate::config::SessionConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub query: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

struct Session {
    turns: VecDeque<Turn>,
    last_active: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            turns: VecDeque::new(),
            last_active: Instant::now(),
        }
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    max_history: usize,
    max_turns: usize,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_history: usize, max_turns: usize, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history,
            max_turns: max_turns.max(1),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_history, config.max_turns, config.max_sessions)
    }

    /// Start an empty session and return its id.
    pub fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().unwrap();
        self.make_room(&mut sessions);
        sessions.insert(id.clone(), Session::new());
        id
    }

    /// Evict least recently used sessions until one more fits.
    fn make_room(&self, sessions: &mut HashMap<String, Session>) {
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, session)| session.last_active)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    tracing::debug!(session = %id, "evicted idle session");
                }
                None => break,
            }
        }
    }

    /// Return `session_id` if one was given, otherwise a fresh session's id.
    /// Ids the manager has not seen are accepted and start empty.
    pub fn resolve(&self, session_id: Option<&str>) -> String {
        match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.create_session(),
        }
    }

    /// Record one exchange, creating the session if needed.
    pub fn append(&self, session_id: &str, query: &str, response: &str) {
        let mut sessions = self.sessions.write().unwrap();
        if !sessions.contains_key(session_id) {
            self.make_room(&mut sessions);
        }
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.last_active = Instant::now();
        session.turns.push_back(Turn {
            query: query.to_string(),
            response: response.to_string(),
            created_at: Utc::now(),
        });
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
    }

    /// All retained turns, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .map(|session| session.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `max_history` turns as `User: ...` / `Assistant: ...` lines,
    /// or `None` when there is nothing to show.
    pub fn formatted_history(&self, session_id: &str) -> Option<String> {
        if self.max_history == 0 {
            return None;
        }
        let sessions = self.sessions.read().unwrap();
        let turns = &sessions.get(session_id)?.turns;
        if turns.is_empty() {
            return None;
        }

        let skip = turns.len().saturating_sub(self.max_history);
        let lines: Vec<String> = turns
            .iter()
            .skip(skip)
            .map(|t| format!("User: {}\nAssistant: {}", t.query, t.response))
            .collect();
        Some(lines.join("\n"))
    }

    /// Forget a session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().unwrap().contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}
