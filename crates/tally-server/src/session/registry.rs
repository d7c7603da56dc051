//! Registry of live sessions.
//!
//! Assigns session ids, enforces the concurrent-session cap, and answers
//! listing queries. Session state itself lives in the connection task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tally_core::{TallyError, TallyResult};
use tokio::sync::RwLock;
use tracing::info;

struct SessionEntry {
    peer: SocketAddr,
    created_at: Instant,
}

/// Information returned when listing sessions.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub peer: SocketAddr,
    pub age_secs: u64,
}

/// Tracks all active sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session for `peer` and return its id.
    pub async fn register(&self, peer: SocketAddr) -> TallyResult<String> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(TallyError::SessionLimit(self.max_sessions));
        }

        let session_id = generate_session_id();
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                peer,
                created_at: Instant::now(),
            },
        );
        info!(session_id = %session_id, peer = %peer, active = sessions.len(), "session opened");
        Ok(session_id)
    }

    /// Remove a session once its connection is gone.
    pub async fn remove(&self, session_id: &str) -> TallyResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(session_id) {
            Some(entry) => {
                info!(
                    session_id,
                    lifetime_secs = entry.created_at.elapsed().as_secs(),
                    "session closed"
                );
                Ok(())
            }
            None => Err(TallyError::SessionNotFound(session_id.to_string())),
        }
    }

    /// List all active sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                peer: s.peer,
                age_secs: s.created_at.elapsed().as_secs(),
            })
            .collect()
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}
