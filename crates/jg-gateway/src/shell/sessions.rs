//! Registry of live shell sessions

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use jg_protocol::PodName;

/// Gateway-local handle of a streaming session, logged as `shell-N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shell-{}", self.0)
    }
}

/// Tracks every streaming shell session so shutdown can end them
pub struct ShellSessions {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    /// Next session ID to allocate
    next_id: AtomicU64,
}

/// Handle to a live session
pub struct SessionHandle {
    pub id: SessionId,
    /// Container the session is attached to
    pub pod: PodName,
    pub started_at: Instant,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// End the session; its workers observe the token and unwind
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl ShellSessions {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a session that runs until `cancel` fires
    pub fn register(&self, pod: PodName, cancel: CancellationToken) -> Arc<SessionHandle> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(SessionHandle {
            id,
            pod,
            started_at: Instant::now(),
            cancel,
        });
        self.sessions.insert(id, Arc::clone(&handle));
        handle
    }

    /// Forget a finished session
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&id).map(|(_, handle)| handle)
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Cancel every live session. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.list();
        for session in &sessions {
            session.cancel();
        }
        sessions.len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ShellSessions {
    fn default() -> Self {
        Self::new()
    }
}
