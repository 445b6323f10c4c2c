//! Session registry
//!
//! Owns every live session. The map lock is held only for insert, lookup
//! and remove; connecting and quitting happen outside it so one slow
//! server never blocks unrelated sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use super::handle::Session;
use super::state::{SessionId, SessionStatus};
use crate::error::{IrcBookError, Result};

/// Registry of live IRC sessions
pub struct SessionRegistry {
    manager: ConnectionManager,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    quit_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(manager: ConnectionManager) -> Self {
        let quit_timeout = manager.config().quit_timeout();
        Self {
            manager,
            sessions: Mutex::new(HashMap::new()),
            quit_timeout,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Reuse a healthy session or connect a new one
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SessionId> {
        let existing: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock().await;
            sessions.values().cloned().collect()
        };

        let mut stale = Vec::new();
        for session in existing {
            if self.manager.is_healthy(&session).await {
                debug!("Reusing session {}", session.id());
                return Ok(session.id().clone());
            }
            stale.push(session.id().clone());
        }
        for id in stale {
            info!("Dropping unhealthy session {}", id);
            self.close(&id).await;
        }

        let session = self.manager.connect(cancel).await?;
        let id = session.id().clone();
        let total = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(id.clone(), session);
            sessions.len()
        };
        info!("Registered session {} (total: {})", id, total);
        Ok(id)
    }

    /// Look up a live session
    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| IrcBookError::session_error_with_id("Unknown session", id.as_str()))
    }

    /// Quit and forget a session; unknown ids are ignored
    pub async fn close(&self, id: &SessionId) {
        let removed = self.sessions.lock().await.remove(id);
        match removed {
            Some(session) => session.close(self.quit_timeout).await,
            None => debug!("Session {} already gone", id),
        }
    }

    /// Close every session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }
        info!("Closing {} session(s)", sessions.len());
        join_all(sessions.iter().map(|s| s.close(self.quit_timeout))).await;
    }

    /// Status snapshots of all sessions
    pub async fn list(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(sessions.len());
        for session in sessions {
            statuses.push(session.status().await);
        }
        statuses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Ok(sessions) = self.sessions.try_lock() {
            if !sessions.is_empty() {
                warn!("Session registry dropped with {} open session(s)", sessions.len());
            }
        }
    }
}
