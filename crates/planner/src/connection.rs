//! Connection ownership as seen by relations.
//!
//! A [`Connection`] is owned by exactly one session. Relations hold a [`ConnectionRef`], a weak
//! observer that can tell whether the connection is still open but never keeps it alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use trel_common::{ConnectionId, Result, TrelError};

#[derive(Debug)]
struct ConnectionState {
    id: ConnectionId,
    open: AtomicBool,
    active: AtomicBool,
}

/// Owning handle. Dropping or closing it invalidates every relation built on it.
#[derive(Debug)]
pub struct Connection {
    state: Arc<ConnectionState>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::open()
    }
}

impl Connection {
    pub fn open() -> Self {
        Self {
            state: Arc::new(ConnectionState {
                id: ConnectionId::next(),
                open: AtomicBool::new(true),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.state.id
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.state.open.store(false, Ordering::Release);
    }

    /// Non-owning observer for relations.
    pub fn downgrade(&self) -> ConnectionRef {
        ConnectionRef {
            id: self.state.id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Mark the logical session active. Fails fast if it already is.
    pub fn enter(&self) -> Result<ActiveSession> {
        if !self.is_open() {
            return Err(TrelError::ConnectionUnavailable {
                operation: "enter".to_string(),
                reason: format!("{} is closed", self.state.id),
            });
        }
        if self
            .state
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TrelError::ConnectionUnavailable {
                operation: "enter".to_string(),
                reason: format!("{} already has an active session", self.state.id),
            });
        }
        Ok(ActiveSession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Guard for an entered session; leaving scope releases it.
#[derive(Debug)]
pub struct ActiveSession {
    state: Arc<ConnectionState>,
}

impl ActiveSession {
    pub fn connection_id(&self) -> ConnectionId {
        self.state.id
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::Release);
    }
}

/// Weak observer of a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionRef {
    id: ConnectionId,
    state: Weak<ConnectionState>,
}

impl PartialEq for ConnectionRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionRef {}

impl ConnectionRef {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state
            .upgrade()
            .map(|s| s.open.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Fail with `ConnectionUnavailable` unless the owning connection is still open.
    pub fn ensure_open(&self, operation: &str) -> Result<()> {
        match self.state.upgrade() {
            Some(s) if s.open.load(Ordering::Acquire) => Ok(()),
            Some(_) => Err(TrelError::ConnectionUnavailable {
                operation: operation.to_string(),
                reason: format!("{} was closed", self.id),
            }),
            None => Err(TrelError::ConnectionUnavailable {
                operation: operation.to_string(),
                reason: format!("{} was dropped", self.id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_observe_close_and_drop() {
        let conn = Connection::open();
        let r = conn.downgrade();
        assert!(r.ensure_open("collect").is_ok());
        conn.close();
        let err = r.ensure_open("collect").expect_err("closed");
        assert!(err.to_string().contains("was closed"), "err={err}");

        let conn2 = Connection::open();
        let r2 = conn2.downgrade();
        drop(conn2);
        assert!(!r2.is_open());
        assert!(r2.ensure_open("keep").unwrap_err().to_string().contains("was dropped"));
    }

    #[test]
    fn re_entering_an_active_session_fails_fast() {
        let conn = Connection::open();
        let guard = conn.enter().expect("first enter");
        let err = conn.enter().expect_err("second enter");
        assert!(matches!(err, TrelError::ConnectionUnavailable { .. }));
        drop(guard);
        assert!(conn.enter().is_ok());
    }
}
