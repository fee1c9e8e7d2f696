//! Connection state machine.
//!
//! ```text
//! Disconnected -> Handshaking -> Syncing -> Relaying -> Disconnected
//!                      |             |
//!                      +-------------+---------------> Disconnected
//! ```
//!
//! The final `Disconnected` is terminal. A new attempt is a new connection.

use std::fmt;

use tokio::sync::watch;

use crate::error::{Result, SyncError};

/// Where a neighbor connection is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Syncing,
    Relaying,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Relaying => "relaying",
        };
        f.write_str(name)
    }
}

/// Publishes state changes and rejects transitions the machine forbids.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
    finished: bool,
}

impl StateCell {
    pub(crate) fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                tx,
                finished: false,
            },
            rx,
        )
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn transition(&mut self, to: ConnectionState) -> Result<()> {
        use ConnectionState::*;

        let from = self.current();
        let allowed = !self.finished
            && matches!(
                (from, to),
                (Disconnected, Handshaking)
                    | (Handshaking, Syncing)
                    | (Syncing, Relaying)
                    | (Handshaking | Syncing | Relaying, Disconnected)
            );
        if !allowed {
            return Err(SyncError::InvalidTransition { from, to });
        }
        if to == Disconnected {
            self.finished = true;
        }
        self.tx.send_replace(to);
        Ok(())
    }

    /// Collapse to the terminal state from wherever we are.
    pub(crate) fn finish(&mut self) {
        self.finished = true;
        self.tx.send_replace(ConnectionState::Disconnected);
    }
}
