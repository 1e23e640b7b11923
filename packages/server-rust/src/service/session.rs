//! Scoped ownership of a transport session.

use tracing::warn;

use crate::transport::{TransportError, TransportSession};

/// Owns the session of one batch and releases it exactly once.
///
/// [`release`](SessionGuard::release) closes the session gracefully. A guard
/// dropped without being released (an early return or an error unwinding the
/// batch loop) aborts the session instead.
pub struct SessionGuard {
    session: Option<Box<dyn TransportSession>>,
    receiver_name: String,
}

impl SessionGuard {
    pub fn new(session: Option<Box<dyn TransportSession>>, receiver_name: impl Into<String>) -> Self {
        Self {
            session,
            receiver_name: receiver_name.into(),
        }
    }

    /// The session to hand to each send, if the transport opened one.
    pub fn session_mut(&mut self) -> Option<&mut dyn TransportSession> {
        match &mut self.session {
            Some(session) => Some(session.as_mut()),
            None => None,
        }
    }

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error. The session is released either way.
    pub async fn release(mut self) -> Result<(), TransportError> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            warn!(receiver = %self.receiver_name, "aborting transport session that was not released");
            session.abort();
        }
    }
}
