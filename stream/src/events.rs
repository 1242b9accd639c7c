//! Observable session progress.
//!
//! The upload session is opened asynchronously and finishes asynchronously,
//! so everything a caller may want to wait for is published on a
//! [`tokio::sync::watch`] channel: the session handle once it exists, and
//! exactly one terminal [`Outcome`].

use tokio::sync::watch;

use crate::coordinator::SessionState;
use crate::error::UploadError;
use crate::store::{ObjectDescriptor, SessionToken};

/// Terminal result of an upload session.
#[derive(Clone, Debug)]
pub enum Outcome {
    Pending,
    Completed(ObjectDescriptor),
    Failed(UploadError),
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Status {
    pub state: SessionState,
    pub token: Option<SessionToken>,
    pub outcome: Outcome,
}

impl Status {
    pub fn opening() -> Self {
        Status {
            state: SessionState::Opening,
            token: None,
            outcome: Outcome::Pending,
        }
    }
}

/// Receiver side of an upload's notifications.
///
/// Obtained from [`crate::UploadStream::events`]; may be cloned and moved to
/// other tasks.
#[derive(Clone, Debug)]
pub struct UploadEvents {
    rx: watch::Receiver<Status>,
}

impl UploadEvents {
    pub(crate) fn new(rx: watch::Receiver<Status>) -> Self {
        Self { rx }
    }

    pub fn state(&self) -> SessionState {
        self.rx.borrow().state
    }

    /// Resolves once the store has opened the upload session.
    ///
    /// Fails with the session's error if it ended before a session existed.
    pub async fn ready(&mut self) -> Result<SessionToken, UploadError> {
        let settled = match self
            .rx
            .wait_for(|s| s.token.is_some() || !s.outcome.is_pending())
            .await
        {
            Ok(status) => Some(status.clone()),
            Err(_) => None,
        };
        let status = settled.unwrap_or_else(|| self.rx.borrow().clone());
        match (status.token, status.outcome) {
            (Some(token), _) => Ok(token),
            (None, Outcome::Failed(err)) => Err(err),
            (None, _) => Err(UploadError::Cancelled),
        }
    }

    /// Resolves with the terminal outcome of the session.
    pub async fn outcome(&mut self) -> Outcome {
        let settled = match self.rx.wait_for(|s| !s.outcome.is_pending()).await {
            Ok(status) => Some(status.outcome.clone()),
            Err(_) => None,
        };
        match settled.unwrap_or_else(|| self.rx.borrow().outcome.clone()) {
            // the stream went away without ever settling
            Outcome::Pending => Outcome::Failed(UploadError::Cancelled),
            settled => settled,
        }
    }
}
