//! Session lifecycle: open, finalize or abort, and the terminal notification.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::PartResult;
use crate::error::{Operation, StoreError, UploadError};
use crate::events::{Outcome, Status, UploadEvents};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{CompletedPart, Destination, ObjectDescriptor, ObjectStoreClient, SessionToken};

/// Where an upload session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// `begin_upload` has not resolved yet
    Opening,
    /// Session open, parts are being accepted
    Pending,
    /// End of stream signalled, waiting for in-flight parts
    Draining,
    Completed,
    Aborted,
    /// Abort or finalize failed; the store may hold an orphaned upload
    Failed,
    /// `begin_upload` failed, there is no session to finalize or abort
    Rejected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Aborted
                | SessionState::Failed
                | SessionState::Rejected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Opening => "opening",
            SessionState::Pending => "pending",
            SessionState::Draining => "draining",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
            SessionState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Owns the session state and issues the single finalize or abort call.
///
/// State lives in a watch channel so that observers see every transition;
/// the coordinator is the only writer apart from the begin task it spawns.
pub(crate) struct CompletionCoordinator {
    client: Arc<dyn ObjectStoreClient>,
    retry: RetryConfig,
    destination: Destination,
    status: Arc<watch::Sender<Status>>,
    settled: bool,
}

impl CompletionCoordinator {
    pub fn new(client: Arc<dyn ObjectStoreClient>, destination: Destination, retry: RetryConfig) -> Self {
        let (status, _) = watch::channel(Status::opening());
        Self {
            client,
            retry,
            destination,
            status: Arc::new(status),
            settled: false,
        }
    }

    pub fn subscribe(&self) -> UploadEvents {
        UploadEvents::new(self.status.subscribe())
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.status.borrow().token.clone()
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Spawn the `begin_upload` call. The task publishes the session token,
    /// or the rejection, as soon as the store answers.
    pub fn open(&self) -> JoinHandle<Result<SessionToken, UploadError>> {
        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        let destination = self.destination.clone();
        let status = Arc::clone(&self.status);

        tokio::spawn(async move {
            let client = &client;
            let target = &destination;
            let result = with_retry(Operation::Begin, &retry, move || client.begin_upload(target))
                .await
                .map_err(|err| err.into_upload_error(Operation::Begin));

            match &result {
                Ok(token) => {
                    log::info!("opened multipart upload {}", token);
                    // the stream may have been abandoned while opening
                    status.send_if_modified(|s| {
                        if s.state.is_terminal() {
                            return false;
                        }
                        s.state = SessionState::Pending;
                        s.token = Some(token.clone());
                        true
                    });
                }
                Err(err) => {
                    log::warn!("failed to open multipart upload for {}: {}", destination, err);
                    publish_rejection(&status, err.clone());
                }
            }
            result
        })
    }

    /// Record a begin task that died without publishing anything.
    pub fn rejected(&self, err: UploadError) {
        publish_rejection(&self.status, err);
    }

    /// `Pending → Draining`.
    pub fn begin_draining(&mut self) -> Result<(), UploadError> {
        match self.state() {
            SessionState::Pending => {
                self.transition(SessionState::Draining);
                Ok(())
            }
            state => Err(UploadError::State {
                operation: "end",
                state,
            }),
        }
    }

    /// Finalize with `parts`, in whatever order they completed.
    ///
    /// Part numbers must form `1..=n`; anything else aborts instead of
    /// finalizing.
    pub async fn complete(&mut self, mut parts: Vec<PartResult>) -> Result<ObjectDescriptor, UploadError> {
        self.expect_unsettled("complete")?;

        parts.sort_by_key(|p| p.part_number);
        if let Some((position, part)) = parts
            .iter()
            .enumerate()
            .find(|(i, p)| p.part_number as usize != i + 1)
        {
            let cause = UploadError::Permanent {
                operation: Operation::Complete,
                source: StoreError::Validation {
                    message: format!(
                        "expected part {} but found part {}",
                        position + 1,
                        part.part_number
                    ),
                },
            };
            return Err(self.abort(cause).await);
        }

        let Some(token) = self.token() else {
            return Err(UploadError::State {
                operation: "complete",
                state: self.state(),
            });
        };

        self.settled = true;
        let size = parts.iter().map(|p| p.size as u64).sum();
        let part_count = parts.len();
        let ordered: Vec<CompletedPart> = parts.into_iter().map(CompletedPart::from).collect();

        let client = &self.client;
        let target = &token;
        let result = with_retry(Operation::Complete, &self.retry, move || {
            client.complete_upload(target, ordered.clone())
        })
        .await;

        match result {
            Ok(object) => {
                let descriptor = ObjectDescriptor {
                    destination: self.destination.clone(),
                    e_tag: object.e_tag,
                    version: object.version,
                    size,
                    part_count,
                };
                log::info!(
                    "completed multipart upload {} ({} bytes in {} parts)",
                    token,
                    size,
                    part_count
                );
                self.finish(SessionState::Completed, Outcome::Completed(descriptor.clone()));
                Ok(descriptor)
            }
            Err(err) => {
                let err = err.into_upload_error(Operation::Complete);
                log::warn!("failed to complete multipart upload {}: {}", token, err);
                self.finish(SessionState::Failed, Outcome::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Abort the session because of `cause`, returning the error to surface:
    /// `cause` itself when the abort went through, [`UploadError::AbortFailure`]
    /// when it did not.
    pub async fn abort(&mut self, cause: UploadError) -> UploadError {
        if let Err(err) = self.expect_unsettled("abort") {
            return err;
        }
        self.settled = true;

        let Some(token) = self.token() else {
            // nothing was opened, so there is nothing to clean up
            self.finish(SessionState::Aborted, Outcome::Failed(cause.clone()));
            return cause;
        };

        log::warn!("aborting multipart upload {}: {}", token, cause);
        let client = &self.client;
        let target = &token;
        let result = with_retry(Operation::Abort, &self.retry, move || client.abort_upload(target)).await;

        match result {
            Ok(()) => {
                self.finish(SessionState::Aborted, Outcome::Failed(cause.clone()));
                cause
            }
            Err(err) => {
                let err = UploadError::AbortFailure {
                    upload_id: token.upload_id().to_string(),
                    cause: Box::new(cause),
                    source: Box::new(err.into_upload_error(Operation::Abort)),
                };
                log::error!("{}", err);
                self.finish(SessionState::Failed, Outcome::Failed(err.clone()));
                err
            }
        }
    }

    /// Give up without awaiting anything: publish a cancelled outcome and
    /// abort in the background if a runtime is available.
    pub fn abandon(&mut self, opening: Option<JoinHandle<Result<SessionToken, UploadError>>>) {
        if self.settled || self.state().is_terminal() {
            return;
        }
        self.settled = true;

        let token = self.token();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if token.is_some() || opening.is_some() => {
                let client = Arc::clone(&self.client);
                runtime.spawn(async move {
                    let token = match (token, opening) {
                        (Some(token), _) => token,
                        (None, Some(handle)) => match handle.await {
                            Ok(Ok(token)) => token,
                            _ => return,
                        },
                        (None, None) => return,
                    };
                    match client.abort_upload(&token).await {
                        Ok(()) => log::warn!("aborted abandoned multipart upload {}", token),
                        Err(err) => log::error!("failed to abort abandoned upload {}: {}", token, err),
                    }
                });
            }
            Ok(_) => {}
            Err(_) => {
                if let Some(token) = &token {
                    log::error!("upload {} dropped outside a runtime, it was not aborted", token);
                }
            }
        }
        self.finish(SessionState::Aborted, Outcome::Failed(UploadError::Cancelled));
    }

    fn expect_unsettled(&self, operation: &'static str) -> Result<(), UploadError> {
        let state = self.state();
        if self.settled || state.is_terminal() {
            return Err(UploadError::State { operation, state });
        }
        Ok(())
    }

    fn transition(&self, state: SessionState) {
        log::debug!("upload to {} is now {}", self.destination, state);
        self.status.send_modify(|s| s.state = state);
    }

    fn finish(&self, state: SessionState, outcome: Outcome) {
        log::debug!("upload to {} finished as {}", self.destination, state);
        self.status.send_modify(|s| {
            s.state = state;
            s.outcome = outcome;
        });
    }
}

fn publish_rejection(status: &watch::Sender<Status>, err: UploadError) {
    status.send_modify(|s| {
        if s.outcome.is_pending() {
            s.state = SessionState::Rejected;
            s.outcome = Outcome::Failed(err);
        }
    });
}
