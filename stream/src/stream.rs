//! The public byte sink.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::PartBuffer;
use crate::config::{UploadConfig, MIN_PART_SIZE};
use crate::coordinator::{CompletionCoordinator, SessionState};
use crate::dispatcher::UploadDispatcher;
use crate::error::{Operation, StoreError, UploadError};
use crate::events::UploadEvents;
use crate::store::{Destination, ObjectDescriptor, ObjectStoreClient, SessionToken};

/// Read size used by [`UploadStream::pipe`].
const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// A push-based byte sink.
///
/// Callers must respect the value returned by `write`: on `false`, wait for
/// [`ByteSink::drained`] before writing more.
#[async_trait]
pub trait ByteSink: Send {
    type Output: Send;

    /// Accept `data`. Returns `false` when the producer should pause.
    async fn write(&mut self, data: &[u8]) -> Result<bool, UploadError>;

    /// Resolves once writing may resume.
    async fn drained(&mut self) -> Result<(), UploadError>;

    /// Signal that no more bytes will be written and wait for the result.
    async fn end(&mut self) -> Result<Self::Output, UploadError>;

    async fn cancel(&mut self) -> Result<(), UploadError>;
}

/// Writes an unbounded byte stream to the object store as a multipart upload.
///
/// The upload session is requested on construction and opens in the
/// background; bytes written before it exists are queued, and `write`
/// reports backpressure once the queue passes the high-water mark. Parts are
/// uploaded concurrently, up to `max_concurrency` at a time. [`Self::end`]
/// flushes the tail, waits for every part and finalizes the object;
/// [`Self::cancel`], a permanent part failure or dropping the stream aborts it.
pub struct UploadStream {
    buffer: PartBuffer,
    dispatcher: UploadDispatcher,
    coordinator: CompletionCoordinator,
    opening: Option<JoinHandle<Result<SessionToken, UploadError>>>,
    high_water_mark: usize,
    cancellation: CancellationToken,
    ended: bool,
}

impl UploadStream {
    /// Start a multipart upload to `destination`. Fails with a config error
    /// when called outside a tokio runtime.
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        destination: Destination,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        if let Err(err) = tokio::runtime::Handle::try_current() {
            return Err(UploadError::Config {
                reason: format!("no tokio runtime to run the upload on: {}", err),
            });
        }
        if config.part_size < MIN_PART_SIZE {
            log::warn!(
                "part size {} is below the {} bytes most stores require",
                config.part_size,
                MIN_PART_SIZE
            );
        }

        let coordinator =
            CompletionCoordinator::new(Arc::clone(&client), destination, config.retry.clone());
        let opening = coordinator.open();

        Ok(Self {
            buffer: PartBuffer::new(config.part_size),
            dispatcher: UploadDispatcher::new(client, config.retry, config.max_concurrency),
            coordinator,
            opening: Some(opening),
            high_water_mark: config.high_water_mark,
            cancellation: CancellationToken::new(),
            ended: false,
        })
    }

    pub fn destination(&self) -> &Destination {
        self.coordinator.destination()
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    /// Subscribe to the ready and terminal notifications.
    pub fn events(&self) -> UploadEvents {
        self.coordinator.subscribe()
    }

    /// Token that cancels the upload from another task, including while the
    /// owner is suspended in [`Self::drained`] or [`Self::end`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Bytes accepted but not yet handed to the store
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len() + self.dispatcher.queued_bytes()
    }

    /// Append `data` to the object.
    ///
    /// Never waits for the store. Returns `Ok(false)` when the producer
    /// should pause until [`Self::drained`] resolves. Fails with a state
    /// error after `end`, `cancel` or a terminal state, leaving buffered
    /// data untouched.
    pub async fn write(&mut self, data: &[u8]) -> Result<bool, UploadError> {
        self.poll_opening().await?;
        self.check_writable("write")?;
        if self.cancellation.is_cancelled() {
            return Err(self.interrupted().await);
        }

        for part in self.buffer.append(data) {
            self.dispatcher.enqueue(part)?;
        }
        if let Err(err) = self.dispatcher.pump() {
            return Err(self.fail(err).await);
        }
        Ok(!self.needs_drain())
    }

    /// Resolves once `write` would no longer ask the producer to pause.
    pub async fn drained(&mut self) -> Result<(), UploadError> {
        self.poll_opening().await?;
        self.check_writable("wait for drain")?;
        let cancellation = self.cancellation.clone();
        loop {
            if cancellation.is_cancelled() {
                return Err(self.interrupted().await);
            }
            if self.opening.is_some() {
                let opened = tokio::select! {
                    opened = self.await_opening() => Some(opened),
                    _ = cancellation.cancelled() => None,
                };
                match opened {
                    Some(result) => result?,
                    None => continue,
                }
            }
            if let Err(err) = self.dispatcher.pump() {
                return Err(self.fail(err).await);
            }
            if !self.needs_drain() {
                return Ok(());
            }
            let settled = tokio::select! {
                settled = self.dispatcher.settle_one() => Some(settled),
                _ = cancellation.cancelled() => None,
            };
            if let Some(Err(err)) = settled {
                return Err(self.fail(err).await);
            }
        }
    }

    /// Signal end of stream: upload the remaining bytes, wait for every part
    /// and finalize the object.
    pub async fn end(&mut self) -> Result<ObjectDescriptor, UploadError> {
        self.poll_opening().await?;
        self.check_writable("end")?;
        self.ended = true;
        let cancellation = self.cancellation.clone();
        if cancellation.is_cancelled() {
            return Err(self.interrupted().await);
        }

        if self.opening.is_some() {
            let opened = tokio::select! {
                opened = self.await_opening() => Some(opened),
                _ = cancellation.cancelled() => None,
            };
            match opened {
                Some(result) => result?,
                None => return Err(self.interrupted().await),
            }
        }

        if let Some(last) = self.buffer.flush() {
            if let Err(err) = self.dispatcher.enqueue(last) {
                return Err(self.fail(err).await);
            }
        }
        self.coordinator.begin_draining()?;
        log::debug!(
            "draining upload to {} ({} bytes written, {} parts in flight)",
            self.destination(),
            self.buffer.total_bytes(),
            self.dispatcher.in_flight()
        );

        let settled = tokio::select! {
            settled = self.dispatcher.finish() => Some(settled),
            _ = cancellation.cancelled() => None,
        };
        match settled {
            Some(Ok(parts)) => self.coordinator.complete(parts).await,
            Some(Err(err)) => Err(self.fail(err).await),
            None => Err(self.interrupted().await),
        }
    }

    /// Abort the upload. In-flight part uploads are left to finish on their
    /// own and their results are ignored.
    pub async fn cancel(&mut self) -> Result<(), UploadError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(UploadError::State {
                operation: "cancel",
                state,
            });
        }
        match self.stop(UploadError::Cancelled).await {
            UploadError::Cancelled => Ok(()),
            err => Err(err),
        }
    }

    /// Copy `reader` into the upload until EOF, honouring backpressure, then
    /// finalize. A read error cancels the upload.
    pub async fn pipe<R>(&mut self, mut reader: R) -> Result<ObjectDescriptor, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut chunk = BytesMut::with_capacity(PIPE_CHUNK_SIZE);
        loop {
            chunk.clear();
            let read = match reader.read_buf(&mut chunk).await {
                Ok(read) => read,
                Err(err) => {
                    let cause = UploadError::Input {
                        message: err.to_string(),
                    };
                    return Err(self.stop(cause).await);
                }
            };
            if read == 0 {
                break;
            }
            if !self.write(&chunk).await? {
                self.drained().await?;
            }
        }
        self.end().await
    }

    fn needs_drain(&self) -> bool {
        self.dispatcher.is_saturated() || self.buffered_bytes() > self.high_water_mark
    }

    fn check_writable(&self, operation: &'static str) -> Result<(), UploadError> {
        let state = self.state();
        if self.ended || state.is_terminal() {
            let state = if self.ended && !state.is_terminal() {
                SessionState::Draining
            } else {
                state
            };
            return Err(UploadError::State { operation, state });
        }
        Ok(())
    }

    /// Pick up the session token if `begin_upload` has already answered.
    async fn poll_opening(&mut self) -> Result<(), UploadError> {
        let answered = match &self.opening {
            Some(handle) => handle.is_finished() || self.state() != SessionState::Opening,
            None => false,
        };
        if answered {
            self.await_opening().await?;
        }
        Ok(())
    }

    async fn await_opening(&mut self) -> Result<(), UploadError> {
        let Some(handle) = self.opening.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.opening = None;
        match joined {
            Ok(Ok(token)) => {
                self.dispatcher.open(token);
                Ok(())
            }
            Ok(Err(err)) => {
                self.dispatcher.detach();
                Err(err)
            }
            Err(join_err) => {
                let err = UploadError::Permanent {
                    operation: Operation::Begin,
                    source: StoreError::permanent(format!("begin task failed: {}", join_err)),
                };
                self.coordinator.rejected(err.clone());
                self.dispatcher.detach();
                Err(err)
            }
        }
    }

    /// A part failed for good: stop everything in flight and abort.
    async fn fail(&mut self, cause: UploadError) -> UploadError {
        self.ended = true;
        self.dispatcher.shutdown().await;
        self.coordinator.abort(cause).await
    }

    /// The cancellation token fired while an operation was running.
    async fn interrupted(&mut self) -> UploadError {
        self.stop(UploadError::Cancelled).await
    }

    /// Abort because of `cause` without waiting for in-flight parts.
    /// Returns `cause` once aborted, or the abort failure.
    async fn stop(&mut self, cause: UploadError) -> UploadError {
        self.cancellation.cancel();
        self.ended = true;
        self.dispatcher.detach();
        if self.opening.is_some() {
            // the session must exist before it can be aborted
            if let Err(err) = self.await_opening().await {
                return err;
            }
        }
        self.coordinator.abort(cause).await
    }
}

#[async_trait]
impl ByteSink for UploadStream {
    type Output = ObjectDescriptor;

    async fn write(&mut self, data: &[u8]) -> Result<bool, UploadError> {
        UploadStream::write(self, data).await
    }

    async fn drained(&mut self) -> Result<(), UploadError> {
        UploadStream::drained(self).await
    }

    async fn end(&mut self) -> Result<ObjectDescriptor, UploadError> {
        UploadStream::end(self).await
    }

    async fn cancel(&mut self) -> Result<(), UploadError> {
        UploadStream::cancel(self).await
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        log::warn!(
            "upload to {} dropped before completion, aborting",
            self.destination()
        );
        self.dispatcher.detach();
        self.coordinator.abandon(self.opening.take());
    }
}
