//! Part numbering and bounded-concurrency part uploads.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::{Id, JoinError, JoinSet};

use crate::coordinator::SessionState;
use crate::error::{Operation, StoreError, UploadError};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{CompletedPart, ObjectStoreClient, SessionToken};

/// A part the store has acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    pub integrity_tag: String,
    /// Payload length in bytes
    pub size: usize,
}

impl From<PartResult> for CompletedPart {
    fn from(part: PartResult) -> Self {
        CompletedPart {
            part_number: part.part_number,
            integrity_tag: part.integrity_tag,
        }
    }
}

type PartOutcome = Result<PartResult, UploadError>;

/// Hands part payloads to the store, at most `max_concurrency` at a time.
///
/// The dispatcher is the only place that assigns part numbers or touches the
/// in-flight set. Payloads arriving before the session token are queued and
/// numbered in arrival order once [`UploadDispatcher::open`] is called.
/// After the first permanent failure nothing else is submitted.
pub(crate) struct UploadDispatcher {
    client: Arc<dyn ObjectStoreClient>,
    retry: RetryConfig,
    max_concurrency: usize,
    token: Option<SessionToken>,
    next_part: u32,
    queued: VecDeque<Bytes>,
    queued_bytes: usize,
    in_flight: JoinSet<PartOutcome>,
    in_flight_parts: HashMap<Id, u32>,
    results: Vec<PartResult>,
    failure: Option<UploadError>,
}

impl UploadDispatcher {
    pub fn new(client: Arc<dyn ObjectStoreClient>, retry: RetryConfig, max_concurrency: usize) -> Self {
        Self {
            client,
            retry,
            max_concurrency: max_concurrency.max(1),
            token: None,
            next_part: 1,
            queued: VecDeque::new(),
            queued_bytes: 0,
            in_flight: JoinSet::new(),
            in_flight_parts: HashMap::new(),
            results: Vec::new(),
            failure: None,
        }
    }

    /// Provide the session token; queued payloads may be dispatched from now on.
    pub fn open(&mut self, token: SessionToken) {
        self.token = Some(token);
    }

    /// Queue a payload without waiting. Call [`Self::pump`] to dispatch it.
    pub fn enqueue(&mut self, payload: Bytes) -> Result<(), UploadError> {
        self.check_failed()?;
        self.queued_bytes += payload.len();
        self.queued.push_back(payload);
        Ok(())
    }

    /// Collect finished uploads and dispatch queued payloads while there is
    /// spare capacity. Never waits.
    pub fn pump(&mut self) -> Result<(), UploadError> {
        while let Some(joined) = self.in_flight.try_join_next_with_id() {
            self.record(joined);
        }
        self.check_failed()?;
        if self.token.is_none() {
            return Ok(());
        }
        while self.in_flight.len() < self.max_concurrency {
            let Some(payload) = self.dequeue() else {
                break;
            };
            self.spawn(payload);
        }
        Ok(())
    }

    /// Dispatch the oldest queued payload, waiting for a free slot first.
    async fn submit_queued(&mut self) -> Result<(), UploadError> {
        if self.token.is_none() {
            return Err(UploadError::State {
                operation: "submit a part",
                state: SessionState::Opening,
            });
        }
        self.wait_for_capacity(self.max_concurrency - 1).await?;
        if let Some(payload) = self.dequeue() {
            self.spawn(payload);
        }
        Ok(())
    }

    /// Wait until there are `max_in_flight` or fewer uploads in flight.
    pub async fn wait_for_capacity(&mut self, max_in_flight: usize) -> Result<(), UploadError> {
        self.check_failed()?;
        while self.in_flight.len() > max_in_flight {
            if let Some(joined) = self.in_flight.join_next_with_id().await {
                self.record(joined);
            }
            self.check_failed()?;
        }
        Ok(())
    }

    /// Wait for the next in-flight upload to settle, if any.
    pub async fn settle_one(&mut self) -> Result<(), UploadError> {
        if let Some(joined) = self.in_flight.join_next_with_id().await {
            self.record(joined);
        }
        self.check_failed()
    }

    /// Submit everything still queued and wait for all uploads to settle.
    ///
    /// Returns the acknowledged parts in completion order.
    pub async fn finish(&mut self) -> Result<Vec<PartResult>, UploadError> {
        while !self.queued.is_empty() {
            self.submit_queued().await?;
        }
        self.wait_for_capacity(0).await?;
        Ok(std::mem::take(&mut self.results))
    }

    /// Stop and await every in-flight upload, discarding queued payloads.
    pub async fn shutdown(&mut self) {
        self.discard_queued();
        self.in_flight.shutdown().await;
        self.in_flight_parts.clear();
    }

    /// Let in-flight uploads run to completion unobserved.
    pub fn detach(&mut self) {
        self.discard_queued();
        self.in_flight.detach_all();
        self.in_flight_parts.clear();
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight.len() >= self.max_concurrency
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes handed over but not yet dispatched to the store
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    fn check_failed(&self) -> Result<(), UploadError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn dequeue(&mut self) -> Option<Bytes> {
        let payload = self.queued.pop_front()?;
        self.queued_bytes -= payload.len();
        Some(payload)
    }

    fn discard_queued(&mut self) {
        self.queued.clear();
        self.queued_bytes = 0;
    }

    fn spawn(&mut self, payload: Bytes) {
        let Some(token) = self.token.clone() else {
            return;
        };
        let part_number = self.next_part;
        self.next_part += 1;

        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        log::debug!(
            "dispatching part {} ({} bytes) of {}",
            part_number,
            payload.len(),
            token
        );
        let handle = self.in_flight.spawn(async move {
            let operation = Operation::UploadPart(part_number);
            let size = payload.len();
            let client = &client;
            let token = &token;
            let integrity_tag = with_retry(operation, &retry, move || {
                client.upload_part(token, part_number, payload.clone())
            })
            .await
            .map_err(|err| err.into_upload_error(operation))?;

            Ok(PartResult {
                part_number,
                integrity_tag,
                size,
            })
        });
        self.in_flight_parts.insert(handle.id(), part_number);
    }

    fn record(&mut self, joined: Result<(Id, PartOutcome), JoinError>) {
        let (part_number, outcome) = match joined {
            Ok((id, outcome)) => (self.in_flight_parts.remove(&id), outcome),
            Err(err) => {
                let part_number = self.in_flight_parts.remove(&err.id());
                let operation = Operation::UploadPart(part_number.unwrap_or_default());
                let outcome = Err(UploadError::Permanent {
                    operation,
                    source: StoreError::permanent(format!("upload task failed: {}", err)),
                });
                (part_number, outcome)
            }
        };
        match outcome {
            Ok(part) => {
                log::debug!("part {} uploaded ({} bytes)", part.part_number, part.size);
                self.results.push(part);
            }
            Err(err) => {
                log::warn!("part {:?} failed: {}", part_number, err);
                if self.failure.is_none() {
                    self.failure = Some(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Destination;
    use crate::testing::ScriptedStore;
    use std::time::Duration;

    fn token() -> SessionToken {
        SessionToken::new(Destination::new("bucket", "key"), "upload-1")
    }

    fn dispatcher(store: &Arc<ScriptedStore>, max_concurrency: usize) -> UploadDispatcher {
        UploadDispatcher::new(store.clone(), RetryConfig::immediate(3), max_concurrency)
    }

    #[tokio::test]
    async fn test_numbers_parts_sequentially() {
        let store = Arc::new(ScriptedStore::new());
        let mut dispatcher = dispatcher(&store, 2);
        dispatcher.open(token());

        for chunk in ["a", "b", "c", "d", "e"] {
            dispatcher.enqueue(Bytes::from(chunk)).unwrap();
            dispatcher.pump().unwrap();
        }
        let mut results = dispatcher.finish().await.unwrap();
        results.sort_by_key(|p| p.part_number);

        let numbers: Vec<u32> = results.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.uploaded_object(), b"abcde");
    }

    #[tokio::test]
    async fn test_never_exceeds_concurrency_limit() {
        let store = Arc::new(ScriptedStore::new().with_part_delay(Duration::from_millis(5)));
        let mut dispatcher = dispatcher(&store, 3);
        dispatcher.open(token());

        for _ in 0..10 {
            dispatcher.enqueue(Bytes::from_static(b"xx")).unwrap();
            dispatcher.pump().unwrap();
            assert!(dispatcher.in_flight() <= 3);
            if dispatcher.is_saturated() {
                dispatcher.settle_one().await.unwrap();
            }
        }
        dispatcher.finish().await.unwrap();

        assert!(store.max_concurrent_parts() <= 3);
        assert_eq!(store.uploaded_parts().len(), 10);
    }

    #[tokio::test]
    async fn test_queues_until_open() {
        let store = Arc::new(ScriptedStore::new());
        let mut dispatcher = dispatcher(&store, 2);

        dispatcher.enqueue(Bytes::from_static(b"first")).unwrap();
        dispatcher.enqueue(Bytes::from_static(b"second")).unwrap();
        dispatcher.pump().unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.queued_bytes(), 11);

        dispatcher.open(token());
        dispatcher.pump().unwrap();
        assert_eq!(dispatcher.in_flight(), 2);
        assert_eq!(dispatcher.queued_bytes(), 0);

        dispatcher.finish().await.unwrap();
        assert_eq!(store.uploaded_object(), b"firstsecond");
    }

    #[tokio::test]
    async fn test_finish_before_open_is_rejected() {
        let store = Arc::new(ScriptedStore::new());
        let mut dispatcher = dispatcher(&store, 2);
        dispatcher.enqueue(Bytes::from_static(b"x")).unwrap();

        let result = dispatcher.finish().await;

        assert!(matches!(result, Err(UploadError::State { .. })));
        assert!(store.uploaded_parts().is_empty());
    }

    #[tokio::test]
    async fn test_retries_transient_part_failures() {
        let store = Arc::new(
            ScriptedStore::new()
                .fail_part(1, StoreError::transient("timeout"))
                .fail_part(1, StoreError::transient("timeout")),
        );
        let mut dispatcher = dispatcher(&store, 2);
        dispatcher.open(token());

        dispatcher.enqueue(Bytes::from_static(b"data")).unwrap();
        let results = dispatcher.finish().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(store.part_attempts(1), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_rejects_further_parts() {
        let store = Arc::new(ScriptedStore::new().fail_part(1, StoreError::permanent("rejected")));
        let mut dispatcher = dispatcher(&store, 1);
        dispatcher.open(token());

        dispatcher.enqueue(Bytes::from_static(b"one")).unwrap();
        dispatcher.enqueue(Bytes::from_static(b"two")).unwrap();
        // part 2 waits for the single slot and never goes out
        let result = dispatcher.finish().await;

        assert!(matches!(
            result,
            Err(UploadError::Permanent {
                operation: Operation::UploadPart(1),
                ..
            })
        ));
        assert!(dispatcher.enqueue(Bytes::from_static(b"three")).is_err());
        assert!(dispatcher.pump().is_err());
        assert_eq!(store.part_attempts(2), 0);
    }
}
