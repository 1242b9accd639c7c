//! Scripted in-memory store used by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::config::UploadConfig;
use crate::error::StoreError;
use crate::retry::RetryConfig;
use crate::store::{
    CompletedObject, CompletedPart, Destination, ObjectStoreClient, SessionToken,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Begin(Destination),
    UploadPart { part_number: u32, size: usize },
    Complete(Vec<u32>),
    Abort,
}

/// Records every call and fails the ones it was told to fail.
#[derive(Default)]
pub struct ScriptedStore {
    calls: Mutex<Vec<Call>>,
    parts: Mutex<BTreeMap<u32, Bytes>>,
    part_failures: Mutex<HashMap<u32, VecDeque<StoreError>>>,
    begin_failures: Mutex<VecDeque<StoreError>>,
    complete_failures: Mutex<VecDeque<StoreError>>,
    abort_failures: Mutex<VecDeque<StoreError>>,
    begin_gate: Option<Arc<Semaphore>>,
    part_delay: Option<Duration>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next attempt of `part_number` with `err`; may be stacked.
    pub fn fail_part(self, part_number: u32, err: StoreError) -> Self {
        self.part_failures
            .lock()
            .unwrap()
            .entry(part_number)
            .or_default()
            .push_back(err);
        self
    }

    pub fn fail_begin(self, err: StoreError) -> Self {
        self.begin_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_complete(self, err: StoreError) -> Self {
        self.complete_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_abort(self, err: StoreError) -> Self {
        self.abort_failures.lock().unwrap().push_back(err);
        self
    }

    /// Make `begin_upload` wait until [`ScriptedStore::release_begin`].
    pub fn gate_begin(mut self) -> Self {
        self.begin_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_begin(&self) {
        if let Some(gate) = &self.begin_gate {
            gate.add_permits(1);
        }
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn begin_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Begin(_)))
    }

    pub fn abort_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Abort))
    }

    pub fn complete_calls(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete(parts) => Some(parts),
                _ => None,
            })
            .collect()
    }

    /// Number of upload attempts made for `part_number`
    pub fn part_attempts(&self, part_number: u32) -> usize {
        self.count(|c| matches!(c, Call::UploadPart { part_number: n, .. } if *n == part_number))
    }

    /// Successfully uploaded parts by part number
    pub fn uploaded_parts(&self) -> BTreeMap<u32, Bytes> {
        self.parts.lock().unwrap().clone()
    }

    /// Successful part payloads concatenated in part order
    pub fn uploaded_object(&self) -> Vec<u8> {
        self.uploaded_parts()
            .values()
            .flat_map(|p| p.iter().copied())
            .collect()
    }

    pub fn max_concurrent_parts(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_failure(queue: &Mutex<VecDeque<StoreError>>) -> Option<StoreError> {
        queue.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ObjectStoreClient for ScriptedStore {
    async fn begin_upload(&self, destination: &Destination) -> Result<SessionToken, StoreError> {
        self.record(Call::Begin(destination.clone()));
        if let Some(gate) = &self.begin_gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(err) = Self::next_failure(&self.begin_failures) {
            return Err(err);
        }
        Ok(SessionToken::new(destination.clone(), "upload-1"))
    }

    async fn upload_part(
        &self,
        _token: &SessionToken,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String, StoreError> {
        self.record(Call::UploadPart {
            part_number,
            size: payload.len(),
        });
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .part_failures
            .lock()
            .unwrap()
            .get_mut(&part_number)
            .and_then(|q| q.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }
        let previous = self.parts.lock().unwrap().insert(part_number, payload);
        assert!(previous.is_none(), "part {} uploaded twice", part_number);
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_upload(
        &self,
        _token: &SessionToken,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedObject, StoreError> {
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        self.record(Call::Complete(numbers.clone()));
        if let Some(err) = Self::next_failure(&self.complete_failures) {
            return Err(err);
        }
        let expected: Vec<u32> = (1..=parts.len() as u32).collect();
        if numbers != expected {
            return Err(StoreError::Validation {
                message: format!("parts not contiguous: {:?}", numbers),
            });
        }
        for part in &parts {
            if part.integrity_tag != format!("etag-{}", part.part_number) {
                return Err(StoreError::Validation {
                    message: format!("bad tag for part {}", part.part_number),
                });
            }
        }
        Ok(CompletedObject {
            e_tag: Some(format!("etag-final-{}", parts.len())),
            version: None,
        })
    }

    async fn abort_upload(&self, _token: &SessionToken) -> Result<(), StoreError> {
        self.record(Call::Abort);
        match Self::next_failure(&self.abort_failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Small parts and no retry delays.
pub fn test_config(part_size: usize, max_concurrency: usize) -> UploadConfig {
    UploadConfig::default()
        .with_part_size(part_size)
        .with_high_water_mark(part_size)
        .with_max_concurrency(max_concurrency)
        .with_retry(RetryConfig::immediate(4))
}
