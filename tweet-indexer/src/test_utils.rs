//! In-memory stand-ins for Kafka, the GeoIP database and Elasticsearch.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    enrichment::{Location, LocationResolver},
    error::{LookupError, SinkError, SourceError},
    sink::{BulkSink, BulkSummary},
    source::{MessageSource, SourceMessage},
    types::BufferEntry,
};

/// A partition serving a fixed list of payloads from offset 0. Once exhausted it either waits
/// forever, like an idle partition, or fails.
pub struct FakeSource {
    topic: String,
    partition: i32,
    payloads: VecDeque<Vec<u8>>,
    next_offset: i64,
    fail_when_exhausted: bool,
}

impl FakeSource {
    pub fn new(topic: &str, partition: i32) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            payloads: VecDeque::new(),
            next_offset: 0,
            fail_when_exhausted: false,
        }
    }

    pub fn with_payloads<P: AsRef<[u8]>>(mut self, payloads: impl IntoIterator<Item = P>) -> Self {
        self.payloads
            .extend(payloads.into_iter().map(|p| p.as_ref().to_vec()));
        self
    }

    pub fn then_fail(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn fetch_next(&mut self) -> Result<SourceMessage, SourceError> {
        match self.payloads.pop_front() {
            Some(payload) => {
                let offset = self.next_offset;
                self.next_offset += 1;
                Ok(SourceMessage {
                    partition: self.partition,
                    offset,
                    payload,
                })
            }
            None if self.fail_when_exhausted => Err(SourceError::Closed),
            None => std::future::pending().await,
        }
    }
}

/// Resolves addresses from a fixed table.
#[derive(Default)]
pub struct StaticResolver {
    locations: HashMap<String, Location>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, location: Location) -> Self {
        self.locations.insert(address.to_string(), location);
        self
    }
}

impl LocationResolver for StaticResolver {
    fn lookup(&self, address: &str) -> Result<Location, LookupError> {
        if address.trim().parse::<IpAddr>().is_err() {
            return Err(LookupError::InvalidAddress(address.to_string()));
        }
        self.locations
            .get(address)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(address.to_string()))
    }
}

pub fn stockholm() -> Location {
    let names = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(locale, name)| (locale.to_string(), name.to_string()))
            .collect::<HashMap<_, _>>()
    };

    Location {
        city: names(&[("en", "Stockholm"), ("de", "Stockholm"), ("ru", "Стокгольм")]),
        country: names(&[("en", "Sweden"), ("de", "Schweden"), ("fr", "Suède")]),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub at: Instant,
    pub entries: Vec<BufferEntry>,
    pub succeeded: bool,
}

/// Keeps every batch it is handed. Can be told to fail its first calls, or to be slow.
pub struct RecordingSink {
    attempts: Mutex<Vec<RecordedBatch>>,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    documents: watch::Sender<usize>,
    attempt_count: watch::Sender<usize>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            delay: None,
            documents: watch::channel(0).0,
            attempt_count: watch::channel(0).0,
        }
    }

    pub fn failing_first(self, calls: usize) -> Self {
        self.failures_left.store(calls, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call made so far, in order.
    pub fn attempts(&self) -> Vec<RecordedBatch> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The successfully written batches, in order.
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.attempts()
            .into_iter()
            .filter(|batch| batch.succeeded)
            .collect()
    }

    pub fn documents(&self) -> Vec<BufferEntry> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.entries)
            .collect()
    }

    /// Waits until at least `count` documents were written successfully.
    pub async fn wait_for_documents(&self, count: usize) {
        wait_until(&self.documents, count).await
    }

    pub async fn wait_for_attempts(&self, count: usize) {
        wait_until(&self.attempt_count, count).await
    }
}

async fn wait_until(counter: &watch::Sender<usize>, target: usize) {
    let mut rx = counter.subscribe();
    while *rx.borrow_and_update() < target {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl BulkSink for RecordingSink {
    async fn write_batch(&self, batch: &[BufferEntry]) -> Result<BulkSummary, SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedBatch {
                at: Instant::now(),
                entries: batch.to_vec(),
                succeeded: !fail,
            });
        self.attempt_count.send_modify(|n| *n += 1);

        if fail {
            return Err(SinkError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        self.documents.send_modify(|n| *n += batch.len());
        Ok(BulkSummary {
            indexed: batch.len(),
        })
    }
}
