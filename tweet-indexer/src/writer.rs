use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::PipelineError,
    measuring_channel::MeasuringReceiver,
    metrics_consts::{
        BULK_WRITE_FAILURES, DOCUMENTS_DROPPED, DOCUMENTS_FLUSHED, FLUSHES, FLUSH_DURATION,
    },
    sink::BulkSink,
    types::{BufferEntry, EnrichedTweet, User},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timer,
    Drain,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Drain => "drain",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub users_index: Arc<str>,
    pub tweets_index: Arc<str>,
}

/// Buffers users and enriched tweets and writes them out in bulk, whenever the buffer reaches
/// the batch size or a full flush interval has passed since the last flush.
pub struct BatchWriter {
    id: usize,
    users: MeasuringReceiver<User>,
    tweets: MeasuringReceiver<EnrichedTweet>,
    sink: Arc<dyn BulkSink>,
    settings: WriterSettings,
}

// Kept apart from the receivers so the select arms can borrow both at once.
struct WriteBuffer {
    writer: usize,
    entries: Vec<BufferEntry>,
    last_flush: Instant,
    sink: Arc<dyn BulkSink>,
}

impl WriteBuffer {
    fn push<T: Serialize>(&mut self, index: &Arc<str>, record: &T) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(record).map_err(PipelineError::Encode)?;
        self.entries.push(BufferEntry {
            index: index.clone(),
            payload,
        });
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Writes out the whole buffer. The buffer is cleared whatever the outcome: failed batches
    /// are logged and dropped.
    async fn flush(
        &mut self,
        trigger: FlushTrigger,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if self.entries.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }

        let count = self.entries.len();
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = self.sink.write_batch(&self.entries) => res,
        };

        metrics::counter!(FLUSHES, "trigger" => trigger.as_str()).increment(1);
        metrics::histogram!(FLUSH_DURATION).record(started.elapsed().as_secs_f64());
        match result {
            Ok(summary) => {
                info!(
                    writer = self.writer,
                    count,
                    indexed = summary.indexed,
                    trigger = trigger.as_str(),
                    "Flushed buffer"
                );
                metrics::counter!(DOCUMENTS_FLUSHED).increment(count as u64);
            }
            Err(e) => {
                error!(
                    writer = self.writer,
                    count,
                    error = %e,
                    "Bulk write failed, dropping batch"
                );
                metrics::counter!(BULK_WRITE_FAILURES).increment(1);
                metrics::counter!(DOCUMENTS_DROPPED).increment(count as u64);
            }
        }

        self.entries.clear();
        // Stamped with the start so a slow write doesn't push the next timer flush back a tick.
        self.last_flush = started;
        Ok(())
    }
}

impl BatchWriter {
    pub fn new(
        id: usize,
        users: MeasuringReceiver<User>,
        tweets: MeasuringReceiver<EnrichedTweet>,
        sink: Arc<dyn BulkSink>,
        settings: WriterSettings,
    ) -> Self {
        Self {
            id,
            users,
            tweets,
            sink,
            settings,
        }
    }

    /// Runs until cancelled, in which case buffered entries are abandoned, or until both inputs
    /// are closed and drained, in which case the buffer is flushed one last time.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let BatchWriter {
            id,
            users,
            tweets,
            sink,
            settings,
        } = self;

        let mut buffer = WriteBuffer {
            writer: id,
            entries: Vec::with_capacity(settings.batch_size),
            last_flush: Instant::now(),
            sink,
        };

        let interval = settings.flush_interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut users_open = true;
        let mut tweets_open = true;
        debug!(writer = id, "Batch writer started");

        loop {
            if !users_open && !tweets_open {
                debug!(writer = id, count = buffer.len(), "Inputs closed, draining buffer");
                return buffer.flush(FlushTrigger::Drain, &cancel).await;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(writer = id, count = buffer.len(), "Batch writer cancelled");
                    return Err(PipelineError::Cancelled);
                }
                _ = ticker.tick() => {
                    if buffer.last_flush.elapsed() >= interval {
                        buffer.flush(FlushTrigger::Timer, &cancel).await?;
                    }
                }
                user = users.recv(), if users_open => match user {
                    Some(user) => buffer.push(&settings.users_index, &user)?,
                    None => users_open = false,
                },
                tweet = tweets.recv(), if tweets_open => match tweet {
                    Some(tweet) => buffer.push(&settings.tweets_index, &tweet)?,
                    None => tweets_open = false,
                },
            }

            if buffer.len() >= settings.batch_size {
                buffer.flush(FlushTrigger::Size, &cancel).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        measuring_channel::{measuring_channel, MeasuringSender},
        test_utils::RecordingSink,
        types::Tweet,
    };

    struct Harness {
        users: MeasuringSender<User>,
        tweets: MeasuringSender<EnrichedTweet>,
        sink: Arc<RecordingSink>,
        token: CancellationToken,
        writer: tokio::task::JoinHandle<Result<(), PipelineError>>,
        started: Instant,
    }

    fn start_writer(sink: RecordingSink, batch_size: usize, interval: Duration) -> Harness {
        let (users_tx, users_rx) = measuring_channel("users", 100);
        let (tweets_tx, tweets_rx) = measuring_channel("enriched_tweets", 100);
        let sink = Arc::new(sink);
        let token = CancellationToken::new();
        let settings = WriterSettings {
            batch_size,
            flush_interval: interval,
            users_index: Arc::from("users"),
            tweets_index: Arc::from("tweets"),
        };

        let started = Instant::now();
        let writer = tokio::spawn(
            BatchWriter::new(0, users_rx, tweets_rx, sink.clone(), settings).run(token.clone()),
        );

        Harness {
            users: users_tx,
            tweets: tweets_tx,
            sink,
            token,
            writer,
            started,
        }
    }

    fn user(id: usize) -> User {
        User {
            id: id.to_string(),
            display_name: format!("User name {id}"),
        }
    }

    fn user_ids(entries: &[BufferEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| serde_json::from_slice::<User>(&e.payload).unwrap().id)
            .collect()
    }

    async fn send_users(harness: &Harness, ids: std::ops::Range<usize>) {
        for id in ids {
            harness.users.send(user(id), &harness.token).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_flushes_on_size_before_interval() {
        let harness = start_writer(RecordingSink::new(), 3000, Duration::from_secs(5));

        send_users(&harness, 0..3000).await;
        harness.sink.wait_for_documents(3000).await;

        let batches = harness.sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entries.len(), 3000);
        assert!(batches[0].at < harness.started + Duration::from_secs(5));

        // Nothing left for the timer to flush.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(harness.sink.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_on_timer() {
        let harness = start_writer(RecordingSink::new(), 3000, Duration::from_secs(5));

        send_users(&harness, 0..10).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        let batches = harness.sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entries.len(), 10);
        assert!(batches[0].at >= harness.started + Duration::from_secs(5));
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(user_ids(&batches[0].entries), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_waits_a_full_interval_after_last_flush() {
        let harness = start_writer(RecordingSink::new(), 5, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(3)).await;
        send_users(&harness, 0..7).await;
        harness.sink.wait_for_documents(5).await;

        // The tick at 5s comes only 2s after the size flush at 3s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(harness.sink.batches().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let batches = harness.sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(user_ids(&batches[1].entries), vec!["5", "6"]);
        assert!(batches[1].at >= batches[0].at + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_keeps_timer_cadence() {
        let sink = RecordingSink::new().with_delay(Duration::from_millis(100));
        let harness = start_writer(sink, 3000, Duration::from_secs(5));

        send_users(&harness, 0..10).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        send_users(&harness, 10..20).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let batches = harness.sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].entries.len(), 10);
        assert!(batches[1].at < harness.started + Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_flushes_exact_batches() {
        let harness = start_writer(RecordingSink::new(), 10, Duration::from_secs(3600));

        send_users(&harness, 0..35).await;
        harness.sink.wait_for_documents(30).await;

        let batches = harness.sink.batches();
        assert_eq!(batches.len(), 3);
        for (n, batch) in batches.iter().enumerate() {
            let expected: Vec<String> = (n * 10..(n + 1) * 10).map(|i| i.to_string()).collect();
            assert_eq!(user_ids(&batch.entries), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_buffer() {
        let harness = start_writer(RecordingSink::new(), 10, Duration::from_secs(5));

        send_users(&harness, 0..5).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.token.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), harness.writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(PipelineError::Cancelled)));
        assert!(harness.sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_slow_flush() {
        let sink = RecordingSink::new().with_delay(Duration::from_secs(3600));
        let harness = start_writer(sink, 1, Duration::from_secs(5));

        send_users(&harness, 0..1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.token.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), harness.writer)
            .await
            .expect("writer ignored cancellation while flushing")
            .unwrap();
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_dropped() {
        let sink = RecordingSink::new().failing_first(1);
        let harness = start_writer(sink, 2, Duration::from_secs(3600));

        send_users(&harness, 0..4).await;
        harness.sink.wait_for_attempts(2).await;

        let attempts = harness.sink.attempts();
        assert!(!attempts[0].succeeded);
        assert_eq!(user_ids(&attempts[0].entries), vec!["0", "1"]);
        assert!(attempts[1].succeeded);
        assert_eq!(user_ids(&attempts[1].entries), vec!["2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_inputs_drain_buffer() {
        let harness = start_writer(RecordingSink::new(), 100, Duration::from_secs(3600));

        send_users(&harness, 0..2).await;
        let tweet = EnrichedTweet {
            tweet: Tweet {
                message: "Tweet 1".to_string(),
                ..Default::default()
            },
            city: HashMap::new(),
            country: HashMap::new(),
        };
        harness.tweets.send(tweet, &harness.token).await.unwrap();

        let Harness {
            users,
            tweets,
            sink,
            writer,
            ..
        } = harness;
        drop(users);
        drop(tweets);

        let res = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let indices: Vec<&str> = batches[0].entries.iter().map(|e| &*e.index).collect();
        assert_eq!(indices.iter().filter(|i| **i == "users").count(), 2);
        assert_eq!(indices.iter().filter(|i| **i == "tweets").count(), 1);
    }
}
