use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{error::PipelineError, measuring_channel::QueueStats, metrics_consts::QUEUE_FILLNESS};

/// Periodically reports how full the shared queues are. Persistent 100% readings point at the
/// stage downstream of that queue.
pub struct FillnessMonitor {
    interval: Duration,
    queues: Vec<Arc<dyn QueueStats>>,
}

impl FillnessMonitor {
    pub fn new(interval: Duration, queues: Vec<Arc<dyn QueueStats>>) -> Self {
        Self { interval, queues }
    }

    /// Percentage of capacity in use, per queue name.
    pub fn sample(&self) -> Vec<(&'static str, f64)> {
        self.queues
            .iter()
            .map(|queue| (queue.name(), queue.fillness()))
            .collect()
    }

    fn report(&self) {
        for (queue, fillness) in self.sample() {
            metrics::gauge!(QUEUE_FILLNESS, "queue" => queue).set(fillness);
            info!(queue, fillness, "Queue fillness");
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => self.report(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Mutex, PoisonError};

    use serde_json::Value;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::measuring_channel::measuring_channel;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_report_logs_structured_fields_per_queue() {
        let (users_tx, users_rx) = measuring_channel::<u32>("users", 4);
        let (_enriched_tx, enriched_rx) = measuring_channel::<u32>("enriched_tweets", 10);
        users_tx.try_send(1).unwrap();
        let monitor = FillnessMonitor::new(
            Duration::from_secs(10),
            vec![users_rx.stats(), enriched_rx.stats()],
        );

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(logs.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || monitor.report());

        let output = logs.0.lock().unwrap().clone();
        let fields: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["fields"].clone())
            .collect();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0]["queue"], "users");
        assert_eq!(fields[0]["fillness"], 25.0);
        assert_eq!(fields[1]["queue"], "enriched_tweets");
        assert_eq!(fields[1]["fillness"], 0.0);
    }

    #[test]
    fn test_sample_reports_every_queue() {
        let (users_tx, users_rx) = measuring_channel::<u32>("users", 4);
        let (_tweets_tx, tweets_rx) = measuring_channel::<u32>("tweets", 10);
        for i in 0..3 {
            users_tx.try_send(i).unwrap();
        }

        let monitor = FillnessMonitor::new(
            Duration::from_secs(10),
            vec![users_rx.stats(), tweets_rx.stats()],
        );

        assert_eq!(monitor.sample(), vec![("users", 75.0), ("tweets", 0.0)]);
        // Sampling never takes anything off the queues.
        assert_eq!(users_rx.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_cancellation() {
        let (_tx, rx) = measuring_channel::<u32>("users", 4);
        let token = CancellationToken::new();
        let monitor = tokio::spawn(
            FillnessMonitor::new(Duration::from_secs(10), vec![rx.stats()]).run(token.clone()),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!monitor.is_finished());

        token.cancel();
        let res = tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }
}
