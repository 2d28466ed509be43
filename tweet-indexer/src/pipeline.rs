use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::PipelineConfig,
    enrichment::{EnrichmentWorker, LocationResolver},
    error::PipelineError,
    measuring_channel::measuring_channel,
    monitor::FillnessMonitor,
    reader::PartitionReader,
    run_group::TaskGroup,
    sink::BulkSink,
    source::MessageSource,
    types::{EnrichedTweet, Tweet, User},
    writer::{BatchWriter, WriterSettings},
};

/// One source per partition, for each of the two topics.
pub struct PipelineSources {
    pub users: Vec<Box<dyn MessageSource>>,
    pub tweets: Vec<Box<dyn MessageSource>>,
}

/// Wires readers, enrichment workers, writers and the fillness monitor together:
///
/// ```text
/// user partitions ─────────────────────────────> users ──────────> writers ──> sink
/// tweet partitions ──> tweets ──> enrichers ──> enriched_tweets ──┘
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    sources: PipelineSources,
    resolver: Arc<dyn LocationResolver>,
    sink: Arc<dyn BulkSink>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        sources: PipelineSources,
        resolver: Arc<dyn LocationResolver>,
        sink: Arc<dyn BulkSink>,
    ) -> Self {
        Self {
            config,
            sources,
            resolver,
            sink,
        }
    }

    /// Runs every task until the token is cancelled or one of them fails. In both cases all
    /// tasks are awaited before returning. The result is the first failure, if any.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let Pipeline {
            config,
            sources,
            resolver,
            sink,
        } = self;

        let (users_tx, users_rx) = measuring_channel::<User>("users", config.queue_capacity);
        let (tweets_tx, tweets_rx) = measuring_channel::<Tweet>("tweets", config.queue_capacity);
        let (enriched_tx, enriched_rx) =
            measuring_channel::<EnrichedTweet>("enriched_tweets", config.queue_capacity);

        let monitor = FillnessMonitor::new(
            config.monitor_interval,
            vec![users_rx.stats(), tweets_rx.stats(), enriched_rx.stats()],
        );

        info!(
            user_partitions = sources.users.len(),
            tweet_partitions = sources.tweets.len(),
            enrichment_workers = config.enrichment_workers,
            writers = config.writer_count,
            "Starting pipeline"
        );

        let mut group = TaskGroup::new(cancel);
        let token = group.token().clone();

        for source in sources.users {
            let name = format!("reader-{}-{}", source.topic(), source.partition());
            let reader = PartitionReader::new(source, users_tx.clone());
            group.spawn(name, reader.run(token.clone()));
        }
        for source in sources.tweets {
            let name = format!("reader-{}-{}", source.topic(), source.partition());
            let reader = PartitionReader::new(source, tweets_tx.clone());
            group.spawn(name, reader.run(token.clone()));
        }

        for id in 0..config.enrichment_workers {
            let worker =
                EnrichmentWorker::new(tweets_rx.clone(), enriched_tx.clone(), resolver.clone());
            group.spawn(format!("enricher-{id}"), worker.run(token.clone()));
        }

        let settings = WriterSettings {
            batch_size: config.flush_batch_size,
            flush_interval: config.flush_interval,
            users_index: Arc::from(config.users_index.as_str()),
            tweets_index: Arc::from(config.tweets_index.as_str()),
        };
        for id in 0..config.writer_count {
            let writer = BatchWriter::new(
                id,
                users_rx.clone(),
                enriched_rx.clone(),
                sink.clone(),
                settings.clone(),
            );
            group.spawn(format!("writer-{id}"), writer.run(token.clone()));
        }

        group.spawn("fillness-monitor", monitor.run(token));

        // Only the tasks hold queue ends from here on, so a stage that runs out of producers
        // sees its input close.
        drop(users_tx);
        drop(tweets_tx);
        drop(enriched_tx);
        drop(users_rx);
        drop(tweets_rx);
        drop(enriched_rx);

        let result = group.wait().await;
        match &result {
            Ok(()) => info!("Pipeline stopped"),
            Err(e) => info!(error = %e, "Pipeline stopped on error"),
        }
        result
    }
}
