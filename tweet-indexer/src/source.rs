use async_trait::async_trait;
use common_kafka::{config::KafkaConfig, partition_consumer::PartitionConsumer};
use rdkafka::error::KafkaError;

use crate::error::SourceError;

/// One message as handed over by a source partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// An ordered stream of messages from a single partition of a topic.
#[async_trait]
pub trait MessageSource: Send {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;

    /// Waits for the next message. Errors are not retried by callers.
    async fn fetch_next(&mut self) -> Result<SourceMessage, SourceError>;
}

#[async_trait]
impl MessageSource for PartitionConsumer {
    fn topic(&self) -> &str {
        PartitionConsumer::topic(self)
    }

    fn partition(&self) -> i32 {
        PartitionConsumer::partition(self)
    }

    async fn fetch_next(&mut self) -> Result<SourceMessage, SourceError> {
        let message = self.recv().await?;
        Ok(SourceMessage {
            partition: message.partition,
            offset: message.offset,
            // An empty payload fails decoding like any other malformed one.
            payload: message.payload.unwrap_or_default(),
        })
    }
}

/// Creates one source per partition of `topic`, numbered `0..partitions`.
pub fn kafka_sources(
    config: &KafkaConfig,
    topic: &str,
    partitions: usize,
) -> Result<Vec<Box<dyn MessageSource>>, KafkaError> {
    (0..partitions)
        .map(|partition| {
            let partition = i32::try_from(partition).map_err(|_| {
                KafkaError::ClientCreation(format!("partition {partition} is out of range"))
            })?;
            let source: Box<dyn MessageSource> =
                Box::new(PartitionConsumer::new(config, topic, partition)?);
            Ok(source)
        })
        .collect()
}
