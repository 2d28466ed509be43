use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message, Offset, TopicPartitionList,
};
use tracing::debug;

use crate::config::KafkaConfig;

/// A consumer bound to exactly one partition of one topic.
///
/// The partition is assigned manually, reading starts at the beginning of the
/// partition and offsets are neither stored nor committed.
pub struct PartitionConsumer {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
}

/// An owned copy of a consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

impl PartitionConsumer {
    pub fn new(config: &KafkaConfig, topic: &str, partition: i32) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = client_config(config).create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, partition, Offset::Beginning)?;
        consumer.assign(&assignment)?;

        debug!(topic, partition, "Assigned partition consumer");

        Ok(Self {
            consumer,
            topic: topic.to_owned(),
            partition,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Waits for the next message of the assigned partition.
    pub async fn recv(&self) -> Result<RawMessage, KafkaError> {
        let message = self.consumer.recv().await?;

        Ok(RawMessage {
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
        })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("group.id", &config.kafka_consumer_group)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("fetch.min.bytes", config.kafka_fetch_min_bytes.to_string())
        .set("fetch.max.bytes", config.kafka_fetch_max_bytes.to_string());

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };
    client_config
}
