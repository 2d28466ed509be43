use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Partitions are assigned manually and offsets are never committed, the group
    // id only identifies the client towards the brokers.
    #[envconfig(default = "tweet-indexer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "1")]
    pub kafka_fetch_min_bytes: u32, // Low for dev, so that single messages are delivered right away

    #[envconfig(default = "10000000")]
    pub kafka_fetch_max_bytes: u32,
}
