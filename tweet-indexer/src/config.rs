use std::str::FromStr;
use std::time;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

use crate::error::ConfigError;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "users")]
    pub users_topic: String,

    #[envconfig(default = "tweets")]
    pub tweets_topic: String,

    #[envconfig(default = "2")]
    pub users_topic_partitions: usize,

    #[envconfig(default = "10")]
    pub tweets_topic_partitions: usize,

    #[envconfig(nested = true)]
    pub elastic: ElasticConfig,

    #[envconfig(default = "3")]
    pub enrichment_workers: usize,

    #[envconfig(default = "2")]
    pub writer_count: usize,

    // One setting for all the shared queues
    #[envconfig(default = "100")]
    pub queue_capacity: usize,

    #[envconfig(default = "3000")]
    pub flush_batch_size: usize,

    #[envconfig(default = "5000")]
    pub flush_interval_ms: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub monitor_interval_ms: EnvMsDuration,

    #[envconfig(default = "share/GeoLite2-City.mmdb")]
    pub geoip_db_path: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ElasticConfig {
    #[envconfig(default = "http://localhost:9200")]
    pub elastic_address: String,

    #[envconfig(default = "users")]
    pub elastic_users_index: String,

    #[envconfig(default = "tweets")]
    pub elastic_tweets_index: String,

    // "true" makes documents searchable right away, convenient for dev but slow
    #[envconfig(default = "false")]
    pub elastic_bulk_refresh: String,

    #[envconfig(default = "30000")]
    pub elastic_request_timeout_ms: EnvMsDuration,
}

/// The settings the pipeline engine itself runs on.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub enrichment_workers: usize,
    pub writer_count: usize,
    pub queue_capacity: usize,
    pub flush_batch_size: usize,
    pub flush_interval: time::Duration,
    pub monitor_interval: time::Duration,
    pub users_index: String,
    pub tweets_index: String,
}

impl Config {
    /// Reads the configuration from the environment and checks it.
    pub fn init_validated() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("USERS_TOPIC_PARTITIONS", self.users_topic_partitions),
            ("TWEETS_TOPIC_PARTITIONS", self.tweets_topic_partitions),
            ("ENRICHMENT_WORKERS", self.enrichment_workers),
            ("WRITER_COUNT", self.writer_count),
            ("QUEUE_CAPACITY", self.queue_capacity),
            ("FLUSH_BATCH_SIZE", self.flush_batch_size),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::NotPositive(*name));
        }

        let intervals = [
            ("FLUSH_INTERVAL_MS", self.flush_interval_ms),
            ("MONITOR_INTERVAL_MS", self.monitor_interval_ms),
            (
                "ELASTIC_REQUEST_TIMEOUT_MS",
                self.elastic.elastic_request_timeout_ms,
            ),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.0.is_zero()) {
            return Err(ConfigError::NotPositive(*name));
        }

        Ok(())
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            enrichment_workers: self.enrichment_workers,
            writer_count: self.writer_count,
            queue_capacity: self.queue_capacity,
            flush_batch_size: self.flush_batch_size,
            flush_interval: self.flush_interval_ms.0,
            monitor_interval: self.monitor_interval_ms.0,
            users_index: self.elastic.elastic_users_index.clone(),
            tweets_index: self.elastic.elastic_tweets_index.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
