use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors that end a pipeline task. Everything but `Cancelled` is a structural failure that
/// brings the whole pipeline down.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to decode message at {topic}/{partition}@{offset}: {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to fetch from {topic}/{partition}: {source}")]
    Fetch {
        topic: String,
        partition: i32,
        #[source]
        source: SourceError,
    },
    #[error("failed to serialize document: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("queue {0} has no consumers left")]
    QueueClosed(&'static str),
    #[error("task {task} panicked: {reason}")]
    TaskPanicked { task: String, reason: String },
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Errors of a message source, always fatal for the reader owning it.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("source closed")]
    Closed,
}

/// Reasons a location lookup can come back empty handed. Never fatal.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("no location known for {0}")]
    NotFound(String),
    #[error("location source failure: {0}")]
    Source(String),
}

impl LookupError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LookupError::InvalidAddress(_) => "invalid_address",
            LookupError::NotFound(_) => "not_found",
            LookupError::Source(_) => "source",
        }
    }
}

/// Failures of a bulk write. The batch is dropped, the pipeline carries on.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("bulk request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bulk request rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{failed} of {total} documents failed to index, first error: {first_error}")]
    PartialFailure {
        failed: usize,
        total: usize,
        first_error: String,
    },
    #[error("invalid bulk response: {0}")]
    InvalidResponse(#[source] serde_json::Error),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("queue {0} is closed")]
    Closed(&'static str),
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled => PipelineError::Cancelled,
            QueueError::Closed(queue) => PipelineError::QueueClosed(queue),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Env(#[from] envconfig::Error),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Anything that keeps the service from starting, or ends it.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open location database: {0}")]
    GeoIp(#[from] common_geoip::GeoIpError),
    #[error("failed to create kafka consumer: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to create bulk sink: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to bind {bind}: {source}")]
    Bind {
        bind: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
