use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    error::PipelineError,
    measuring_channel::MeasuringSender,
    metrics_consts::{DECODE_ERRORS, FETCH_ERRORS, RECORDS_READ},
    source::MessageSource,
    types::decode,
};

/// Pulls every message of one partition, decodes it and pushes it downstream.
pub struct PartitionReader<T> {
    source: Box<dyn MessageSource>,
    output: MeasuringSender<T>,
}

impl<T> PartitionReader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(source: Box<dyn MessageSource>, output: MeasuringSender<T>) -> Self {
        Self { source, output }
    }

    /// Runs until cancelled, or until a message can't be fetched or decoded. A malformed
    /// message stops the reader: it is never skipped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let topic = self.source.topic().to_owned();
        let partition = self.source.partition();
        debug!(topic = %topic, partition, "Partition reader started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                fetched = self.source.fetch_next() => fetched,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(e) => {
                    error!(topic = %topic, partition, error = %e, "Failed to fetch message");
                    metrics::counter!(FETCH_ERRORS, "topic" => topic.clone()).increment(1);
                    return Err(PipelineError::Fetch {
                        topic,
                        partition,
                        source: e,
                    });
                }
            };

            let record: T = match decode(&message.payload) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        topic = %topic,
                        partition,
                        offset = message.offset,
                        error = %e,
                        "Failed to decode message"
                    );
                    metrics::counter!(DECODE_ERRORS, "topic" => topic.clone()).increment(1);
                    return Err(PipelineError::Decode {
                        topic,
                        partition,
                        offset: message.offset,
                        source: e,
                    });
                }
            };

            metrics::counter!(RECORDS_READ, "topic" => topic.clone()).increment(1);
            self.output.send(record, &cancel).await?;
        }
    }
}
