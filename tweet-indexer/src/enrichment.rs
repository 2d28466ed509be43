use std::collections::HashMap;
use std::sync::Arc;

use common_geoip::{GeoIpClient, GeoIpError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{LookupError, PipelineError, QueueError},
    measuring_channel::{MeasuringReceiver, MeasuringSender},
    metrics_consts::{GEOIP_LOOKUP_FAILURES, TWEETS_ENRICHED},
    types::{EnrichedTweet, Tweet},
};

/// Localized (locale code -> name) city and country names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub city: HashMap<String, String>,
    pub country: HashMap<String, String>,
}

/// Read-only, synchronous lookup of the location of a remote address.
pub trait LocationResolver: Send + Sync {
    fn lookup(&self, address: &str) -> Result<Location, LookupError>;
}

impl LocationResolver for GeoIpClient {
    fn lookup(&self, address: &str) -> Result<Location, LookupError> {
        match self.lookup_names(address) {
            Ok(names) => Ok(Location {
                city: names.city,
                country: names.country,
            }),
            Err(e @ (GeoIpError::InvalidAddress(_) | GeoIpError::LoopbackAddress(_))) => {
                Err(LookupError::InvalidAddress(e.to_string()))
            }
            Err(GeoIpError::NotFound(ip)) => Err(LookupError::NotFound(ip.to_string())),
            Err(e) => Err(LookupError::Source(e.to_string())),
        }
    }
}

/// Annotates a tweet with its location. The tweet's own fields are moved over untouched, and a
/// failed lookup leaves both name maps empty.
pub fn enrich(tweet: Tweet, resolver: &dyn LocationResolver) -> EnrichedTweet {
    let location = match resolver.lookup(&tweet.remote_address) {
        Ok(location) => location,
        Err(e) => {
            warn!(remote_address = %tweet.remote_address, error = %e, "failed to get geoip data");
            metrics::counter!(GEOIP_LOOKUP_FAILURES, "reason" => e.reason()).increment(1);
            Location::default()
        }
    };

    EnrichedTweet {
        tweet,
        city: location.city,
        country: location.country,
    }
}

pub struct EnrichmentWorker {
    input: MeasuringReceiver<Tweet>,
    output: MeasuringSender<EnrichedTweet>,
    resolver: Arc<dyn LocationResolver>,
}

impl EnrichmentWorker {
    pub fn new(
        input: MeasuringReceiver<Tweet>,
        output: MeasuringSender<EnrichedTweet>,
        resolver: Arc<dyn LocationResolver>,
    ) -> Self {
        Self {
            input,
            output,
            resolver,
        }
    }

    /// Enriches tweets until cancelled. Returns successfully if its input is closed and drained.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        loop {
            let tweet = match self.input.recv_or_cancel(&cancel).await {
                Ok(tweet) => tweet,
                Err(QueueError::Closed(queue)) => {
                    debug!(queue, "Input closed, enrichment worker done");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let enriched = enrich(tweet, self.resolver.as_ref());
            metrics::counter!(TWEETS_ENRICHED).increment(1);

            self.output.send(enriched, &cancel).await?;
        }
    }
}
