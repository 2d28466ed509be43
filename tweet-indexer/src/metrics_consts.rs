pub const RECORDS_READ: &str = "tweet_indexer_records_read_total";
pub const DECODE_ERRORS: &str = "tweet_indexer_decode_errors_total";
pub const FETCH_ERRORS: &str = "tweet_indexer_fetch_errors_total";
pub const TWEETS_ENRICHED: &str = "tweet_indexer_tweets_enriched_total";
pub const GEOIP_LOOKUP_FAILURES: &str = "tweet_indexer_geoip_lookup_failures_total";
pub const FLUSHES: &str = "tweet_indexer_flushes_total";
pub const FLUSH_DURATION: &str = "tweet_indexer_flush_duration_seconds";
pub const DOCUMENTS_FLUSHED: &str = "tweet_indexer_documents_flushed_total";
pub const BULK_WRITE_FAILURES: &str = "tweet_indexer_bulk_write_failures_total";
pub const DOCUMENTS_DROPPED: &str = "tweet_indexer_documents_dropped_total";
pub const QUEUE_FILLNESS: &str = "tweet_indexer_queue_fillness_percent";
pub const TASKS_FAILED: &str = "tweet_indexer_tasks_failed_total";
