//! Index users and geo-enriched tweets from Kafka into Elasticsearch.
use std::sync::Arc;

use common_geoip::GeoIpClient;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use tweet_indexer::{
    config::Config,
    error::StartupError,
    pipeline::{Pipeline, PipelineSources},
    server::{router, serve, setup_metrics_recorder},
    sink::ElasticsearchSink,
    source::kafka_sources,
};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn wait_for_shutdown_signal(cancel: CancellationToken) -> Result<(), std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
    cancel.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_validated()?;
    let cancel = CancellationToken::new();

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|source| StartupError::Bind {
            bind: bind.clone(),
            source,
        })?;
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        router(cancel.clone(), setup_metrics_recorder()?),
        server_shutdown.clone(),
    ));
    info!(bind = %bind, "Serving probes and metrics");

    let signals = tokio::spawn(wait_for_shutdown_signal(cancel.clone()));

    let resolver = Arc::new(GeoIpClient::new(&config.geoip_db_path)?);
    let sink = Arc::new(ElasticsearchSink::new(&config.elastic)?);
    let sources = PipelineSources {
        users: kafka_sources(
            &config.kafka,
            &config.users_topic,
            config.users_topic_partitions,
        )?,
        tweets: kafka_sources(
            &config.kafka,
            &config.tweets_topic,
            config.tweets_topic_partitions,
        )?,
    };

    let result = Pipeline::new(config.pipeline(), sources, resolver, sink)
        .run(cancel.clone())
        .await;

    // Whatever ended the pipeline, the signal listener is no longer needed.
    cancel.cancel();
    match signals.await {
        Ok(Err(e)) => error!(error = %e, "Failed to listen for shutdown signals"),
        Err(e) => error!(error = %e, "Signal listener panicked"),
        Ok(Ok(())) => {}
    }

    server_shutdown.cancel();
    match server.await {
        Ok(Err(e)) => error!(error = %e, "Probe server failed"),
        Err(e) => error!(error = %e, "Probe server panicked"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = &result {
        error!(error = %e, "Pipeline failed");
    }
    info!("Shut down");
    result.map_err(StartupError::from)
}
