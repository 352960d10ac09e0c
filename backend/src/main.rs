//! Service entry-point: loads the reference grid, starts the reduction
//! consumer, resumes reductions and fails tasks interrupted by a previous
//! run, and serves the API.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use color_eyre::eyre::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use lesion_bank::inbound::http::health::HealthState;
use lesion_bank::inbound::http::state::HttpState;
use lesion_bank::outbound::queue::{ChannelReductionQueue, spawn_reduction_consumer};
use lesion_bank::server::{CorpusAdapters, ReferenceData, create_server, load_settings};

const CONSUMER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let (settings, pipeline) = load_settings("lesion-bank")?;
    let bind_addr = settings.bind_addr()?;
    let adapters = CorpusAdapters::connect(&settings)
        .await
        .wrap_err("failed to connect corpus adapters")?;
    let reference = ReferenceData::load(&settings, &adapters.codec)?;

    let worker = Arc::new(adapters.reduction_worker(&reference, &pipeline));
    let (queue, receiver) = ChannelReductionQueue::channel(pipeline.queue_capacity());
    let consumer = spawn_reduction_consumer(receiver, worker, pipeline.worker_concurrency());

    let orchestrator = adapters.orchestrator(&reference, &settings, &pipeline);
    let recovered = orchestrator
        .recover_interrupted()
        .await
        .wrap_err("failed to recover interrupted tasks")?;
    info!(recovered, "task recovery finished");

    let ingestion = adapters.ingestion(Arc::new(queue), &pipeline);
    let backlog = ingestion.clone();
    tokio::spawn(async move {
        if let Err(error) = backlog.resume_pending_reductions().await {
            warn!(%error, "failed to resume pending reductions");
        }
    });

    let max_upload_bytes = pipeline.ingestion_config().max_upload_bytes;
    let http_state = HttpState::new(
        orchestrator,
        ingestion,
        adapters.point_query(),
        adapters.codec.clone(),
    )
    .with_scope(settings.scope())
    .with_max_upload_bytes(max_upload_bytes);

    let health_state = web::Data::new(HealthState::new());
    let server = create_server(health_state.clone(), http_state, bind_addr)?;
    health_state.mark_ready();
    let outcome = server.await;
    health_state.mark_draining();

    // The server owned the last queue sender, so the consumer drains and exits.
    match tokio::time::timeout(CONSUMER_DRAIN_TIMEOUT, consumer).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(%error, "reduction consumer ended abnormally"),
        Err(_) => warn!("reduction consumer did not drain before shutdown"),
    }
    outcome.wrap_err("http server failed")
}
