use anyhow::{Context, Result};
use resource_service::config::Config;
use resource_service::{
    start_api_server, AppState, DerivativeService, Disks, FfmpegCli, FocalThumbnailPipeline,
    FrameGrabber, GrabPropertyRepository, InMemoryRepository, InProcessJobQueue,
    IngestionService, JobQueue, JobWorker, PgRepository, ResourceJobHandler, ResourceRepository,
    ThumbnailRepository, VideoFrameSampler,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting resource service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let disks = Disks::from_config(&config.disks)
        .await
        .context("Failed to initialize storage disks")?;

    info!(disks = ?disks.names(), "Storage disks ready");

    match config.database.clone() {
        Some(database) => {
            let repository = PgRepository::new(&database)
                .await
                .context("Failed to initialize repository")?;

            if database.run_migrations {
                repository
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            run(Arc::new(repository), disks, config).await
        }
        None => {
            warn!("No database configured, records are kept in memory");
            run(Arc::new(InMemoryRepository::new()), disks, config).await
        }
    }
}

/// Wire the services around a repository and serve until shutdown
async fn run<R>(repository: Arc<R>, disks: Disks, config: Config) -> Result<()>
where
    R: ResourceRepository + ThumbnailRepository + GrabPropertyRepository + 'static,
{
    for thumbnail in config.thumbnails.seed.iter().cloned() {
        let id = thumbnail.id.clone();
        repository
            .upsert_thumbnail(thumbnail)
            .await
            .with_context(|| format!("Failed to seed thumbnail {id}"))?;
    }

    let (queue, receiver) = InProcessJobQueue::new();
    let job_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());

    let ingestion = Arc::new(
        IngestionService::new(
            repository.clone(),
            disks.clone(),
            job_queue.clone(),
            config.resources.clone(),
            config.download.clone(),
        )
        .context("Failed to initialize ingestion service")?,
    );

    let grabber: Arc<dyn FrameGrabber> = Arc::new(FfmpegCli::from_config(&config.video));
    let sampler = VideoFrameSampler::new(grabber, config.download.scratch_dir.clone())
        .with_sample_range(config.video.min_samples, config.video.max_samples);

    let derivatives = Arc::new(DerivativeService::new(
        repository.clone(),
        disks.clone(),
        sampler,
        config.resources.file_not_found.clone(),
        config.resources.cache_quality,
    )
    .with_max_dimension(config.resources.max_derivative_dimension));

    let pipeline = Arc::new(FocalThumbnailPipeline::new(
        repository.clone(),
        repository.clone(),
        repository.clone(),
        disks,
        job_queue,
        config.thumbnails.quality,
    ));

    // Spawn job worker
    let handler = Arc::new(ResourceJobHandler::new(ingestion.clone(), pipeline.clone()));
    let worker = JobWorker::new(
        handler,
        queue,
        receiver,
        config.worker.concurrency,
        config.worker.max_attempts,
    );
    let worker_shutdown = worker.shutdown_token();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!(error = %e, "Job worker error");
        }
    });

    let state = AppState {
        ingestion,
        derivatives,
        pipeline,
    };

    info!("Resource service started successfully");

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
    }

    info!("Shutting down resource service");

    worker_shutdown.cancel();
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Job worker task failed");
    }

    info!("Resource service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
