//! Forge Processing Core - bootstrap.
//!
//! Initialization is ordered: store → broker → workers → manager → gateway →
//! pipeline; teardown runs in reverse. Every service object is constructed
//! once here and handed to its consumers, never reached through globals.

mod provider;

use core_config::broker::BrokerConfig;
use core_config::database::DatabaseConfig;
use core_config::realtime::RealtimeConfig;
use core_config::{Environment, FromEnv};
use domain_intelligence::{
    default_concurrency, ClassificationProcessor, ClusteringProcessor, DeduplicationProcessor,
    EmbeddingProcessor, InMemoryItemStore, ItemStore, OptimizationProcessor, QualityProcessor,
    SharedProvider, SimilarityProcessor,
};
use domain_jobs::{
    AuditRepository, Job, JobQueueService, JobRepository, JobType, PgAuditRepository,
    PgJobRepository, QueueManager,
};
use domain_pipeline::OptimizationPipeline;
use domain_realtime::RealtimeGateway;
use job_queue::{
    BackoffPolicy, Broker, EventBus, JobLifecycle, JobProcessor, ProgressStore, QueueWorker,
    RedisProgressCache, WorkerConfig,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Everything the process hosts, in construction order.
pub struct Services {
    pub bus: EventBus,
    pub queue: Arc<JobQueueService>,
    pub manager: Arc<QueueManager>,
    pub gateway: Arc<RealtimeGateway>,
    pub pipeline: Arc<OptimizationPipeline>,
}

pub async fn run() -> eyre::Result<()> {
    core_config::install_error_reporting()?;
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    info!("Starting forge processing core");

    // 1. Store
    let db_config = DatabaseConfig::from_env()?;
    let db = database::postgres::connect_with_retry(&db_config.url, None).await?;
    let jobs_repo: Arc<dyn JobRepository> = Arc::new(PgJobRepository::new(db.clone()));
    let audit: Arc<dyn AuditRepository> = Arc::new(PgAuditRepository::new(db));

    // 2. Broker and its backing store
    let broker_config = BrokerConfig::from_env()?;
    let redis = database::redis::connect_with_retry(&broker_config.uri(), None).await?;
    let bus = EventBus::new();
    let progress: Arc<dyn ProgressStore> = Arc::new(RedisProgressCache::new(redis.clone()));
    let broker: Broker<Job> = Broker::new(BackoffPolicy::default());

    let queue = Arc::new(JobQueueService::new(
        jobs_repo,
        broker.clone(),
        Arc::clone(&progress),
        bus.clone(),
    ));

    // Item persistence is owned by the content service; this process keeps
    // worker-visible item state in memory
    let items: Arc<dyn ItemStore> = Arc::new(InMemoryItemStore::new());
    let llm: SharedProvider = provider::provider_from_env();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 3. Workers
    let mut tasks: JoinSet<()> = JoinSet::new();
    spawn_workers(
        &mut tasks,
        &broker,
        &queue,
        &progress,
        &bus,
        &items,
        &llm,
        &shutdown_rx,
    );

    // 4. Manager and its supervision loops
    let manager = Arc::new(QueueManager::new(Arc::clone(&queue), Some(redis.clone())));
    {
        let manager = Arc::clone(&manager);
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { manager.run_health_loop(rx).await });
    }
    {
        let manager = Arc::clone(&manager);
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { manager.run_progress_broadcast(rx).await });
    }

    // 5. Gateway
    let realtime_config = RealtimeConfig::from_env()?;
    let gateway = Arc::new(RealtimeGateway::new(
        bus.clone(),
        realtime_config.clone(),
        Arc::clone(&manager),
        Arc::clone(&audit),
        Some(redis),
    ));
    for spawn in [
        spawn_gateway_loop(&gateway, &shutdown_rx, GatewayLoop::Fanout),
        spawn_gateway_loop(&gateway, &shutdown_rx, GatewayLoop::Heartbeat),
        spawn_gateway_loop(&gateway, &shutdown_rx, GatewayLoop::Metrics),
    ] {
        tasks.spawn(spawn);
    }

    let listener = tokio::net::TcpListener::bind(realtime_config.address()).await?;
    info!(address = %realtime_config.address(), "Realtime gateway listening");
    let router = domain_realtime::router(Arc::clone(&gateway));
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Gateway server exited with error");
        }
    });

    // 6. Pipeline
    let pipeline = Arc::new(OptimizationPipeline::new(
        Arc::clone(&queue),
        items,
        Arc::clone(&audit),
    ));

    let services = Services {
        bus,
        queue,
        manager,
        gateway,
        pipeline,
    };

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    // Teardown in reverse: stop intake, drain workers, sweep, close gateway
    shutdown_tx.send(true).ok();
    services.manager.shutdown().await?;
    while tasks.join_next().await.is_some() {}
    server.await.ok();

    info!("Forge processing core stopped");
    Ok(())
}

enum GatewayLoop {
    Fanout,
    Heartbeat,
    Metrics,
}

fn spawn_gateway_loop(
    gateway: &Arc<RealtimeGateway>,
    shutdown: &watch::Receiver<bool>,
    which: GatewayLoop,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    let gateway = Arc::clone(gateway);
    let rx = shutdown.clone();
    async move {
        match which {
            GatewayLoop::Fanout => gateway.run_event_fanout(rx).await,
            GatewayLoop::Heartbeat => gateway.run_heartbeat(rx).await,
            GatewayLoop::Metrics => gateway.run_metrics_snapshot(rx).await,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_workers(
    tasks: &mut JoinSet<()>,
    broker: &Broker<Job>,
    queue: &Arc<JobQueueService>,
    progress: &Arc<dyn ProgressStore>,
    bus: &EventBus,
    items: &Arc<dyn ItemStore>,
    llm: &SharedProvider,
    shutdown: &watch::Receiver<bool>,
) {
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::Classification,
        ClassificationProcessor::new(Arc::clone(llm), Arc::clone(items)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::Optimization,
        OptimizationProcessor::new(Arc::clone(llm), Arc::clone(items)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::Deduplication,
        DeduplicationProcessor::new(Arc::clone(llm), Arc::clone(items)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::QualityAssessment,
        QualityProcessor::new(Arc::clone(items)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::SimilarityScoring,
        SimilarityProcessor::new(Arc::clone(llm)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::EmbeddingGeneration,
        EmbeddingProcessor::new(Arc::clone(llm), Arc::clone(items)),
    );
    spawn_worker(
        tasks,
        broker,
        queue,
        progress,
        bus,
        shutdown,
        JobType::SemanticClustering,
        ClusteringProcessor::new(Arc::clone(llm), Arc::clone(items)),
    );
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker<P>(
    tasks: &mut JoinSet<()>,
    broker: &Broker<Job>,
    queue: &Arc<JobQueueService>,
    progress: &Arc<dyn ProgressStore>,
    bus: &EventBus,
    shutdown: &watch::Receiver<bool>,
    job_type: JobType,
    processor: P,
) where
    P: JobProcessor<Job> + 'static,
{
    let worker = Arc::new(QueueWorker::new(
        broker.clone(),
        processor,
        Arc::clone(queue) as Arc<dyn JobLifecycle>,
        Arc::clone(progress),
        bus.clone(),
        WorkerConfig::new(job_type.to_string(), default_concurrency(job_type)),
    ));
    let rx = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = worker.run(rx).await {
            error!(queue = %worker.queue(), error = %e, "Worker exited with error");
        }
    });
}
