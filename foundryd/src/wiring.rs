//! Process wiring: builds the production service graph from settings.

use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use config::Settings;
use foundry::capabilities::CapabilityRegistry;
use foundry::clients::{HttpCrudClient, HttpRepoHost, ThreadHistoryKnowledge};
use foundry::coordinator::{build_coordinator_graph, run_chat_service, Orchestrator};
use foundry::deploy::{
    build_deploy_graph, DeployJobRunner, HttpHealthProbe, RedisPlaybookRunner,
};
use foundry::engineering::{build_engineering_graph, DockerBuildSandbox, EngineeringJobRunner};
use foundry::jobs::{run_worker, JobKind, JobRunner, RedisJobQueue, WorkerOptions};
use foundry::llm::ChatOpenAI;
use foundry::memory::RedisSaver;
use foundry::sandbox::{
    ContainerManager, ControlPlaneServer, DockerDriver, FactoryRegistry, RedisContextStore,
};
use foundry::session::{RedisSessionStore, SessionCoordinator, SessionStore};
use foundry::state::OrchestratorState;
use foundry::tools::ToolServices;
use foundry::transport::RedisChatTransport;

pub async fn connect_redis(settings: &Settings) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(settings.redis_url.as_str()).context("redis url")?;
    client
        .get_connection_manager()
        .await
        .context("redis connection")
}

fn tool_services(settings: &Settings, redis: ConnectionManager) -> ToolServices {
    let checkpointer: Arc<RedisSaver<OrchestratorState>> =
        Arc::new(RedisSaver::new(redis.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis.clone()));
    ToolServices {
        crud: Arc::new(HttpCrudClient::new(&settings.api_base_url)),
        repo_host: Arc::new(HttpRepoHost::new(
            &settings.api_base_url,
            &settings.repo_app_id,
        )),
        queue: Arc::new(RedisJobQueue::new(redis.clone())),
        checkpointer: checkpointer.clone(),
        transport: Arc::new(RedisChatTransport::new(redis)),
        knowledge: Arc::new(ThreadHistoryKnowledge::new(
            checkpointer,
            sessions.clone(),
        )),
        sessions,
        capabilities: Arc::new(CapabilityRegistry::with_defaults()),
    }
}

/// Chat service: incoming stream → session lock → coordinator graph → outgoing.
pub async fn serve(
    settings: &Settings,
    redis: ConnectionManager,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let services = tool_services(settings, redis.clone());
    let checkpointer = services.checkpointer.clone();
    let transport = services.transport.clone();
    let crud = services.crud.clone();
    let sessions = SessionCoordinator::new(services.sessions.clone());

    let coordinator_llm = Arc::new(ChatOpenAI::new(settings.coordinator_model.clone()));
    let intent_llm = Arc::new(ChatOpenAI::new(settings.intent_model.clone()));
    let graph = build_coordinator_graph(
        coordinator_llm,
        intent_llm,
        services,
        checkpointer.clone(),
    )
    .context("coordinator graph")?;

    let orchestrator = Arc::new(Orchestrator::new(
        graph,
        sessions,
        checkpointer,
        transport.clone(),
        crud,
    ));
    run_chat_service(orchestrator, transport, shutdown)
        .await
        .context("chat service")
}

/// One consumer-group worker loop for the given kind.
pub async fn worker(
    settings: &Settings,
    redis: ConnectionManager,
    kind: JobKind,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let crud: Arc<HttpCrudClient> = Arc::new(HttpCrudClient::new(&settings.api_base_url));
    let repo_host = Arc::new(HttpRepoHost::new(
        &settings.api_base_url,
        &settings.repo_app_id,
    ));
    let checkpointer = Arc::new(RedisSaver::<OrchestratorState>::new(redis.clone()));
    let queue = Arc::new(RedisJobQueue::new(redis.clone()));

    let runner: Arc<dyn JobRunner> = match kind {
        JobKind::Deploy => {
            let graph = build_deploy_graph(
                crud,
                repo_host,
                Arc::new(ChatOpenAI::new(settings.coordinator_model.clone())),
                Arc::new(RedisPlaybookRunner::new(redis)),
                Arc::new(HttpHealthProbe::new()),
                checkpointer.clone(),
            )
            .context("deploy graph")?;
            Arc::new(DeployJobRunner::new(graph, checkpointer))
        }
        JobKind::Engineering => {
            let driver = Arc::new(DockerDriver::connect().context("docker")?);
            let containers = Arc::new(ContainerManager::new(
                driver.clone(),
                Arc::new(FactoryRegistry::with_defaults()),
                Arc::new(RedisContextStore::new(redis)),
            ));
            let graph = build_engineering_graph(
                crud,
                repo_host,
                Arc::new(ChatOpenAI::new(settings.coordinator_model.clone())),
                containers,
                Arc::new(DockerBuildSandbox::new(driver)),
                vec![(
                    "ANTHROPIC_API_KEY".to_string(),
                    settings.anthropic_api_key.clone(),
                )],
                checkpointer.clone(),
            )
            .context("engineering graph")?;
            Arc::new(EngineeringJobRunner::new(graph, checkpointer))
        }
    };

    run_worker(kind, queue, runner, WorkerOptions::default(), shutdown)
        .await
        .context("worker loop")
}

/// Container control plane plus the TTL reaper.
pub async fn container_manager(
    redis: ConnectionManager,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let driver = Arc::new(DockerDriver::connect().context("docker")?);
    let manager = Arc::new(ContainerManager::new(
        driver,
        Arc::new(FactoryRegistry::with_defaults()),
        Arc::new(RedisContextStore::new(redis.clone())),
    ));

    let reaper_manager = manager.clone();
    let reaper_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = reaper_shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let reaped = reaper_manager.reap_expired().await;
                    if !reaped.is_empty() {
                        warn!(count = reaped.len(), "reaped expired agent containers");
                    }
                }
            }
        }
    });

    ControlPlaneServer::new(redis, manager).serve(shutdown).await;
    Ok(())
}
