//! End-to-end deploy flow: coordinator tools allocate resources and queue the
//! job, the worker runs the deploy sub-graph, and the status poll reads the
//! terminal checkpoint.

use std::sync::Arc;
use std::time::Duration;

use foundry::capabilities::CapabilityRegistry;
use foundry::clients::{InMemoryCrud, InMemoryRepoHost, NullKnowledge};
use foundry::coordinator::{build_coordinator_graph, Orchestrator};
use foundry::deploy::{build_deploy_graph, DeployJobRunner, MockPlaybookRunner, MockProbe};
use foundry::domain::{Project, ProjectConfig, ProjectStatus, Server, ServerStatus};
use foundry::jobs::{process_one, InMemoryJobQueue, JobKind, JobQueue, JobRunner};
use foundry::llm::{MockLlm, ScriptedTurn};
use foundry::memory::{Checkpointer, MemorySaver, RunnableConfig};
use foundry::session::{InMemorySessionStore, SessionCoordinator};
use foundry::state::{DeployStatus, OrchestratorState};
use foundry::tools::ToolServices;
use foundry::transport::{InMemoryTransport, IncomingMessage};

fn verified_project() -> Project {
    let mut config = ProjectConfig::default();
    config.required_env = vec!["SECRET_KEY".into(), "TELEGRAM_BOT_TOKEN".into()];
    config
        .secrets
        .insert("TELEGRAM_BOT_TOKEN".into(), "123:abc".into());
    Project {
        id: "p1".into(),
        name: "hello-world-bot".into(),
        owner_id: "user-1".into(),
        repository_url: Some("https://git.example/hello-world-bot".into()),
        status: ProjectStatus::Verified,
        config,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn managed_server() -> Server {
    Server {
        handle: "vps-267179".into(),
        public_ip: "1.2.3.4".into(),
        is_managed: true,
        available_ram_mb: 2048,
        available_disk_mb: 20_000,
        status: ServerStatus::Ready,
        ssh_key_ref: None,
        last_health_check: None,
    }
}

/// **Scenario**: deploy with missing resources; the coordinator
/// checks readiness, picks a server, allocates a port, triggers the deploy, and
/// a worker drives the job to success with the deployed URL in the checkpoint.
#[tokio::test]
async fn deploy_end_to_end() {
    let crud = Arc::new(InMemoryCrud::new());
    crud.seed_projects(vec![verified_project()]);
    crud.seed_servers(vec![managed_server()]);
    let transport = Arc::new(InMemoryTransport::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let checkpointer = Arc::new(MemorySaver::<OrchestratorState>::new());
    let queue = Arc::new(InMemoryJobQueue::default());

    let services = ToolServices {
        crud: crud.clone(),
        repo_host: Arc::new(InMemoryRepoHost::new()),
        queue: queue.clone(),
        checkpointer: checkpointer.clone(),
        transport: transport.clone(),
        knowledge: Arc::new(NullKnowledge),
        sessions: sessions.clone(),
        capabilities: Arc::new(CapabilityRegistry::with_defaults()),
    };

    let coordinator_llm = Arc::new(MockLlm::scripted(vec![
        MockLlm::tool_call_turn(
            "check_deploy_readiness",
            serde_json::json!({ "project_id": "p1" }),
        ),
        MockLlm::tool_call_turn("find_suitable_server", serde_json::json!({ "ram_mb": 512 })),
        MockLlm::tool_call_turn(
            "allocate_port",
            serde_json::json!({ "server_handle": "vps-267179", "project_id": "p1" }),
        ),
        MockLlm::tool_call_turn("trigger_deploy", serde_json::json!({ "project_id": "p1" })),
        MockLlm::tool_call_turn(
            "respond_to_user",
            serde_json::json!({ "message": "Deployment queued.", "awaiting_response": true }),
        ),
    ]));
    let intent_llm = Arc::new(MockLlm::with_no_tool_calls(
        r#"{"capabilities": ["deploy", "infrastructure"], "task_summary": "deploy hello-world-bot", "complexity": "complex"}"#,
    ));

    let graph = build_coordinator_graph(
        coordinator_llm.clone(),
        intent_llm,
        services,
        checkpointer.clone(),
    )
    .unwrap();
    let orchestrator = Orchestrator::new(
        graph,
        SessionCoordinator::new(sessions),
        checkpointer.clone(),
        transport.clone(),
        crud.clone(),
    );

    orchestrator
        .handle_incoming(IncomingMessage {
            user_id: 625038902,
            chat_id: 625038902,
            message_id: 1,
            text: "deploy hello-world-bot".into(),
            correlation_id: "corr-1".into(),
        })
        .await
        .unwrap();

    // The allocation was recorded and the user was told the deploy is queued.
    assert_eq!(crud.allocations().len(), 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("queued"));

    // The job is on the deploy queue with a seeded Queued checkpoint.
    let delivery = queue
        .read_one(JobKind::Deploy, "worker-1", Duration::ZERO)
        .await
        .unwrap()
        .expect("job queued");
    let job_id = delivery.payload.job_id.clone();
    assert!(job_id.starts_with("deploy_hello-world-bot_"));

    // Worker side: run the deploy sub-graph against the same checkpoint store.
    let env_llm = Arc::new(MockLlm::scripted(vec![ScriptedTurn {
        content: r#"{"SECRET_KEY": "infra", "TELEGRAM_BOT_TOKEN": "user"}"#.into(),
        tool_calls: vec![],
    }]));
    let deploy_graph = build_deploy_graph(
        crud.clone(),
        Arc::new(InMemoryRepoHost::new()),
        env_llm,
        Arc::new(MockPlaybookRunner::succeeding()),
        Arc::new(MockProbe::healthy()),
        checkpointer.clone(),
    )
    .unwrap();
    let runner: Arc<dyn JobRunner> =
        Arc::new(DeployJobRunner::new(deploy_graph, checkpointer.clone()));
    process_one(JobKind::Deploy, queue.as_ref(), &runner, delivery)
        .await
        .unwrap();

    // Round-trip law: the checkpoint under the job id is terminal and carries
    // the deployed URL the port allocation implies.
    let checkpoint = checkpointer
        .latest(&RunnableConfig::for_thread(&job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.state.deploy.status, DeployStatus::Success);
    let port = crud.allocations()[0].port;
    assert_eq!(
        checkpoint.state.deploy.deployed_url.as_deref(),
        Some(format!("http://1.2.3.4:{}", port).as_str())
    );
    // Exactly one successful acknowledgment.
    assert_eq!(queue.acked(JobKind::Deploy).len(), 1);
    // Generated infra secret exists; its value never reached the checkpoint.
    let secret = crud.secret("p1", "SECRET_KEY").expect("infra secret stored");
    let serialized = serde_json::to_string(&checkpoint.state).unwrap();
    assert!(!serialized.contains(&secret));
    assert!(!serialized.contains("123:abc"));
}
