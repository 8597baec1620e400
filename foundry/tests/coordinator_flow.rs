//! End-to-end coordinator flows over the in-memory stack: session lock,
//! intent gate, tool loop, completion and busy-reject semantics.

use std::sync::Arc;

use async_trait::async_trait;

use foundry::capabilities::CapabilityRegistry;
use foundry::clients::{InMemoryCrud, InMemoryRepoHost, NullKnowledge};
use foundry::coordinator::{build_coordinator_graph, Orchestrator};
use foundry::domain::{Project, ProjectConfig, ProjectStatus};
use foundry::error::GraphError;
use foundry::jobs::InMemoryJobQueue;
use foundry::llm::{LlmClient, LlmResponse, MockLlm, ToolSpec};
use foundry::memory::{Checkpointer, MemorySaver, RunnableConfig};
use foundry::message::Message;
use foundry::session::{InMemorySessionStore, SessionCoordinator, SessionState, SessionStore};
use foundry::state::OrchestratorState;
use foundry::tools::ToolServices;
use foundry::transport::{InMemoryTransport, IncomingMessage};

struct Stack {
    orchestrator: Orchestrator,
    transport: Arc<InMemoryTransport>,
    sessions: Arc<InMemorySessionStore>,
    checkpointer: Arc<MemorySaver<OrchestratorState>>,
    coordinator_llm: Arc<MockLlm>,
    intent_llm: Arc<MockLlm>,
}

fn incoming(user_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        user_id,
        chat_id: user_id,
        message_id: 1,
        text: text.to_string(),
        correlation_id: format!("corr-{}", text.len()),
    }
}

fn draft_project() -> Project {
    Project {
        id: "p1".into(),
        name: "hello-world-bot".into(),
        owner_id: "user-1".into(),
        repository_url: None,
        status: ProjectStatus::Draft,
        config: ProjectConfig::default(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn stack(coordinator_llm: Arc<MockLlm>, intent_llm: Arc<MockLlm>) -> Stack {
    let graph_llm: Arc<dyn LlmClient> = coordinator_llm.clone();
    stack_with_llm(graph_llm, coordinator_llm, intent_llm)
}

fn stack_with_llm(
    graph_llm: Arc<dyn LlmClient>,
    coordinator_llm: Arc<MockLlm>,
    intent_llm: Arc<MockLlm>,
) -> Stack {
    let crud = Arc::new(InMemoryCrud::new());
    crud.seed_projects(vec![draft_project()]);
    let transport = Arc::new(InMemoryTransport::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let checkpointer = Arc::new(MemorySaver::<OrchestratorState>::new());
    let services = ToolServices {
        crud: crud.clone(),
        repo_host: Arc::new(InMemoryRepoHost::new()),
        queue: Arc::new(InMemoryJobQueue::default()),
        checkpointer: checkpointer.clone(),
        transport: transport.clone(),
        knowledge: Arc::new(NullKnowledge),
        sessions: sessions.clone(),
        capabilities: Arc::new(CapabilityRegistry::with_defaults()),
    };
    let graph = build_coordinator_graph(
        graph_llm,
        intent_llm.clone(),
        services,
        checkpointer.clone(),
    )
    .expect("graph compiles");
    let orchestrator = Orchestrator::new(
        graph,
        SessionCoordinator::new(sessions.clone()),
        checkpointer.clone(),
        transport.clone(),
        crud,
    );
    Stack {
        orchestrator,
        transport,
        sessions,
        checkpointer,
        coordinator_llm,
        intent_llm,
    }
}

fn pm_intent_json() -> Arc<MockLlm> {
    Arc::new(MockLlm::with_no_tool_calls(
        r#"{"capabilities": ["project_management"], "task_summary": "list projects", "complexity": "simple"}"#,
    ))
}

/// **Scenario**: simple question, answer, "thanks", finish_task.
/// The session is held between the turns and released on completion with the
/// thread history cleared.
#[tokio::test]
async fn simple_question_then_confirmation() {
    let coordinator_llm = Arc::new(MockLlm::scripted(vec![
        MockLlm::tool_call_turn("list_projects", serde_json::json!({})),
        MockLlm::tool_call_turn(
            "respond_to_user",
            serde_json::json!({ "message": "You have one project: hello-world-bot (draft)" }),
        ),
        foundry::llm::ScriptedTurn {
            content: String::new(),
            tool_calls: vec![],
        },
        MockLlm::tool_call_turn(
            "finish_task",
            serde_json::json!({ "summary": "listed projects" }),
        ),
    ]));
    let stack = stack(coordinator_llm, pm_intent_json());

    stack
        .orchestrator
        .handle_incoming(incoming(625038902, "what projects do I have?"))
        .await
        .unwrap();

    let sent = stack.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("hello-world-bot"));
    // Session held (awaiting) after the reply.
    let lock = stack.sessions.get(625038902).await.unwrap().unwrap();
    assert_eq!(lock.state, SessionState::Awaiting);
    let thread_id = lock.thread_id.clone();
    // The classifier ran exactly once so far.
    assert_eq!(stack.intent_llm.call_count(), 1);

    stack
        .orchestrator
        .handle_incoming(incoming(625038902, "thanks"))
        .await
        .unwrap();

    // Completion: lock released, history cleared in the final checkpoint.
    assert!(stack.sessions.get(625038902).await.unwrap().is_none());
    let checkpoint = stack
        .checkpointer
        .latest(&RunnableConfig::for_thread(&thread_id))
        .await
        .unwrap()
        .unwrap();
    assert!(checkpoint.state.user_confirmed_complete);
    assert!(checkpoint.state.messages.is_empty());
    // Continuation skipped the classifier.
    assert_eq!(stack.intent_llm.call_count(), 1);
    assert_eq!(stack.coordinator_llm.call_count(), 4);
}

/// **Scenario**: a second message during `processing` is rejected
/// with a notice, no new thread is allocated, and no graph execution starts.
#[tokio::test]
async fn busy_reject_second_message() {
    let stack = stack(Arc::new(MockLlm::with_no_tool_calls("hi")), pm_intent_json());
    // Simulate an in-flight execution: lock held in Processing.
    let held = stack
        .sessions
        .try_acquire(
            625038902,
            &foundry::session::SessionLock {
                thread_id: "thread_625038902_1".into(),
                state: SessionState::Processing,
                locked_at: chrono::Utc::now(),
            },
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert!(held);

    stack
        .orchestrator
        .handle_incoming(incoming(625038902, "second message"))
        .await
        .unwrap();

    let sent = stack.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.to_lowercase().contains("wait")
        || sent[0].text.to_lowercase().contains("processing"));
    // The coordinator LLM never ran.
    assert_eq!(stack.coordinator_llm.call_count(), 0);
}

/// A deliberately failing LLM to exercise the release-on-error guarantee.
struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmResponse, GraphError> {
        Err(GraphError::ExecutionFailed("model unavailable".into()))
    }
}

/// **Scenario**: on graph execution error the session lock is
/// released so the user is not stuck.
#[tokio::test]
async fn lock_released_on_graph_error() {
    let stack = stack_with_llm(Arc::new(FailingLlm), Arc::new(MockLlm::with_no_tool_calls("")), pm_intent_json());
    let result = stack
        .orchestrator
        .handle_incoming(incoming(7, "hello"))
        .await;
    assert!(result.is_err());
    assert!(stack.sessions.get(7).await.unwrap().is_none());
    // The user got an apology instead of silence.
    assert_eq!(stack.transport.sent().len(), 1);
}

/// **Scenario**: po_iterations never exceeds the cap; a runaway tool
/// loop is cut at 20 coordinator turns.
#[tokio::test]
async fn iteration_cap_ends_runaway_loop() {
    let turns: Vec<_> = (0..30)
        .map(|_| {
            MockLlm::tool_call_turn(
                "search_knowledge",
                serde_json::json!({ "query": "anything", "scope": "all" }),
            )
        })
        .collect();
    let coordinator_llm = Arc::new(MockLlm::scripted(turns));
    let stack = stack(coordinator_llm, pm_intent_json());

    stack
        .orchestrator
        .handle_incoming(incoming(9, "loop forever"))
        .await
        .unwrap();

    assert_eq!(stack.coordinator_llm.call_count(), 20);
    let lock = stack.sessions.get(9).await.unwrap().unwrap();
    let checkpoint = stack
        .checkpointer
        .latest(&RunnableConfig::for_thread(&lock.thread_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.state.po_iterations, 20);
}

/// **Scenario**: thread ids strictly increase across completed
/// sessions of the same user.
#[tokio::test]
async fn thread_ids_strictly_increase_across_sessions() {
    let stack = stack(
        Arc::new(MockLlm::scripted(
            (0..3)
                .map(|i| {
                    MockLlm::tool_call_turn(
                        "finish_task",
                        serde_json::json!({ "summary": format!("round {}", i) }),
                    )
                })
                .collect(),
        )),
        pm_intent_json(),
    );
    for _ in 0..3 {
        // Each message completes immediately (finish_task) and releases the lock.
        stack
            .orchestrator
            .handle_incoming(incoming(11, "ok"))
            .await
            .unwrap();
    }
    let threads = stack.checkpointer.thread_ids().await;
    let mut seqs: Vec<u64> = threads
        .iter()
        .filter_map(|t| t.rsplit('_').next()?.parse().ok())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2, 3]);
}
