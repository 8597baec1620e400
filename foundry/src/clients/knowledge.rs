//! Knowledge search: the RAG contract plus the built-in `history` backend.
//!
//! The indexer and embeddings service are external; the coordinator's
//! `search_knowledge` tool goes through [`KnowledgeBase`]. `docs`, `code` and
//! `logs` are optional scopes in this build and return empty ranked lists.
//! `history` is served locally by [`ThreadHistoryKnowledge`], which walks the
//! user's recent threads (enumerated from the session sequence counter) and
//! scores their checkpointed conversation messages against the query.
//! [`NullKnowledge`] is the offline backend used in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::{Checkpointer, RunnableConfig};
use crate::message::Message;
use crate::session::SessionStore;
use crate::state::OrchestratorState;

/// Search scope accepted by `search_knowledge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeScope {
    Docs,
    Code,
    History,
    Logs,
    All,
}

impl KnowledgeScope {
    /// Whether this scope asks for conversation history.
    pub fn includes_history(self) -> bool {
        matches!(self, KnowledgeScope::History | KnowledgeScope::All)
    }
}

impl std::str::FromStr for KnowledgeScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docs" => Ok(Self::Docs),
            "code" => Ok(Self::Code),
            "history" => Ok(Self::History),
            "logs" => Ok(Self::Logs),
            "all" => Ok(Self::All),
            _ => Err(format!("unknown scope: {}", s)),
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub source: String,
    pub snippet: String,
    pub score: f32,
}

/// Knowledge backend: ranked search across the requested scope.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(
        &self,
        query: &str,
        scope: KnowledgeScope,
        thread_id: Option<&str>,
    ) -> Vec<KnowledgeHit>;
}

/// Backend used in tests and offline runs: every scope is empty.
#[derive(Default)]
pub struct NullKnowledge;

#[async_trait]
impl KnowledgeBase for NullKnowledge {
    async fn search(
        &self,
        _query: &str,
        _scope: KnowledgeScope,
        _thread_id: Option<&str>,
    ) -> Vec<KnowledgeHit> {
        Vec::new()
    }
}

/// Most recent threads scanned per history search.
const HISTORY_THREAD_LIMIT: u64 = 20;
/// Hits returned per search.
const MAX_HITS: usize = 10;
/// Snippet length cap (characters).
const SNIPPET_LEN: usize = 200;

/// Production `history` backend over the checkpoint store.
///
/// Thread ids are `thread_{user}_{seq}` with a persistent per-user counter, so
/// the user's recent threads are `thread_{user}_{seq-N..=seq}`; each one's
/// latest checkpoint holds the conversation messages to score. `docs`, `code`
/// and `logs` stay empty here (external indexer, optional scopes).
pub struct ThreadHistoryKnowledge {
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
    sessions: Arc<dyn SessionStore>,
}

impl ThreadHistoryKnowledge {
    pub fn new(
        checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            checkpointer,
            sessions,
        }
    }

    /// User id embedded in a `thread_{user}_{seq}` id.
    fn user_of(thread_id: &str) -> Option<i64> {
        thread_id
            .strip_prefix("thread_")?
            .split('_')
            .next()?
            .parse()
            .ok()
    }

    /// Fraction of query terms found in the text (case-insensitive).
    fn score(query: &str, text: &str) -> f32 {
        let haystack = text.to_lowercase();
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return 0.0;
        }
        let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
        matched as f32 / terms.len() as f32
    }

    fn snippet(text: &str) -> String {
        text.chars().take(SNIPPET_LEN).collect()
    }
}

#[async_trait]
impl KnowledgeBase for ThreadHistoryKnowledge {
    async fn search(
        &self,
        query: &str,
        scope: KnowledgeScope,
        thread_id: Option<&str>,
    ) -> Vec<KnowledgeHit> {
        if !scope.includes_history() {
            return Vec::new();
        }
        let Some(user_id) = thread_id.and_then(Self::user_of) else {
            return Vec::new();
        };
        let seq = match self.sessions.current_thread_seq(user_id).await {
            Ok(seq) => seq,
            Err(e) => {
                debug!(user_id, error = %e, "history search: sequence read failed");
                return Vec::new();
            }
        };
        let first = seq.saturating_sub(HISTORY_THREAD_LIMIT) + 1;

        let mut hits = Vec::new();
        for n in (first..=seq).rev() {
            let tid = format!("thread_{}_{}", user_id, n);
            let checkpoint = match self
                .checkpointer
                .latest(&RunnableConfig::for_thread(&tid))
                .await
            {
                Ok(Some(cp)) => cp,
                Ok(None) => continue,
                Err(e) => {
                    debug!(thread = %tid, error = %e, "history search: checkpoint read failed");
                    continue;
                }
            };
            for message in &checkpoint.state.messages {
                let (role, text) = match message {
                    Message::User(text) => ("user", text.as_str()),
                    Message::Assistant { content, .. } if !content.is_empty() => {
                        ("assistant", content.as_str())
                    }
                    _ => continue,
                };
                let score = Self::score(query, text);
                if score > 0.0 {
                    hits.push(KnowledgeHit {
                        source: format!("{}#{}", tid, role),
                        snippet: Self::snippet(text),
                        score,
                    });
                }
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(MAX_HITS);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Checkpoint, MemorySaver};
    use crate::session::InMemorySessionStore;

    /// **Scenario**: Scope parses all five accepted values and rejects others.
    #[test]
    fn scope_from_str() {
        for (s, v) in [
            ("docs", KnowledgeScope::Docs),
            ("code", KnowledgeScope::Code),
            ("history", KnowledgeScope::History),
            ("logs", KnowledgeScope::Logs),
            ("all", KnowledgeScope::All),
        ] {
            assert_eq!(s.parse::<KnowledgeScope>().unwrap(), v);
        }
        assert!("emails".parse::<KnowledgeScope>().is_err());
    }

    /// **Scenario**: NullKnowledge returns an empty ranked list for any scope.
    #[tokio::test]
    async fn null_knowledge_empty() {
        let kb = NullKnowledge;
        assert!(kb
            .search("deploy", KnowledgeScope::All, Some("thread_7_1"))
            .await
            .is_empty());
    }

    async fn history_backend() -> ThreadHistoryKnowledge {
        let saver = Arc::new(MemorySaver::<OrchestratorState>::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        // Two finished threads for user 7.
        sessions.next_thread_seq(7).await.unwrap();
        sessions.next_thread_seq(7).await.unwrap();
        let mut state = OrchestratorState::default();
        state.messages.push(Message::user("deploy hello-world-bot"));
        state
            .messages
            .push(Message::assistant("Deployment queued as deploy_hello-world-bot_0a1b2c3d."));
        saver
            .put(
                &RunnableConfig::for_thread("thread_7_1"),
                &Checkpoint::from_state(state, 1),
            )
            .await
            .unwrap();
        ThreadHistoryKnowledge::new(saver, sessions)
    }

    /// **Scenario**: The history scope walks the user's past threads and ranks
    /// checkpointed messages matching the query.
    #[tokio::test]
    async fn history_reads_past_thread_checkpoints() {
        let kb = history_backend().await;
        let hits = kb
            .search("deploy hello-world-bot", KnowledgeScope::History, Some("thread_7_2"))
            .await;
        assert!(!hits.is_empty());
        assert!(hits[0].source.starts_with("thread_7_1#"));
        assert!(hits[0].snippet.contains("hello-world-bot"));
        assert!(hits[0].score > 0.0);

        let none = kb
            .search("billing invoices", KnowledgeScope::History, Some("thread_7_2"))
            .await;
        assert!(none.is_empty());
    }

    /// **Scenario**: Another user's thread id never surfaces this user's
    /// history; a missing thread id yields an empty list.
    #[tokio::test]
    async fn history_is_scoped_to_the_thread_user() {
        let kb = history_backend().await;
        let other = kb
            .search("deploy", KnowledgeScope::History, Some("thread_8_1"))
            .await;
        assert!(other.is_empty());
        let anonymous = kb.search("deploy", KnowledgeScope::History, None).await;
        assert!(anonymous.is_empty());
    }

    /// **Scenario**: docs, code and logs are optional scopes here and stay
    /// empty even when history would match.
    #[tokio::test]
    async fn optional_scopes_stay_empty() {
        let kb = history_backend().await;
        for scope in [KnowledgeScope::Docs, KnowledgeScope::Code, KnowledgeScope::Logs] {
            assert!(kb.search("deploy", scope, Some("thread_7_2")).await.is_empty());
        }
        // `all` includes history.
        assert!(!kb.search("deploy", KnowledgeScope::All, Some("thread_7_2")).await.is_empty());
    }

    /// **Scenario**: Scoring is a case-insensitive term-overlap ratio.
    #[test]
    fn score_is_term_overlap() {
        let full = ThreadHistoryKnowledge::score("Deploy Bot", "deploy the bot now");
        assert!((full - 1.0).abs() < f32::EPSILON);
        let half = ThreadHistoryKnowledge::score("deploy billing", "deploy the bot");
        assert!((half - 0.5).abs() < f32::EPSILON);
        assert_eq!(ThreadHistoryKnowledge::score("", "anything"), 0.0);
    }

    /// **Scenario**: user_of parses thread ids and rejects foreign formats.
    #[test]
    fn user_of_parses_thread_ids() {
        assert_eq!(ThreadHistoryKnowledge::user_of("thread_625038902_14"), Some(625038902));
        assert_eq!(ThreadHistoryKnowledge::user_of("deploy_app_0011aabb"), None);
    }
}
