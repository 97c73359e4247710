//! The chat-turn pipeline: named sequential stages with typed inputs and
//! outputs. Each stage delegates to an external capability; the pipeline
//! itself never touches the database — the caller persists the outcome.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::ai::CompletionClient;
use crate::index::{DocumentFragment, VectorIndex};

use super::{prompts, ChatHistory};

/// Fragments fetched per retrieval (the diversity-aware search fetch-k).
pub const RETRIEVAL_K: usize = 5;

/// Prefix of auto-created chat names. A chat still carrying it is eligible
/// for the summary rename.
pub const DEFAULT_NAME_PREFIX: &str = "Chat with";

/// Everything one turn produced; the handler persists it.
#[derive(Debug)]
pub struct TurnOutcome {
    pub answer: String,
    pub standalone_question: String,
    pub fragments: Vec<DocumentFragment>,
    /// `Some` when the rename stage ran.
    pub new_name: Option<String>,
}

/// The rename condition: at least one full prior exchange, and a name still
/// carrying the auto-created placeholder prefix.
pub fn should_rename(prior_messages: usize, name: &str) -> bool {
    prior_messages >= 2 && name.starts_with(DEFAULT_NAME_PREFIX)
}

pub struct ChatPipeline {
    completions: Arc<dyn CompletionClient>,
    index: Arc<dyn VectorIndex>,
}

impl ChatPipeline {
    pub fn new(completions: Arc<dyn CompletionClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self { completions, index }
    }

    /// Run one turn end to end. Strictly ordered: condense → retrieve →
    /// synthesize → title. Any external failure propagates; nothing has been
    /// persisted at that point.
    pub async fn run(
        &self,
        repo_id: i64,
        chat_name: &str,
        history: &ChatHistory,
        message: &str,
    ) -> Result<TurnOutcome> {
        let standalone_question = self.condense(history, message).await?;
        let fragments = self.retrieve(repo_id, &standalone_question).await?;
        let answer = self.synthesize(&fragments, history, &standalone_question).await?;

        let new_name = if should_rename(history.len(), chat_name) {
            Some(self.summarize_title(history, message, &answer).await?)
        } else {
            None
        };

        Ok(TurnOutcome {
            answer,
            standalone_question,
            fragments,
            new_name,
        })
    }

    /// Rewrite the utterance into a standalone question. With no prior
    /// conversation there is nothing to resolve against, so the literal
    /// message is used and the completion call is skipped.
    async fn condense(&self, history: &ChatHistory, message: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(message.to_string());
        }
        let standalone = self
            .completions
            .complete(&prompts::condense_messages(history, message))
            .await?;
        debug!(%standalone, "condensed follow-up into standalone question");
        Ok(standalone)
    }

    async fn retrieve(&self, repo_id: i64, question: &str) -> Result<Vec<DocumentFragment>> {
        let fragments = self.index.search(repo_id, question, RETRIEVAL_K).await?;
        debug!(repo_id, count = fragments.len(), "retrieved context fragments");
        Ok(fragments)
    }

    async fn synthesize(
        &self,
        fragments: &[DocumentFragment],
        history: &ChatHistory,
        question: &str,
    ) -> Result<String> {
        self.completions
            .complete(&prompts::answer_messages(fragments, history, question))
            .await
    }

    async fn summarize_title(
        &self,
        history: &ChatHistory,
        message: &str,
        answer: &str,
    ) -> Result<String> {
        self.completions
            .complete(&prompts::title_messages(history, message, answer))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatTurn;
    use crate::storage::ChatMessageRow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every completion request and answers from a script.
    struct ScriptedCompletions {
        calls: Mutex<Vec<Vec<ChatTurn>>>,
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedCompletions {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call(&self, i: usize) -> Vec<ChatTurn> {
            self.calls.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletions {
        async fn complete(&self, messages: &[ChatTurn]) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }
    }

    /// Returns canned fragments and records the queries it saw.
    struct StubIndex {
        fragments: Vec<DocumentFragment>,
        queries: Mutex<Vec<(i64, String, usize)>>,
    }

    impl StubIndex {
        fn with_fragments(contents: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fragments: contents
                    .iter()
                    .map(|c| DocumentFragment { content: c.to_string(), source: None })
                    .collect(),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn build(&self, _repo_id: i64) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            repo_id: i64,
            query: &str,
            k: usize,
        ) -> Result<Vec<DocumentFragment>> {
            self.queries.lock().unwrap().push((repo_id, query.to_string(), k));
            Ok(self.fragments.clone())
        }
    }

    fn history_of(n_exchanges: usize) -> ChatHistory {
        let mut rows = Vec::new();
        for i in 0..n_exchanges {
            rows.push(ChatMessageRow {
                id: (2 * i) as i64,
                chat_id: 1,
                sender: "user".into(),
                content: format!("q{i}"),
                created_at: "2024-01-01T00:00:00Z".into(),
            });
            rows.push(ChatMessageRow {
                id: (2 * i + 1) as i64,
                chat_id: 1,
                sender: "ai".into(),
                content: format!("a{i}"),
                created_at: "2024-01-01T00:00:00Z".into(),
            });
        }
        ChatHistory::from_rows(&rows)
    }

    #[tokio::test]
    async fn first_turn_skips_condense_and_retrieves_the_literal_message() {
        let completions = ScriptedCompletions::new(&["It forks spoons."]);
        let index = StubIndex::with_fragments(&["readme text"]);
        let pipeline = ChatPipeline::new(completions.clone(), index.clone());

        let outcome = pipeline
            .run(7, "Chat with octo/spoon", &ChatHistory::default(), "What does this repo do?")
            .await
            .unwrap();

        // Only the synthesis call — no condense, no title on the first turn.
        assert_eq!(completions.call_count(), 1);
        assert_eq!(outcome.standalone_question, "What does this repo do?");
        assert_eq!(outcome.answer, "It forks spoons.");
        assert!(outcome.new_name.is_none());

        let queries = index.queries.lock().unwrap();
        assert_eq!(queries.as_slice(), &[(7, "What does this repo do?".to_string(), RETRIEVAL_K)]);
    }

    #[tokio::test]
    async fn later_turn_condenses_then_retrieves_the_standalone_question() {
        let completions =
            ScriptedCompletions::new(&["How is octo/spoon licensed?", "MIT.", "Spoon repo licensing"]);
        let index = StubIndex::with_fragments(&["LICENSE: MIT"]);
        let pipeline = ChatPipeline::new(completions.clone(), index.clone());

        let outcome = pipeline
            .run(7, "Chat with octo/spoon", &history_of(1), "and the license?")
            .await
            .unwrap();

        assert_eq!(completions.call_count(), 3);
        assert_eq!(outcome.standalone_question, "How is octo/spoon licensed?");
        assert_eq!(outcome.answer, "MIT.");
        assert_eq!(outcome.new_name.as_deref(), Some("Spoon repo licensing"));

        // Retrieval ran on the condensed question, not the raw follow-up.
        let queries = index.queries.lock().unwrap();
        assert_eq!(queries[0].1, "How is octo/spoon licensed?");

        // The synthesis call carried the retrieved context.
        let synth = completions.call(1);
        assert!(synth[0].content.contains("LICENSE: MIT"));
    }

    #[tokio::test]
    async fn rename_requires_prior_exchange_and_placeholder_prefix() {
        assert!(!should_rename(0, "Chat with octo/spoon"));
        assert!(!should_rename(1, "Chat with octo/spoon"));
        assert!(should_rename(2, "Chat with octo/spoon"));
        assert!(should_rename(6, "Chat with octo/spoon"));
        assert!(!should_rename(6, "Spoon repo licensing"));
    }

    #[tokio::test]
    async fn renamed_chat_gets_no_second_title_call() {
        let completions = ScriptedCompletions::new(&["standalone", "answer"]);
        let index = StubIndex::with_fragments(&[]);
        let pipeline = ChatPipeline::new(completions.clone(), index);

        let outcome = pipeline
            .run(7, "Spoon repo licensing", &history_of(2), "more?")
            .await
            .unwrap();

        assert_eq!(completions.call_count(), 2, "condense + answer only");
        assert!(outcome.new_name.is_none());
    }

    #[tokio::test]
    async fn empty_index_still_yields_an_answer() {
        let completions = ScriptedCompletions::new(&["I don't know."]);
        let index = StubIndex::with_fragments(&[]);
        let pipeline = ChatPipeline::new(completions.clone(), index);

        let outcome = pipeline
            .run(7, "Chat with x", &ChatHistory::default(), "what is this?")
            .await
            .unwrap();

        assert_eq!(outcome.answer, "I don't know.");
        assert!(outcome.fragments.is_empty());
    }
}
