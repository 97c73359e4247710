//! Fixed instruction templates for the three completion calls of a chat
//! turn, and the builders that assemble the message lists around them.

use crate::ai::ChatTurn;
use crate::index::DocumentFragment;

use super::ChatHistory;

const CONDENSE_INSTRUCTION: &str = "Given the following conversation about a codebase and a \
     follow up question, rephrase the follow up question to be a standalone question.";

const ANSWER_INSTRUCTION: &str = "Use the following pieces of context to answer the question at \
     the end. If you don't know the answer, just say that you don't know, don't try to make up \
     an answer.";

const TITLE_INSTRUCTION: &str =
    "Provide keywords or a short summary with maximal six words for the following dialog:";

/// Messages for the standalone-question rewrite.
pub fn condense_messages(history: &ChatHistory, question: &str) -> Vec<ChatTurn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatTurn::system(CONDENSE_INSTRUCTION));
    messages.extend(history.turns().iter().cloned());
    messages.push(ChatTurn::user(format!(
        "Follow Up Input: {question}\nStandalone question:"
    )));
    messages
}

/// Messages for answer synthesis: retrieved fragments concatenated as
/// context, then the conversation, then the standalone question.
pub fn answer_messages(
    fragments: &[DocumentFragment],
    history: &ChatHistory,
    question: &str,
) -> Vec<ChatTurn> {
    let context = fragments
        .iter()
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatTurn::system(format!("{ANSWER_INSTRUCTION}\n\n{context}\n\n")));
    messages.extend(history.turns().iter().cloned());
    messages.push(ChatTurn::user(format!("Question: {question}")));
    messages
}

/// Single-message prompt asking for a ≤ 6-word label of the whole dialog,
/// including the exchange that just completed.
pub fn title_messages(history: &ChatHistory, question: &str, answer: &str) -> Vec<ChatTurn> {
    let mut dialog = String::from(TITLE_INSTRUCTION);
    dialog.push('\n');
    if !history.is_empty() {
        dialog.push_str(&history.transcript());
        dialog.push('\n');
    }
    dialog.push_str(&format!("user: {question}\nai: {answer}"));
    vec![ChatTurn::user(dialog)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatRole;
    use crate::storage::ChatMessageRow;

    fn history() -> ChatHistory {
        let rows = vec![
            ChatMessageRow {
                id: 1,
                chat_id: 1,
                sender: "user".into(),
                content: "What does this repo do?".into(),
                created_at: "2024-01-01T00:00:00Z".into(),
            },
            ChatMessageRow {
                id: 2,
                chat_id: 1,
                sender: "ai".into(),
                content: "It forks spoons.".into(),
                created_at: "2024-01-01T00:00:01Z".into(),
            },
        ];
        ChatHistory::from_rows(&rows)
    }

    #[test]
    fn condense_wraps_history_between_instruction_and_question() {
        let messages = condense_messages(&history(), "how is it licensed?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("standalone question"));
        assert_eq!(messages[1].content, "What does this repo do?");
        assert!(messages[3].content.starts_with("Follow Up Input: how is it licensed?"));
        assert!(messages[3].content.ends_with("Standalone question:"));
    }

    #[test]
    fn answer_context_concatenates_fragments() {
        let fragments = vec![
            DocumentFragment { content: "fn main() {}".into(), source: None },
            DocumentFragment { content: "MIT license".into(), source: Some("LICENSE".into()) },
        ];
        let messages = answer_messages(&fragments, &history(), "How is it licensed?");
        assert!(messages[0].content.contains("fn main() {}\n\nMIT license"));
        assert!(messages[0].content.contains("just say that you don't know"));
        assert_eq!(messages.last().unwrap().content, "Question: How is it licensed?");
    }

    #[test]
    fn answer_without_fragments_keeps_the_decline_instruction() {
        let messages = answer_messages(&[], &ChatHistory::default(), "anything?");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("don't try to make up an answer"));
    }

    #[test]
    fn title_prompt_includes_prior_and_new_exchange() {
        let messages = title_messages(&history(), "And the license?", "MIT.");
        assert_eq!(messages.len(), 1);
        let prompt = &messages[0].content;
        assert!(prompt.contains("maximal six words"));
        assert!(prompt.contains("user: What does this repo do?"));
        assert!(prompt.ends_with("user: And the license?\nai: MIT."));
    }
}
