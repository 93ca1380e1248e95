//! Retrieval-augmented chat completion.
//!
//! Builds the model prompt from retrieved notes plus conversation history
//! and drives the chat model in streaming mode. Retrieval failures abort
//! before any model call; once streaming starts, failures terminate the
//! fragment stream itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provider::{ChatMessage, ChatModel, Role, TokenStream};
use crate::retriever::{RankedNote, Retriever};

/// Instructions prepended to every chat completion.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions \
about the user's personal notes. Use the retrieved note context to answer. \
If the context does not contain the answer, say you don't know rather than \
guessing. Reply in the same language the user writes in.";

/// One prior exchange turn supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// A streaming answer plus the notes that grounded it. The notes are
/// available immediately; the stream yields fragments as the model
/// produces them. Dropping the stream cancels generation.
pub struct ChatReply {
    pub stream: TokenStream,
    pub notes: Vec<RankedNote>,
}

/// History as model messages, minus the final turn. The final turn is the
/// question being asked; keeping it would duplicate the user message built
/// from `question`.
fn trim_history(conversation: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = conversation
        .iter()
        .map(|turn| ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        })
        .collect();
    messages.pop();
    messages
}

/// Assemble the full message list: system prompt with note context, then
/// trimmed history, then the question.
pub fn build_messages(
    question: &str,
    conversation: &[ConversationTurn],
    notes: &[RankedNote],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 2);

    let mut system = SYSTEM_PROMPT.to_string();
    if !notes.is_empty() {
        let context: Vec<&str> = notes.iter().map(|n| n.note.content.as_str()).collect();
        system.push_str("\n\nRetrieved notes:\n\n");
        system.push_str(&context.join("\n\n"));
    }
    messages.push(ChatMessage::system(system));

    messages.extend(trim_history(conversation));
    messages.push(ChatMessage::user(question));
    messages
}

/// Run retrieval for `question`, build the prompt, and start streaming.
pub async fn chat_completion(
    retriever: &Retriever,
    model: &Arc<dyn ChatModel>,
    top_k: usize,
    question: &str,
    conversation: &[ConversationTurn],
) -> Result<ChatReply> {
    let notes = retriever.retrieve(question, top_k).await?;
    let messages = build_messages(question, conversation, &notes);
    let stream = model.stream_chat(&messages).await?;
    Ok(ChatReply { stream, notes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::Note;

    fn ranked(id: i64, content: &str, rank: usize) -> RankedNote {
        RankedNote {
            note: Note {
                id,
                content: content.to_string(),
                kind: "note".to_string(),
            },
            rank,
        }
    }

    fn turn(role: Role, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_history_trims_final_turn() {
        let conversation = vec![
            turn(Role::User, "first question"),
            turn(Role::Assistant, "first answer"),
            turn(Role::User, "second question"),
        ];
        let trimmed = trim_history(&conversation);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[1].content, "first answer");
    }

    #[test]
    fn test_empty_history_stays_empty() {
        assert!(trim_history(&[]).is_empty());
    }

    #[test]
    fn test_messages_order_and_context() {
        let notes = vec![ranked(1, "The sky is blue", 0), ranked(2, "Water boils at 100C", 1)];
        let conversation = vec![
            turn(Role::User, "hello"),
            turn(Role::Assistant, "hi"),
            turn(Role::User, "what color is the sky"),
        ];

        let messages = build_messages("what color is the sky", &conversation, &notes);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("The sky is blue"));
        assert!(messages[0].content.contains("Water boils at 100C"));
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].content, "hi");
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "what color is the sky");
    }

    #[test]
    fn test_no_notes_keeps_plain_system_prompt() {
        let messages = build_messages("anything", &[], &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
    }
}
