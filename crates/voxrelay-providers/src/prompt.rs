//! Serialising conversation history into backend request formats.

use serde_json::json;

use voxrelay_core::conversation::{ConversationHistory, Role};

/// Structured chat messages: system prompt, prior turns, then the new prompt.
pub fn chat_messages(
    system_prompt: &str,
    history: &ConversationHistory,
    prompt: &str,
) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    for turn in history.turns() {
        messages.push(json!({ "role": turn.role.as_str(), "content": turn.content }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

/// Flattened role-tagged transcript for completion-style models:
///
/// ```text
/// User: hi
/// Assistant: Hello!
/// User: <prompt>
/// Assistant:
/// ```
pub fn flatten_transcript(history: &ConversationHistory, prompt: &str) -> String {
    let mut out = String::new();
    for turn in history.turns() {
        let label = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&turn.content);
        out.push('\n');
    }
    out.push_str("User: ");
    out.push_str(prompt);
    out.push_str("\nAssistant:");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> ConversationHistory {
        let mut history = ConversationHistory::new();
        history.push_pair("hi", "Hello!", 10);
        history
    }

    #[test]
    fn test_chat_messages_order() {
        let messages = chat_messages("Be brief.", &history(), "what time is it");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "what time is it");
    }

    #[test]
    fn test_chat_messages_without_system() {
        let messages = chat_messages("", &ConversationHistory::new(), "hello");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_flatten_empty_history() {
        assert_eq!(
            flatten_transcript(&ConversationHistory::new(), "hello"),
            "User: hello\nAssistant:"
        );
    }

    #[test]
    fn test_flatten_with_history() {
        assert_eq!(
            flatten_transcript(&history(), "again"),
            "User: hi\nAssistant: Hello!\nUser: again\nAssistant:"
        );
    }
}
