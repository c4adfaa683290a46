//! Conversation history: an ordered, capacity-capped log of role-tagged turns.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of retained turns (five user/assistant pairs).
pub const DEFAULT_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One immutable message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Monotonic index assigned when the turn was appended.
    pub seq: u64,
}

/// A bounded history. Oldest turns are evicted first once the cap is exceeded.
///
/// Turns only ever enter in user/assistant pairs through [`push_pair`](Self::push_pair).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    next_seq: u64,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn and its assistant reply, then evict from the front down to `cap`.
    pub fn push_pair(&mut self, user: impl Into<String>, assistant: impl Into<String>, cap: usize) {
        for (role, content) in [(Role::User, user.into()), (Role::Assistant, assistant.into())] {
            self.turns.push_back(ConversationTurn {
                role,
                content,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }
        while self.turns.len() > cap {
            self.turns.pop_front();
        }
    }

    /// Rebuild a history from previously persisted turns, keeping at most `cap` of them.
    pub fn from_turns(turns: impl IntoIterator<Item = ConversationTurn>, cap: usize) -> Self {
        let mut turns: VecDeque<_> = turns.into_iter().collect();
        while turns.len() > cap {
            turns.pop_front();
        }
        let next_seq = turns.back().map(|t| t.seq + 1).unwrap_or(0);
        Self { turns, next_seq }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pair_assigns_sequence() {
        let mut history = ConversationHistory::new();
        history.push_pair("hello", "Hello", DEFAULT_HISTORY_TURNS);

        let turns: Vec<_> = history.turns().collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[0].seq, 0);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Hello");
        assert_eq!(turns[1].seq, 1);
    }

    #[test]
    fn test_cap_evicts_oldest_pair() {
        let mut history = ConversationHistory::new();
        for i in 0..6 {
            history.push_pair(format!("q{i}"), format!("a{i}"), 10);
        }

        assert_eq!(history.len(), 10);
        let contents: Vec<_> = history.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["q1", "a1", "q2", "a2", "q3", "a3", "q4", "a4", "q5", "a5"]
        );
        // Sequence numbers keep counting past evicted turns.
        assert_eq!(history.last().map(|t| t.seq), Some(11));
    }

    #[test]
    fn test_retained_suffix_keeps_order() {
        let mut history = ConversationHistory::new();
        for i in 0..25 {
            history.push_pair(format!("q{i}"), format!("a{i}"), 4);
        }
        let seqs: Vec<_> = history.turns().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![46, 47, 48, 49]);
    }

    #[test]
    fn test_from_turns_resumes_sequence() {
        let mut original = ConversationHistory::new();
        original.push_pair("a", "b", 10);
        original.push_pair("c", "d", 10);

        let mut restored = ConversationHistory::from_turns(original.turns().cloned(), 2);
        assert_eq!(restored.len(), 2);
        restored.push_pair("e", "f", 10);
        assert_eq!(restored.last().map(|t| t.seq), Some(5));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let turn = ConversationTurn {
            role: Role::Assistant,
            content: "hi".into(),
            seq: 3,
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
