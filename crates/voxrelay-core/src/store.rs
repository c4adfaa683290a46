//! Conversation stores: per-session history keyed by session id.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::conversation::{ConversationHistory, ConversationTurn, DEFAULT_HISTORY_TURNS};
use crate::error::{Result, VoxRelayError};

/// Keyed access to conversation histories.
///
/// Each session only touches its own key. `append_turn_pair` appends both
/// turns under one critical section so a user turn is never visible without
/// its assistant reply.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// History for `session_id`, empty if the session was never seen.
    async fn get_history(&self, session_id: &str) -> Result<ConversationHistory>;

    /// Append a user/assistant pair, then truncate to the cap from the front.
    async fn append_turn_pair(&self, session_id: &str, user: &str, assistant: &str) -> Result<()>;

    /// Clear the history for `session_id`.
    async fn reset(&self, session_id: &str) -> Result<()>;

    /// Called once a session closes.
    async fn release(&self, session_id: &str) -> Result<()>;

    /// Maximum number of retained turns.
    fn capacity(&self) -> usize;
}

/// Round a turn cap down to whole pairs, keeping at least one pair.
///
/// Truncating an odd cap from the front would leave an assistant turn
/// with no user turn before it.
fn pair_capacity(cap: usize) -> usize {
    (cap / 2 * 2).max(2)
}

/// Process-local store. Histories do not survive a restart.
pub struct InMemoryConversationStore {
    cap: usize,
    histories: RwLock<HashMap<String, ConversationHistory>>,
}

impl InMemoryConversationStore {
    /// `cap` is rounded down to an even number of turns.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: pair_capacity(cap),
            histories: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sessions currently holding history.
    pub async fn session_count(&self) -> usize {
        self.histories.read().await.len()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TURNS)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_history(&self, session_id: &str) -> Result<ConversationHistory> {
        Ok(self
            .histories
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_turn_pair(&self, session_id: &str, user: &str, assistant: &str) -> Result<()> {
        let mut histories = self.histories.write().await;
        histories
            .entry(session_id.to_string())
            .or_default()
            .push_pair(user, assistant, self.cap);
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        if let Some(history) = self.histories.write().await.get_mut(session_id) {
            history.clear();
        }
        Ok(())
    }

    async fn release(&self, session_id: &str) -> Result<()> {
        self.histories.write().await.remove(session_id);
        debug!(session_id, "Released conversation history");
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.cap
    }
}

/// File-backed store: one JSONL file of turns per session.
///
/// Layout: `<base>/<session-id>.jsonl`, one [`ConversationTurn`] per line.
/// Files are rewritten through a temp file and a rename, so a crash never
/// leaves half a pair on disk. Histories are kept after a session closes.
pub struct JsonlConversationStore {
    base: PathBuf,
    cap: usize,
    write_lock: Mutex<()>,
}

impl JsonlConversationStore {
    /// `cap` is rounded down to an even number of turns.
    pub fn new(base: PathBuf, cap: usize) -> Self {
        Self {
            base,
            cap: pair_capacity(cap),
            write_lock: Mutex::new(()),
        }
    }

    /// Default store location: `~/.voxrelay/conversations/`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("conversations")
    }

    fn history_path(&self, session_id: &str) -> PathBuf {
        let name: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base.join(format!("{name}.jsonl"))
    }

    async fn load(&self, session_id: &str) -> Result<ConversationHistory> {
        let path = self.history_path(session_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(ConversationHistory::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut turns = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let turn: ConversationTurn = serde_json::from_str(line)
                .map_err(|e| VoxRelayError::Store(format!("corrupt history line: {e}")))?;
            turns.push(turn);
        }
        Ok(ConversationHistory::from_turns(turns, self.cap))
    }

    async fn write(&self, session_id: &str, history: &ConversationHistory) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let mut data = String::new();
        for turn in history.turns() {
            data.push_str(&serde_json::to_string(turn)?);
            data.push('\n');
        }
        let path = self.history_path(session_id);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn get_history(&self, session_id: &str) -> Result<ConversationHistory> {
        self.load(session_id).await
    }

    async fn append_turn_pair(&self, session_id: &str, user: &str, assistant: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.load(session_id).await?;
        history.push_pair(user, assistant, self.cap);
        self.write(session_id, &history).await?;
        debug!(session_id, turns = history.len(), "Persisted conversation history");
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.history_path(session_id);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        debug!(session_id, "Reset conversation history");
        Ok(())
    }

    async fn release(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::conversation::Role;

    fn contents(history: &ConversationHistory) -> Vec<String> {
        history.turns().map(|t| t.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_unseen_session_is_empty() {
        let store = InMemoryConversationStore::default();
        assert!(store.get_history("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_six_pairs_keep_last_five() {
        let store = InMemoryConversationStore::new(10);
        for i in 0..6 {
            store
                .append_turn_pair("s1", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }
        let history = store.get_history("s1").await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(contents(&history)[0], "q1");
        assert_eq!(contents(&history)[9], "a5");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemoryConversationStore::default();
        store.append_turn_pair("a", "hi", "Hi!").await.unwrap();
        assert!(store.get_history("b").await.unwrap().is_empty());
        assert_eq!(store.get_history("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_and_release() {
        let store = InMemoryConversationStore::default();
        store.append_turn_pair("a", "hi", "Hi!").await.unwrap();
        store.reset("a").await.unwrap();
        assert!(store.get_history("a").await.unwrap().is_empty());
        assert_eq!(store.session_count().await, 1);

        store.release("a").await.unwrap();
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_paired() {
        let store = Arc::new(InMemoryConversationStore::new(1000));
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_turn_pair("shared", &format!("u{i}"), &format!("a{i}"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.get_history("shared").await.unwrap();
        assert_eq!(history.len(), 100);
        let turns: Vec<_> = history.turns().collect();
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
            assert_eq!(pair[0].seq + 1, pair[1].seq);
        }
    }

    #[tokio::test]
    async fn test_jsonl_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf(), 10);
        store.append_turn_pair("client/1", "hello", "Hello").await.unwrap();

        let reopened = JsonlConversationStore::new(dir.path().to_path_buf(), 10);
        let history = reopened.get_history("client/1").await.unwrap();
        assert_eq!(contents(&history), vec!["hello", "Hello"]);
        assert!(dir.path().join("client_1.jsonl").exists());
    }

    #[tokio::test]
    async fn test_jsonl_cap_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf(), 4);
        for i in 0..3 {
            store
                .append_turn_pair("s", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }
        let history = store.get_history("s").await.unwrap();
        assert_eq!(contents(&history), vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(history.last().map(|t| t.seq), Some(5));

        store.release("s").await.unwrap();
        assert_eq!(store.get_history("s").await.unwrap().len(), 4);

        store.reset("s").await.unwrap();
        assert!(store.get_history("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_odd_cap_rounds_down_to_whole_pairs() {
        assert_eq!(InMemoryConversationStore::new(5).capacity(), 4);
        assert_eq!(InMemoryConversationStore::new(1).capacity(), 2);
        assert_eq!(InMemoryConversationStore::new(0).capacity(), 2);

        let store = InMemoryConversationStore::new(3);
        for i in 0..3 {
            store
                .append_turn_pair("s", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }
        let history = store.get_history("s").await.unwrap();
        assert_eq!(contents(&history), vec!["q2", "a2"]);
        assert_eq!(history.turns().next().map(|t| t.role), Some(Role::User));
    }

    #[tokio::test]
    async fn test_jsonl_odd_cap_never_leads_with_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf(), 5);
        assert_eq!(store.capacity(), 4);
        for i in 0..4 {
            store
                .append_turn_pair("s", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        let reopened = JsonlConversationStore::new(dir.path().to_path_buf(), 5);
        let history = reopened.get_history("s").await.unwrap();
        assert_eq!(contents(&history), vec!["q2", "a2", "q3", "a3"]);
        assert_eq!(history.turns().next().map(|t| t.role), Some(Role::User));
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_reads_empty_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().join("not-yet-created"), 10);
        assert!(store.get_history("fresh").await.unwrap().is_empty());
        store.reset("fresh").await.unwrap();

        store.append_turn_pair("fresh", "hi", "Hi").await.unwrap();
        store.reset("fresh").await.unwrap();
        assert!(
            !tokio::fs::try_exists(dir.path().join("not-yet-created/fresh.jsonl"))
                .await
                .unwrap()
        );
        assert!(store.get_history("fresh").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_corrupt_line_errors() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.jsonl"), "not json\n")
            .await
            .unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf(), 10);
        let err = store.get_history("bad").await.unwrap_err();
        assert!(err.to_string().contains("corrupt history line"));
    }
}
