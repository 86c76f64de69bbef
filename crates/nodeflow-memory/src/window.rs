use std::sync::Arc;

use tracing::{debug, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::KeyValueStore;
use nodeflow_core::types::ConversationTurn;

/// Bounded, keyed conversation history.
///
/// History for each key is stored as a JSON array of turns under
/// `{key_prefix}{key}`. Without a backing store the window is stateless:
/// reads return nothing and writes fail with `MemoryUnavailable`.
#[derive(Clone)]
pub struct MemoryWindow {
    store: Option<Arc<dyn KeyValueStore>>,
    key_prefix: String,
}

impl MemoryWindow {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            key_prefix: key_prefix.into(),
        }
    }

    /// A window with no backing store.
    pub fn stateless() -> Self {
        Self {
            store: None,
            key_prefix: String::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn store(&self) -> Result<&Arc<dyn KeyValueStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| NodeflowError::MemoryUnavailable("no memory store configured".into()))
    }

    async fn load(&self, store: &Arc<dyn KeyValueStore>, key: &str) -> Result<Vec<ConversationTurn>> {
        let raw = store
            .get(&self.storage_key(key))
            .await
            .map_err(|e| NodeflowError::MemoryUnavailable(e.to_string()))?;

        match raw {
            None => Ok(vec![]),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(turns) => Ok(turns),
                Err(e) => {
                    warn!(key, error = %e, "Discarding unreadable conversation history");
                    Ok(vec![])
                }
            },
        }
    }

    /// Up to `max_messages` most recent turns for `key`, oldest first.
    pub async fn read(&self, key: &str, max_messages: usize) -> Result<Vec<ConversationTurn>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(vec![]);
        };
        let mut turns = self.load(store, key).await?;
        trim_front(&mut turns, max_messages);
        Ok(turns)
    }

    /// Append `turns` and keep at most `max_messages`, dropping the oldest.
    pub async fn append(
        &self,
        key: &str,
        turns: &[ConversationTurn],
        max_messages: usize,
    ) -> Result<()> {
        let store = self.store()?;
        let mut history = self.load(store, key).await?;
        history.extend_from_slice(turns);
        let dropped = trim_front(&mut history, max_messages);

        let encoded = serde_json::to_string(&history)?;
        store
            .set(&self.storage_key(key), encoded)
            .await
            .map_err(|e| NodeflowError::MemoryUnavailable(e.to_string()))?;

        debug!(key, stored = history.len(), dropped, "Conversation history updated");
        Ok(())
    }

    /// Delete all stored history for `key`.
    pub async fn clear(&self, key: &str) -> Result<()> {
        let store = self.store()?;
        store
            .delete(&self.storage_key(key))
            .await
            .map_err(|e| NodeflowError::MemoryUnavailable(e.to_string()))
    }
}

/// Drop turns from the front until at most `max` remain. Returns how many were dropped.
fn trim_front(turns: &mut Vec<ConversationTurn>, max: usize) -> usize {
    let excess = turns.len().saturating_sub(max);
    turns.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn window() -> MemoryWindow {
        MemoryWindow::new(Arc::new(InMemoryStore::new()), "test_")
    }

    fn pair(i: usize) -> [ConversationTurn; 2] {
        [
            ConversationTurn::user(format!("q{}", i)),
            ConversationTurn::model(format!("a{}", i)),
        ]
    }

    #[tokio::test]
    async fn test_read_unseen_key_is_empty() {
        assert!(window().read("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_never_exceeds_bound() {
        let w = window();
        for i in 0..7 {
            w.append("chat", &pair(i), 5).await.unwrap();
            let stored = w.read("chat", usize::MAX).await.unwrap();
            assert!(stored.len() <= 5);
        }
        let stored = w.read("chat", usize::MAX).await.unwrap();
        assert_eq!(stored.len(), 5);
        // Newest turn is last.
        assert_eq!(stored.last().unwrap().content, "a6");
        assert_eq!(stored.first().unwrap().content, "a4");
    }

    #[tokio::test]
    async fn test_read_returns_most_recent() {
        let w = window();
        w.append("chat", &pair(1), 10).await.unwrap();
        w.append("chat", &pair(2), 10).await.unwrap();
        let recent = w.read("chat", 2).await.unwrap();
        assert_eq!(recent, pair(2).to_vec());
    }

    #[tokio::test]
    async fn test_keys_are_isolated_and_clearable() {
        let w = window();
        w.append("a", &pair(1), 10).await.unwrap();
        w.append("b", &pair(2), 10).await.unwrap();
        w.clear("a").await.unwrap();
        assert!(w.read("a", 10).await.unwrap().is_empty());
        assert_eq!(w.read("b", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stateless_window() {
        let w = MemoryWindow::stateless();
        assert!(!w.is_available());
        assert!(w.read("chat", 10).await.unwrap().is_empty());
        let err = w.append("chat", &pair(1), 10).await.unwrap_err();
        assert!(matches!(err, NodeflowError::MemoryUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_corrupt_history_is_replaced() {
        let store = Arc::new(InMemoryStore::new());
        store.set("test_chat", "not json".into()).await.unwrap();
        let w = MemoryWindow::new(store, "test_");
        assert!(w.read("chat", 10).await.unwrap().is_empty());
        w.append("chat", &pair(1), 10).await.unwrap();
        assert_eq!(w.read("chat", 10).await.unwrap().len(), 2);
    }
}
