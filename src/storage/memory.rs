//! In-process backend. Nothing survives a restart.

use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

use super::{BoxFuture, KeyValueBackend, StorageError};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.entries.write().await.remove(key);
            Ok(())
        })
    }

    fn scan<'a>(
        &'a self,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<(String, String)>, StorageError>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            let lower = after.map_or(Bound::Unbounded, |key| Bound::Excluded(key.to_string()));
            Ok(entries
                .range((lower, Bound::Unbounded))
                .take(limit)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect())
        })
    }

    fn remove_unchanged<'a>(
        &'a self,
        entries: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<usize, StorageError>> {
        Box::pin(async move {
            let mut stored = self.entries.write().await;
            let mut removed = 0;
            for (key, value) in entries {
                if stored.get(key) == Some(value) {
                    stored.remove(key);
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_pages_in_key_order() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        for key in ["c", "a", "d", "b"] {
            backend.put(key, key).await?;
        }

        let first = backend.scan(None, 2).await?;
        assert_eq!(
            first.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let second = backend.scan(Some("b"), 2).await?;
        assert_eq!(
            second.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
        assert!(backend.scan(Some("d"), 2).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn put_replaces_and_remove_is_idempotent() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        backend.put("k", "1").await?;
        backend.put("k", "2").await?;
        assert_eq!(backend.get("k").await?, Some("2".to_string()));
        backend.remove("k").await?;
        backend.remove("k").await?;
        assert!(backend.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn remove_unchanged_skips_rewritten_values() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        for key in ["a", "b", "c"] {
            backend.put(key, "v1").await?;
        }
        backend.put("c", "v2").await?;
        let removed = backend
            .remove_unchanged(&[
                ("a".to_string(), "v1".to_string()),
                ("c".to_string(), "v1".to_string()),
                ("zz".to_string(), "v1".to_string()),
            ])
            .await?;
        assert_eq!(removed, 1);
        assert_eq!(backend.len().await, 2);
        assert_eq!(backend.get("c").await?, Some("v2".to_string()));
        Ok(())
    }
}
