//! Serialized access to intruder records over a [`KeyValueBackend`].

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{KeyValueBackend, StorageError};
use crate::intruder::record::{IntruderRecord, RecordType};

const SCAN_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl RecordStore {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Store key for a subject. Both fields feed the digest, so the same literal
    /// subject under two record types maps to two keys.
    #[must_use]
    pub fn key_for(record_type: RecordType, subject: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(record_type.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(subject.as_bytes());
        let digest = hasher.finalize();
        format!(
            "{}:{}",
            record_type.key_prefix(),
            Base64UrlUnpadded::encode_string(&digest)
        )
    }

    /// Read a record. Undecodable values are deleted and read as absent.
    ///
    /// # Errors
    /// Returns an error if the backend read fails.
    pub async fn read(&self, key: &str) -> Result<Option<IntruderRecord>, StorageError> {
        let Some(value) = self.backend.get(key).await? else {
            return Ok(None);
        };
        Ok(self.decode(key, &value).await)
    }

    /// Insert or replace a record.
    ///
    /// # Errors
    /// Returns an error if encoding or the backend write fails.
    pub async fn write(&self, key: &str, record: &IntruderRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(record)?;
        self.backend.put(key, &value).await
    }

    /// # Errors
    /// Returns an error if the backend delete fails.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key).await
    }

    /// Delete each record only if its stored value is still the one that was
    /// scanned. A record rewritten since the scan is kept. Returns how many were
    /// deleted.
    ///
    /// # Errors
    /// Returns an error if the backend batch delete fails.
    pub async fn remove_all(&self, records: &[StoredRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let entries: Vec<(String, String)> = records
            .iter()
            .map(|stored| (stored.key.clone(), stored.value.clone()))
            .collect();
        self.backend.remove_unchanged(&entries).await
    }

    /// Lazy, single-pass cursor over every stored record.
    #[must_use]
    pub fn records(&self) -> RecordIter {
        RecordIter {
            store: self.clone(),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn decode(&self, key: &str, value: &str) -> Option<IntruderRecord> {
        match serde_json::from_str::<IntruderRecord>(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key, "removing corrupt intruder record: {err}");
                if let Err(err) = self.backend.remove(key).await {
                    warn!(key, "failed to remove corrupt intruder record: {err}");
                }
                None
            }
        }
    }
}

/// A decoded record together with the raw value it was decoded from.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub key: String,
    pub record: IntruderRecord,
    value: String,
}

/// Forward-only cursor over the store.
///
/// Pages are pulled on demand; no backend resource is held between pages, so
/// dropping the iterator early releases everything.
#[derive(Debug)]
pub struct RecordIter {
    store: RecordStore,
    cursor: Option<String>,
    buffer: VecDeque<(String, String)>,
    exhausted: bool,
}

impl RecordIter {
    /// Next stored record, or `None` once the store is exhausted.
    ///
    /// # Errors
    /// Returns an error if fetching a page fails; the iterator is then exhausted.
    pub async fn next(&mut self) -> Option<Result<StoredRecord, StorageError>> {
        loop {
            if let Some((key, value)) = self.buffer.pop_front() {
                match self.store.decode(&key, &value).await {
                    Some(record) => return Some(Ok(StoredRecord { key, record, value })),
                    None => continue,
                }
            }
            if self.exhausted {
                return None;
            }
            match self
                .store
                .backend
                .scan(self.cursor.as_deref(), SCAN_PAGE_SIZE)
                .await
            {
                Ok(page) => {
                    debug!(entries = page.len(), "fetched intruder record page");
                    if page.len() < SCAN_PAGE_SIZE {
                        self.exhausted = true;
                    }
                    if let Some((last, _)) = page.last() {
                        self.cursor = Some(last.clone());
                    }
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
