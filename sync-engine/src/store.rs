//! Storage collaborator.
//!
//! The node never owns the log. It asks a [`LogStore`] to apply entries
//! received from the peer and to page through local entries to send.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use logsync_types::{Cursor, Entry};
use thiserror::Error;

use crate::events::lock;

/// Storage layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store cannot be reached or written.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An entry was refused by the store.
    #[error("entry rejected: {0}")]
    Rejected(String),
}

/// Access to the local event log.
///
/// Implementations must be safe to call from several nodes at once.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Apply entries received from a peer, in order.
    ///
    /// On error none of the entries count as applied; the peer resends
    /// them after the next handshake.
    async fn apply_entries(&self, entries: Vec<Entry>) -> Result<(), StoreError>;

    /// Read up to `limit` local entries starting at `cursor`.
    ///
    /// An empty result means nothing is pending.
    async fn entries_since(&self, cursor: Cursor, limit: usize) -> Result<Vec<Entry>, StoreError>;
}

#[async_trait]
impl<S: LogStore + ?Sized> LogStore for Arc<S> {
    async fn apply_entries(&self, entries: Vec<Entry>) -> Result<(), StoreError> {
        (**self).apply_entries(entries).await
    }

    async fn entries_since(&self, cursor: Cursor, limit: usize) -> Result<Vec<Entry>, StoreError> {
        (**self).entries_since(cursor, limit).await
    }
}

/// In-memory log for tests and demos.
///
/// Local entries (the outbound stream) and applied entries (received from
/// the peer) are kept apart. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    inner: Arc<Mutex<MemoryLogInner>>,
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    local: Vec<Entry>,
    applied: Vec<Entry>,
    fail_next_apply: Option<String>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log with local entries already present.
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let log = Self::new();
        lock(&log.inner).local.extend(entries);
        log
    }

    /// Append a local entry. Returns the cursor after it.
    pub fn append(&self, entry: Entry) -> Cursor {
        let mut inner = lock(&self.inner);
        inner.local.push(entry);
        Cursor::zero().advance(inner.local.len())
    }

    /// Number of local entries.
    pub fn local_len(&self) -> usize {
        lock(&self.inner).local.len()
    }

    /// Entries applied from the peer, in application order.
    pub fn applied(&self) -> Vec<Entry> {
        lock(&self.inner).applied.clone()
    }

    /// Cause the next apply to fail.
    pub fn fail_next_apply(&self, reason: &str) {
        lock(&self.inner).fail_next_apply = Some(reason.to_string());
    }
}

#[async_trait]
impl LogStore for MemoryLog {
    async fn apply_entries(&self, entries: Vec<Entry>) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        if let Some(reason) = inner.fail_next_apply.take() {
            return Err(StoreError::Unavailable(reason));
        }
        inner.applied.extend(entries);
        Ok(())
    }

    async fn entries_since(&self, cursor: Cursor, limit: usize) -> Result<Vec<Entry>, StoreError> {
        let inner = lock(&self.inner);
        let start = usize::try_from(cursor.value()).unwrap_or(usize::MAX);
        Ok(inner.local.iter().skip(start).take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pages_from_cursor() {
        let log = MemoryLog::with_entries((0..5).map(|i| json!(i)));

        let page = log.entries_since(Cursor::new(1), 2).await.unwrap();
        assert_eq!(page, vec![json!(1), json!(2)]);

        let tail = log.entries_since(Cursor::new(4), 10).await.unwrap();
        assert_eq!(tail, vec![json!(4)]);

        assert!(log.entries_since(Cursor::new(5), 10).await.unwrap().is_empty());
        assert!(log.entries_since(Cursor::new(99), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_returns_end_cursor() {
        let log = MemoryLog::new();
        assert_eq!(log.append(json!("a")), Cursor::new(1));
        assert_eq!(log.append(json!("b")), Cursor::new(2));
        assert_eq!(log.local_len(), 2);
    }

    #[tokio::test]
    async fn applied_entries_are_separate_from_local() {
        let log = MemoryLog::with_entries([json!("mine")]);
        log.apply_entries(vec![json!("theirs")]).await.unwrap();

        assert_eq!(log.applied(), vec![json!("theirs")]);
        assert_eq!(log.local_len(), 1);
    }

    #[tokio::test]
    async fn forced_apply_failure_applies_nothing() {
        let log = MemoryLog::new();
        log.fail_next_apply("disk full");

        let result = log.apply_entries(vec![json!(1)]).await;
        assert_eq!(result, Err(StoreError::Unavailable("disk full".into())));
        assert!(log.applied().is_empty());

        log.apply_entries(vec![json!(1)]).await.unwrap();
        assert_eq!(log.applied().len(), 1);
    }
}
