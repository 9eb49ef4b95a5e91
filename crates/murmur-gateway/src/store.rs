use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;

use murmur_db::Database;
use murmur_db::models::MessageRow;
use murmur_types::models::{Message, MessageId};

use crate::error::StoreError;

/// Rows fetched per round trip by the lazy sequences.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Which messages a scan returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    All,
    Sender(String),
}

/// Append-only message persistence.
///
/// Calls may block on I/O; async callers run them on the blocking pool.
pub trait MessageStore: Send + Sync + 'static {
    /// Assign id and timestamp, persist, and return the full record.
    fn create(&self, content: &str, sender: &str) -> Result<Message, StoreError>;

    /// Up to `limit` matching messages with id greater than `after`
    /// (or from the start), in insertion order.
    fn scan(
        &self,
        filter: &MessageFilter,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// The last `limit` messages, in insertion order.
    fn recent(&self, limit: usize) -> Result<Vec<Message>, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;
}

pub type SharedStore = Arc<dyn MessageStore>;

/// Every message in insertion order. Each call starts a fresh read.
pub fn find_all(store: &SharedStore) -> Messages {
    Messages::new(store.clone(), MessageFilter::All)
}

/// Messages from exactly `sender`, in insertion order.
pub fn find_by_sender(store: &SharedStore, sender: &str) -> Messages {
    Messages::new(store.clone(), MessageFilter::Sender(sender.to_string()))
}

/// Lazy, finite sequence over a store scan. Pages are fetched on demand,
/// keyed on the last id seen, so messages created mid-iteration may or may
/// not appear but nothing is repeated or skipped.
pub struct Messages {
    store: SharedStore,
    filter: MessageFilter,
    after: Option<MessageId>,
    buffer: VecDeque<Message>,
    page_size: usize,
    exhausted: bool,
}

impl Messages {
    pub fn new(store: SharedStore, filter: MessageFilter) -> Self {
        Self {
            store,
            filter,
            after: None,
            buffer: VecDeque::new(),
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch the next page directly, bypassing the item buffer. Returns an
    /// empty page once the scan is complete.
    pub fn next_page(&mut self) -> Result<Vec<Message>, StoreError> {
        if !self.buffer.is_empty() {
            return Ok(self.buffer.drain(..).collect());
        }
        if self.exhausted {
            return Ok(Vec::new());
        }

        let page = self.store.scan(&self.filter, self.after, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.id);
        }

        Ok(page)
    }
}

impl Iterator for Messages {
    type Item = Result<Message, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            match self.next_page() {
                Ok(page) => self.buffer.extend(page),
                Err(e) => {
                    // Stop after reporting; a retry is a fresh find_all.
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

// -- SQLite --

impl MessageStore for Database {
    fn create(&self, content: &str, sender: &str) -> Result<Message, StoreError> {
        self.create_message(content, sender)
            .map(into_message)
            .map_err(unavailable)
    }

    fn scan(
        &self,
        filter: &MessageFilter,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let sender = match filter {
            MessageFilter::All => None,
            MessageFilter::Sender(sender) => Some(sender.as_str()),
        };
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);

        self.get_messages_after(after.unwrap_or(0), sender, limit)
            .map(|rows| rows.into_iter().map(into_message).collect())
            .map_err(unavailable)
    }

    fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.get_message(id)
            .map(|row| row.map(into_message))
            .map_err(unavailable)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.get_recent_messages(limit)
            .map(|rows| rows.into_iter().map(into_message).collect())
            .map_err(unavailable)
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.count_messages().map_err(unavailable)
    }
}

fn unavailable(err: anyhow::Error) -> StoreError {
    StoreError::Unavailable(format!("{:#}", err))
}

fn into_message(row: MessageRow) -> Message {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(row.timestamp).unwrap_or_else(|| {
        warn!("Corrupt timestamp {} on message {}", row.timestamp, row.id);
        DateTime::default()
    });

    Message {
        id: row.id,
        content: row.content,
        sender: row.sender,
        timestamp,
    }
}

// -- In-memory --

/// Volatile store for development and tests. Ids start at 1.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessageStore for MemoryStore {
    fn create(&self, content: &str, sender: &str) -> Result<Message, StoreError> {
        let mut messages = self.lock();
        let message = Message {
            id: messages.len() as MessageId + 1,
            content: content.to_string(),
            sender: sender.to_string(),
            timestamp: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    fn scan(
        &self,
        filter: &MessageFilter,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.lock();
        // Ids are dense, so the id doubles as the index of the next message.
        let start = after.map_or(0, |id| id.max(0) as usize).min(messages.len());

        Ok(messages[start..]
            .iter()
            .filter(|m| match filter {
                MessageFilter::All => true,
                MessageFilter::Sender(sender) => &m.sender == sender,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let messages = self.lock();
        let found = id
            .checked_sub(1)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| messages.get(idx))
            .cloned();
        Ok(found)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let messages = self.lock();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(store: impl MessageStore, senders: &[&str]) -> SharedStore {
        for (i, sender) in senders.iter().enumerate() {
            store.create(&format!("m{}", i + 1), sender).unwrap();
        }
        Arc::new(store)
    }

    fn contents(messages: impl IntoIterator<Item = Result<Message, StoreError>>) -> Vec<String> {
        messages.into_iter().map(|m| m.unwrap().content).collect()
    }

    #[test]
    fn find_all_pages_lazily_in_order() {
        let store = seeded(MemoryStore::new(), &["a", "b", "c", "d", "e"]);

        let all = contents(find_all(&store).with_page_size(2));
        assert_eq!(all, ["m1", "m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn find_all_is_restartable() {
        let store = seeded(MemoryStore::new(), &["a", "b"]);

        let mut first = find_all(&store);
        assert_eq!(first.next().unwrap().unwrap().content, "m1");

        store.create("m3", "c").unwrap();
        assert_eq!(contents(find_all(&store)), ["m1", "m2", "m3"]);
    }

    #[test]
    fn find_by_sender_filters_exactly() {
        let store = seeded(MemoryStore::new(), &["alice", "bob", "alice", "alicia"]);

        let alice = contents(find_by_sender(&store, "alice").with_page_size(1));
        assert_eq!(alice, ["m1", "m3"]);
        assert!(find_by_sender(&store, "carol").next().is_none());
    }

    #[test]
    fn next_page_returns_empty_when_done() {
        let store = seeded(MemoryStore::new(), &["a", "b", "c"]);

        let mut cursor = find_all(&store).with_page_size(2);
        assert_eq!(cursor.next_page().unwrap().len(), 2);
        assert_eq!(cursor.next_page().unwrap().len(), 1);
        assert!(cursor.next_page().unwrap().is_empty());
    }

    #[test]
    fn memory_store_recent_and_lookup() {
        let store = seeded(MemoryStore::new(), &["a", "b", "c", "d", "e"]);

        let recent: Vec<_> = store.recent(3).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(recent, ["m3", "m4", "m5"]);
        assert_eq!(store.find_by_id(2).unwrap().unwrap().content, "m2");
        assert!(store.find_by_id(0).unwrap().is_none());
        assert!(store.find_by_id(6).unwrap().is_none());
        assert!(store.find_by_id(-1).unwrap().is_none());
        assert!(store.find_by_id(MessageId::MIN).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn sqlite_store_round_trip() {
        let store = seeded(Database::open_in_memory().unwrap(), &["alice", "bob", "alice"]);

        let created = store.create("hi", "bob").unwrap();
        let fetched = store.find_by_id(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);

        assert_eq!(contents(find_by_sender(&store, "alice").with_page_size(1)), ["m1", "m3"]);
        assert_eq!(contents(find_all(&store)).len(), 4);
        assert_eq!(store.recent(2).unwrap().last().unwrap().content, "hi");
    }

    #[test]
    fn sqlite_store_on_disk_uses_reader_pool() {
        let path = std::env::temp_dir().join(format!("murmur-test-{}.db", uuid::Uuid::new_v4()));
        {
            let store = seeded(Database::open(&path).unwrap(), &["alice", "bob"]);
            assert_eq!(contents(find_all(&store)), ["m1", "m2"]);
            assert_eq!(store.count().unwrap(), 2);
        }
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
