use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use murmur_types::models::Topic;

use crate::error::{DeliveryError, HubError};
use crate::outbound::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One live client: its id, optional identity and outgoing half.
pub struct Connection {
    id: ConnectionId,
    identity: Option<String>,
    outbound: Box<dyn Outbound>,
}

impl Connection {
    pub fn new(id: ConnectionId, identity: Option<String>, outbound: impl Outbound + 'static) -> Self {
        Self {
            id,
            identity,
            outbound: Box::new(outbound),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.outbound.send(frame)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

struct Entry {
    connection: Arc<Connection>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Entry>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn link(&mut self, id: ConnectionId, topic: Topic) {
        self.topics.entry(topic).or_default().insert(id);
    }

    fn unlink(&mut self, id: ConnectionId, topic: &Topic) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}

/// Tracks every live connection and which topics it listens on.
///
/// All mutations and the fan-out snapshot go through one lock. Snapshots
/// hand out `Arc<Connection>` so delivery happens after the lock is gone.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection subscribed to `topics` (the default topic when empty).
    /// An existing registration under the same id is left untouched.
    pub fn register(
        &self,
        connection: Connection,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<Arc<Connection>, HubError> {
        let id = connection.id();
        let mut topics: HashSet<Topic> = topics.into_iter().collect();
        if topics.is_empty() {
            topics.insert(Topic::default());
        }

        let mut state = self.write();
        if state.connections.contains_key(&id) {
            return Err(HubError::DuplicateConnection(id));
        }

        for topic in &topics {
            state.link(id, topic.clone());
        }

        let connection = Arc::new(connection);
        debug!("Registered connection {} on {} topics", id, topics.len());
        state.connections.insert(
            id,
            Entry {
                connection: connection.clone(),
                topics,
            },
        );

        Ok(connection)
    }

    /// Remove a connection and all its topic links. Returns whether it was
    /// present; unknown ids are a no-op.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.write();
        let Some(entry) = state.connections.remove(&id) else {
            return false;
        };

        for topic in &entry.topics {
            state.unlink(id, topic);
        }

        debug!("Unregistered connection {}", id);
        true
    }

    /// Snapshot of the connections subscribed to `topic`. Order is unspecified.
    pub fn subscribers_of(&self, topic: &Topic) -> Vec<Arc<Connection>> {
        let state = self.read();
        let Some(members) = state.topics.get(topic) else {
            return Vec::new();
        };

        members
            .iter()
            .filter_map(|id| state.connections.get(id))
            .map(|entry| entry.connection.clone())
            .collect()
    }

    /// Add topics to a live connection. Returns its full topic set, sorted.
    pub fn subscribe(
        &self,
        id: ConnectionId,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Option<Vec<Topic>> {
        let mut state = self.write();
        let added: Vec<Topic> = {
            let entry = state.connections.get_mut(&id)?;
            topics
                .into_iter()
                .filter(|topic| entry.topics.insert(topic.clone()))
                .collect()
        };

        for topic in added {
            state.link(id, topic);
        }

        state.connections.get(&id).map(|entry| sorted(&entry.topics))
    }

    /// Remove topics from a live connection. A connection may end up with no
    /// topics at all, in which case it only receives direct replies.
    pub fn unsubscribe(
        &self,
        id: ConnectionId,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Option<Vec<Topic>> {
        let mut state = self.write();
        let removed: Vec<Topic> = {
            let entry = state.connections.get_mut(&id)?;
            topics
                .into_iter()
                .filter(|topic| entry.topics.remove(topic))
                .collect()
        };

        for topic in &removed {
            state.unlink(id, topic);
        }

        state.connections.get(&id).map(|entry| sorted(&entry.topics))
    }

    pub fn topics_of(&self, id: ConnectionId) -> Option<Vec<Topic>> {
        self.read().connections.get(&id).map(|entry| sorted(&entry.topics))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted(topics: &HashSet<Topic>) -> Vec<Topic> {
    topics.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}
