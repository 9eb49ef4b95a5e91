pub mod connection;
pub mod error;
pub mod hub;
pub mod outbound;
pub mod query;
pub mod registry;
pub mod store;

pub use error::{DeliveryError, HubError, StoreError};
pub use hub::{BroadcastHub, HubConfig};
pub use query::QueryService;
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use store::{MemoryStore, MessageStore, Messages, SharedStore};
