use murmur_gateway::{BroadcastHub, QueryService};

/// Handles shared by every HTTP handler. Both are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub queries: QueryService,
}

impl AppState {
    pub fn new(hub: BroadcastHub) -> Self {
        let queries = QueryService::new(hub.store().clone());
        Self { hub, queries }
    }
}
