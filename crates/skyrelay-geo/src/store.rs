//! Storage boundary for finished routes.
//!
//! Durable backends (files, blob or table stores) live outside this
//! workspace and plug in through [`RouteStore`]. [`MemoryRouteStore`] is
//! the in-process default.

use dashmap::DashMap;

use crate::route::Route;

/// Key-based get/put contract for simplified routes.
pub trait RouteStore: Send + Sync {
    /// Store `route` under `key`, replacing any previous route.
    fn put(&self, key: &str, route: Route);

    /// Fetch the route stored under `key`.
    fn get(&self, key: &str) -> Option<Route>;
}

/// A [`RouteStore`] held in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: DashMap<String, Route>,
}

impl MemoryRouteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteStore for MemoryRouteStore {
    fn put(&self, key: &str, route: Route) {
        self.routes.insert(key.to_owned(), route);
    }

    fn get(&self, key: &str) -> Option<Route> {
        self.routes.get(key).map(|route| route.value().clone())
    }
}
