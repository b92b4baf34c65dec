//! Connection registry and group router.
//!
//! The [`Registry`] owns every live [`Connection`]: its outbound channel,
//! the identity bound to it, and the broadcast groups it joined. Entries
//! live in a [`DashMap`] keyed by [`ConnectionId`], so updates to different
//! connections never contend and every per-connection update is atomic.
//!
//! Removing a connection here only drops the registry entry. Purging the
//! derived state (cached status, outstanding correlated requests, the
//! recorded track) is the job of [`Hub::disconnect`](crate::hub::Hub::disconnect).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use skyrelay_types::{ClientId, ConnectionId, Group, OutboundMessage};
use tokio::sync::mpsc;
use tracing::debug;

/// Sender half of a connection's outbound queue.
///
/// The transport layer owns the receiving half and writes whatever arrives
/// to the socket.
pub type ConnectionSender = mpsc::UnboundedSender<OutboundMessage>;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No connection flies under the callsign.
    #[error("no connection with callsign {callsign}")]
    NotFound {
        /// The callsign that was looked up.
        callsign: String,
    },

    /// More than one connection flies under the callsign.
    #[error("{count} connections share callsign {callsign}")]
    Ambiguous {
        /// The callsign that was looked up.
        callsign: String,
        /// How many connections matched.
        count: usize,
    },

    /// The connection is not registered (never was, or already closed).
    #[error("connection {0} is not registered")]
    NotConnected(ConnectionId),

    /// The connection is registered but its outbound queue is closed.
    #[error("connection {0} is no longer accepting messages")]
    ChannelClosed(ConnectionId),
}

impl RegistryError {
    /// Whether the error means "no usable target": absent, ambiguous or gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Ambiguous { .. } | Self::NotConnected(_)
        )
    }

    /// Number of connections a callsign lookup matched.
    pub const fn matches(&self) -> usize {
        match self {
            Self::Ambiguous { count, .. } => *count,
            Self::NotFound { .. } | Self::NotConnected(_) | Self::ChannelClosed(_) => 0,
        }
    }
}

/// One live transport session.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Transport-assigned session id.
    pub id: ConnectionId,
    /// Stable identity, once the client has identified itself.
    pub client_id: Option<ClientId>,
    /// Callsign, once known.
    pub callsign: Option<String>,
    /// Groups this connection receives broadcasts for.
    pub groups: BTreeSet<Group>,
    /// When the session was registered.
    pub connected_at: DateTime<Utc>,
    /// When the identity or callsign last changed.
    pub identified_at: Option<DateTime<Utc>>,
    sender: ConnectionSender,
}

impl Connection {
    fn new(id: ConnectionId, sender: ConnectionSender) -> Self {
        Self {
            id,
            client_id: None,
            callsign: None,
            groups: BTreeSet::new(),
            connected_at: Utc::now(),
            identified_at: None,
            sender,
        }
    }

    fn has_callsign(&self, wanted_lower: &str) -> bool {
        self.callsign
            .as_deref()
            .is_some_and(|c| c.trim().to_lowercase() == wanted_lower)
    }

    /// Whether a broadcast about `owner` addressed to `groups` reaches this
    /// connection.
    fn receives(&self, groups: &[Group], owner: Option<ConnectionId>) -> bool {
        groups.iter().any(|group| {
            self.groups.contains(group)
                && (group.includes_own_aircraft() || owner != Some(self.id))
        })
    }

    /// A serializable copy without the outbound channel.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            client_id: self.client_id.clone(),
            callsign: self.callsign.clone(),
            groups: self.groups.iter().copied().collect(),
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Transport-assigned session id.
    pub id: ConnectionId,
    /// Stable identity, if bound.
    pub client_id: Option<ClientId>,
    /// Callsign, if known.
    pub callsign: Option<String>,
    /// Joined groups.
    pub groups: Vec<Group>,
    /// When the session was registered.
    pub connected_at: DateTime<Utc>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, Connection>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with no identity yet.
    ///
    /// Returns `false` and leaves the existing entry untouched if the id is
    /// already registered.
    pub fn register(&self, id: ConnectionId, sender: ConnectionSender) -> bool {
        match self.connections.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Connection::new(id, sender));
                debug!(connection_id = %id, "Connection registered");
                true
            }
        }
    }

    /// Bind a stable identity and callsign to a connection.
    ///
    /// May be called repeatedly; the last call wins. A `None` callsign keeps
    /// the callsign already known.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] if the id is not registered.
    pub fn bind_identity(
        &self,
        id: ConnectionId,
        client_id: ClientId,
        callsign: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut conn = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotConnected(id))?;
        debug!(
            connection_id = %id,
            client_id = %client_id,
            callsign = callsign.as_deref().unwrap_or("-"),
            "Identity bound"
        );
        conn.client_id = Some(client_id);
        if callsign.is_some() {
            conn.callsign = callsign;
        }
        conn.identified_at = Some(Utc::now());
        Ok(())
    }

    /// Update only the callsign of a connection, if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] if the id is not registered.
    pub fn set_callsign(&self, id: ConnectionId, callsign: &str) -> Result<(), RegistryError> {
        let mut conn = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotConnected(id))?;
        if conn.callsign.as_deref() != Some(callsign) {
            debug!(connection_id = %id, callsign, "Callsign changed");
            conn.callsign = Some(callsign.to_owned());
            conn.identified_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Add a connection to a group. Returns `true` if it was not a member.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] if the id is not registered.
    pub fn join_group(&self, id: ConnectionId, group: Group) -> Result<bool, RegistryError> {
        let mut conn = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotConnected(id))?;
        let added = conn.groups.insert(group);
        debug!(connection_id = %id, %group, added, "Joined group");
        Ok(added)
    }

    /// Remove a connection from a group. Returns `true` if it was a member.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] if the id is not registered.
    pub fn leave_group(&self, id: ConnectionId, group: Group) -> Result<bool, RegistryError> {
        let mut conn = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotConnected(id))?;
        let removed = conn.groups.remove(&group);
        debug!(connection_id = %id, %group, removed, "Left group");
        Ok(removed)
    }

    /// Find the connection flying under `callsign`, ignoring case.
    ///
    /// When several connections share the callsign the one that most
    /// recently identified wins. Duplicates are not otherwise resolved.
    pub fn resolve_by_callsign(&self, callsign: &str) -> Option<ConnectionId> {
        let wanted = callsign.trim().to_lowercase();
        self.connections
            .iter()
            .filter(|entry| entry.has_callsign(&wanted))
            .max_by_key(|entry| (entry.identified_at, entry.connected_at))
            .map(|entry| entry.id)
    }

    /// Find the single connection flying under `callsign`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for no match and
    /// [`RegistryError::Ambiguous`] for more than one.
    pub fn resolve_unique_callsign(&self, callsign: &str) -> Result<ConnectionId, RegistryError> {
        let wanted = callsign.trim().to_lowercase();
        let matches: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.has_callsign(&wanted))
            .map(|entry| entry.id)
            .collect();

        match matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(RegistryError::NotFound {
                callsign: callsign.to_owned(),
            }),
            many => Err(RegistryError::Ambiguous {
                callsign: callsign.to_owned(),
                count: many.len(),
            }),
        }
    }

    /// Find the connection a client identity is currently bound to.
    pub fn resolve_by_client(&self, client_id: &ClientId) -> Option<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.client_id.as_ref() == Some(client_id))
            .max_by_key(|entry| (entry.identified_at, entry.connected_at))
            .map(|entry| entry.id)
    }

    /// Current client identity of a connection.
    ///
    /// Returns `None` if the connection is not registered and `Some(None)`
    /// if it is registered but has not identified yet.
    pub fn client_id_of(&self, id: ConnectionId) -> Option<Option<ClientId>> {
        self.connections.get(&id).map(|conn| conn.client_id.clone())
    }

    /// Read-only view of one connection.
    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|conn| conn.info())
    }

    /// Whether the connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Send a message to one connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] if the id is not registered,
    /// or [`RegistryError::ChannelClosed`] if its queue has shut down.
    pub fn send_to(&self, id: ConnectionId, message: OutboundMessage) -> Result<(), RegistryError> {
        let conn = self
            .connections
            .get(&id)
            .ok_or(RegistryError::NotConnected(id))?;
        conn.sender
            .send(message)
            .map_err(|_closed| RegistryError::ChannelClosed(id))
    }

    /// Send a message to every member of any of `groups`.
    ///
    /// Each connection receives the message at most once. When `owner` is
    /// set, groups that exclude the recipient's own aircraft skip the owner.
    /// Returns the number of connections the message was queued for.
    pub fn broadcast(
        &self,
        groups: &[Group],
        message: &OutboundMessage,
        owner: Option<ConnectionId>,
    ) -> usize {
        let mut delivered: usize = 0;
        for entry in &self.connections {
            if entry.receives(groups, owner) && entry.sender.send(message.clone()).is_ok() {
                delivered = delivered.saturating_add(1);
            }
        }
        delivered
    }

    /// Remove a connection, returning its final state.
    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of members per group.
    pub fn group_counts(&self) -> BTreeMap<Group, usize> {
        let mut counts: BTreeMap<Group, usize> = Group::ALL.iter().map(|g| (*g, 0)).collect();
        for entry in &self.connections {
            for group in &entry.groups {
                if let Some(count) = counts.get_mut(group) {
                    *count = count.saturating_add(1);
                }
            }
        }
        counts
    }

    /// Read-only views of every live connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self.connections.iter().map(|c| c.info()).collect();
        all.sort_by_key(|c| c.id);
        all
    }
}
