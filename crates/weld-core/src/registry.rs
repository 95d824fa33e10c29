//! Namespace and room membership indices.
//!
//! A namespace is a slash-prefixed top-level grouping; a room is a named
//! sub-grouping inside a namespace. A client belongs to exactly one
//! namespace at a time and any number of that namespace's rooms.
//!
//! Invariant maintained throughout: every client in a room's set is also
//! in the owning namespace's set.

use std::collections::{HashMap, HashSet};

use crate::client::ClientId;

/// The namespace clients join on accept.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Pure in-memory membership indices. Not internally synchronized; the
/// gateway wraps a `Registry` in a single coarse lock so no reader ever
/// observes a half-applied mutation.
#[derive(Debug, Default)]
pub struct Registry {
    /// namespace → member client ids.
    namespaces: HashMap<String, HashSet<ClientId>>,
    /// namespace → room name → member client ids.
    rooms: HashMap<String, HashMap<String, HashSet<ClientId>>>,
    /// client → its current namespace.
    client_namespace: HashMap<ClientId, String>,
    /// client → rooms joined within its current namespace.
    client_rooms: HashMap<ClientId, HashSet<String>>,
}

impl Registry {
    /// Creates empty indices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a client into `namespace`, implicitly leaving its previous
    /// namespace and every room there.
    pub fn join_namespace(&mut self, client: &str, namespace: &str) {
        if self.client_namespace.get(client).map(String::as_str) == Some(namespace) {
            return;
        }
        self.leave_namespace(client);
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(client.to_string());
        self.client_namespace
            .insert(client.to_string(), namespace.to_string());
    }

    /// Removes a client from its namespace, leaving every room first.
    /// Called on disconnect; a client with no namespace is a no-op.
    pub fn leave_namespace(&mut self, client: &str) {
        self.leave_all_rooms(client);
        if let Some(namespace) = self.client_namespace.remove(client) {
            if let Some(members) = self.namespaces.get_mut(&namespace) {
                members.remove(client);
                if members.is_empty() {
                    self.namespaces.remove(&namespace);
                }
            }
        }
    }

    /// Adds a client to a room in its current namespace. A client outside
    /// any namespace cannot join rooms; the call is ignored.
    pub fn join_room(&mut self, client: &str, room: &str) {
        let Some(namespace) = self.client_namespace.get(client).cloned() else {
            return;
        };
        self.rooms
            .entry(namespace)
            .or_default()
            .entry(room.to_string())
            .or_default()
            .insert(client.to_string());
        self.client_rooms
            .entry(client.to_string())
            .or_default()
            .insert(room.to_string());
    }

    /// Removes a client from one room.
    pub fn leave_room(&mut self, client: &str, room: &str) {
        let Some(namespace) = self.client_namespace.get(client).cloned() else {
            return;
        };
        if let Some(rooms) = self.rooms.get_mut(&namespace) {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(client);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
            if rooms.is_empty() {
                self.rooms.remove(&namespace);
            }
        }
        if let Some(joined) = self.client_rooms.get_mut(client) {
            joined.remove(room);
            if joined.is_empty() {
                self.client_rooms.remove(client);
            }
        }
    }

    /// Removes a client from every room it has joined.
    pub fn leave_all_rooms(&mut self, client: &str) {
        let rooms: Vec<String> = self
            .client_rooms
            .get(client)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for room in rooms {
            self.leave_room(client, &room);
        }
    }

    /// The namespace a client currently belongs to.
    pub fn client_namespace(&self, client: &str) -> Option<&str> {
        self.client_namespace.get(client).map(String::as_str)
    }

    /// The rooms a client has joined.
    pub fn client_rooms(&self, client: &str) -> Vec<String> {
        self.client_rooms
            .get(client)
            .map(|set| {
                let mut rooms: Vec<String> = set.iter().cloned().collect();
                rooms.sort();
                rooms
            })
            .unwrap_or_default()
    }

    /// Members of a namespace.
    pub fn clients_in_namespace(&self, namespace: &str) -> Vec<ClientId> {
        self.namespaces
            .get(namespace)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Members of a room.
    pub fn clients_in_room(&self, namespace: &str, room: &str) -> Vec<ClientId> {
        self.rooms
            .get(namespace)
            .and_then(|rooms| rooms.get(room))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Room names that currently exist in a namespace.
    pub fn rooms(&self, namespace: &str) -> Vec<String> {
        self.rooms
            .get(namespace)
            .map(|rooms| {
                let mut names: Vec<String> = rooms.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    /// The recipient set for a broadcast filter: everyone, a namespace,
    /// or a room within a namespace.
    pub fn recipients(&self, namespace: Option<&str>, room: Option<&str>) -> Vec<ClientId> {
        match (namespace, room) {
            (Some(ns), Some(room)) => self.clients_in_room(ns, room),
            (Some(ns), None) => self.clients_in_namespace(ns),
            (None, _) => self.client_namespace.keys().cloned().collect(),
        }
    }

    /// Whether any index still mentions the client. Used by tests to
    /// assert disconnect leaves no residue.
    pub fn mentions(&self, client: &str) -> bool {
        self.client_namespace.contains_key(client)
            || self.client_rooms.contains_key(client)
            || self.namespaces.values().any(|set| set.contains(client))
            || self
                .rooms
                .values()
                .any(|rooms| rooms.values().any(|set| set.contains(client)))
    }
}
