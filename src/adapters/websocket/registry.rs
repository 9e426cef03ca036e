//! Connection registry - who is connected, and to which channel.
//!
//! # Architecture
//!
//! ```text
//! users:  user-1 → [conn-a (order_update), conn-b]
//!         user-2 → [conn-c (order_update)]
//! owners: conn-a → user-1, conn-b → user-1, conn-c → user-2
//! ```
//!
//! `users` is the primary store. `owners` answers "which user owns this
//! connection" without a scan and doubles as the uniqueness claim for
//! connection ids. Both maps are sharded (`DashMap`), so writers for
//! different users do not contend.
//!
//! # Locking
//!
//! An operation holds at most one shard guard at a time, always releasing
//! the `owners` guard before touching `users` and vice versa. No guard is
//! ever held across an `.await`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::foundation::{ConnectionId, Timestamp, UserId};

use super::socket::SocketHandle;

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),
}

/// One registered client connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub socket: SocketHandle,
    pub subscribed_channel: Option<String>,
    pub authenticated: bool,
    pub created_at: Timestamp,
}

impl ConnectionRecord {
    pub fn is_subscribed_to(&self, channel: &str) -> bool {
        self.subscribed_channel.as_deref() == Some(channel)
    }

    /// Socket-free view for listings.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.connection_id,
            channel: self.subscribed_channel.clone(),
            authenticated: self.authenticated,
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub channel: Option<String>,
    pub authenticated: bool,
    pub created_at: Timestamp,
}

/// Concurrent store of live connections grouped by user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, Vec<ConnectionRecord>>,
    owners: DashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user_id`.
    ///
    /// Fails with `DuplicateConnection` if `connection_id` is registered
    /// under any user.
    pub fn add(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        socket: SocketHandle,
        authenticated: bool,
    ) -> Result<ConnectionRecord, RegistryError> {
        match self.owners.entry(connection_id) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateConnection(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
            }
        }

        let record = ConnectionRecord {
            connection_id,
            user_id: user_id.clone(),
            socket,
            subscribed_channel: None,
            authenticated,
            created_at: Timestamp::now(),
        };

        self.users
            .entry(user_id.clone())
            .or_default()
            .push(record.clone());

        tracing::debug!(user_id = %user_id, connection_id = %connection_id, "connection registered");
        Ok(record)
    }

    /// Sets the channel of one connection, replacing any previous one.
    pub fn add_channel(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        channel: &str,
    ) -> Result<(), RegistryError> {
        let mut records = self
            .users
            .get_mut(user_id)
            .ok_or(RegistryError::ConnectionNotFound(connection_id))?;

        let record = records
            .iter_mut()
            .find(|r| r.connection_id == connection_id)
            .ok_or(RegistryError::ConnectionNotFound(connection_id))?;

        record.subscribed_channel = Some(channel.to_string());
        Ok(())
    }

    /// Removes exactly one connection. No-op if it is not registered.
    pub fn remove_by_conn_id(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Option<ConnectionRecord> {
        let removed = {
            let mut records = self.users.get_mut(user_id)?;
            let position = records
                .iter()
                .position(|r| r.connection_id == connection_id)?;
            let removed = records.remove(position);
            let now_empty = records.is_empty();
            drop(records);

            if now_empty {
                self.users.remove_if(user_id, |_, list| list.is_empty());
            }
            removed
        };

        self.owners.remove(&connection_id);
        tracing::debug!(user_id = %user_id, connection_id = %connection_id, "connection removed");
        Some(removed)
    }

    /// Removes every connection of a user.
    pub fn remove(&self, user_id: &UserId) -> Vec<ConnectionRecord> {
        let removed = self
            .users
            .remove(user_id)
            .map(|(_, records)| records)
            .unwrap_or_default();

        for record in &removed {
            self.owners.remove(&record.connection_id);
        }
        removed
    }

    pub fn get_by_conn_id(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Option<ConnectionRecord> {
        self.users.get(user_id).and_then(|records| {
            records
                .iter()
                .find(|r| r.connection_id == connection_id)
                .cloned()
        })
    }

    /// Every connection currently subscribed to `channel`.
    pub fn get_by_channel(&self, channel: &str) -> Vec<ConnectionRecord> {
        self.users
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.is_subscribed_to(channel))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Owner of a connection, confirmed against the primary store.
    pub fn get_user_for_connection(&self, connection_id: ConnectionId) -> Option<UserId> {
        let user_id = self.owners.get(&connection_id).map(|u| u.value().clone())?;

        let present = self
            .users
            .get(&user_id)
            .map(|records| records.iter().any(|r| r.connection_id == connection_id))
            .unwrap_or(false);

        present.then_some(user_id)
    }

    /// All records grouped by user.
    pub fn snapshot(&self) -> Vec<(UserId, Vec<ConnectionRecord>)> {
        self.users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
