//! In-memory registry of websocket connections and channel subscriptions.
//!
//! Channels are created lazily when the first subscriber arrives and removed
//! when the last one leaves. Delivery is best-effort: each connection owns a
//! bounded outbound queue, and a full queue drops the message for that
//! connection rather than blocking the broadcaster.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use beacon_types::ChannelKey;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Capacity of each connection's outbound message queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct ConnectionEntry {
    tx: mpsc::Sender<String>,
    channels: HashSet<ChannelKey>,
    user_ids: HashSet<String>,
}

/// Handle returned by [`ChannelRegistry::subscribe`], used to undo exactly
/// that subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    connection: Uuid,
    channel: ChannelKey,
    user_id: Option<String>,
}

/// Registry mapping channels and user ids to live connections.
///
/// Lock order: `connections` before `channels` before `users`.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionEntry>>>,
    channels: Arc<RwLock<HashMap<ChannelKey, HashSet<Uuid>>>>,
    users: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id plus the receiving end
    /// of its outbound queue.
    pub async fn attach(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            ConnectionEntry {
                tx,
                channels: HashSet::new(),
                user_ids: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Subscribes a connection to a channel, optionally indexing it under a
    /// user id for direct delivery.
    pub async fn subscribe(
        &self,
        connection: Uuid,
        channel: ChannelKey,
        user_id: Option<String>,
    ) -> SubscriptionHandle {
        {
            let mut connections = self.connections.write().await;
            if let Some(entry) = connections.get_mut(&connection) {
                entry.channels.insert(channel.clone());
                if let Some(uid) = &user_id {
                    entry.user_ids.insert(uid.clone());
                }
            }
        }
        {
            let mut channels = self.channels.write().await;
            channels.entry(channel.clone()).or_default().insert(connection);
        }
        if let Some(uid) = &user_id {
            let mut users = self.users.write().await;
            users.entry(uid.clone()).or_default().insert(connection);
        }
        SubscriptionHandle {
            connection,
            channel,
            user_id,
        }
    }

    /// Removes a single subscription. Idempotent: a handle may be
    /// unsubscribed more than once without effect.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        {
            let mut connections = self.connections.write().await;
            if let Some(entry) = connections.get_mut(&handle.connection) {
                entry.channels.remove(&handle.channel);
                if let Some(uid) = &handle.user_id {
                    entry.user_ids.remove(uid);
                }
            }
        }
        {
            let mut channels = self.channels.write().await;
            if let Some(members) = channels.get_mut(&handle.channel) {
                members.remove(&handle.connection);
                if members.is_empty() {
                    channels.remove(&handle.channel);
                }
            }
        }
        if let Some(uid) = &handle.user_id {
            let mut users = self.users.write().await;
            if let Some(members) = users.get_mut(uid) {
                members.remove(&handle.connection);
                if members.is_empty() {
                    users.remove(uid);
                }
            }
        }
    }

    /// Removes a connection and all of its subscriptions.
    pub async fn detach(&self, connection: Uuid) {
        let entry = {
            let mut connections = self.connections.write().await;
            connections.remove(&connection)
        };
        let Some(entry) = entry else {
            return;
        };
        {
            let mut channels = self.channels.write().await;
            for key in &entry.channels {
                if let Some(members) = channels.get_mut(key) {
                    members.remove(&connection);
                    if members.is_empty() {
                        channels.remove(key);
                    }
                }
            }
        }
        {
            let mut users = self.users.write().await;
            for uid in &entry.user_ids {
                if let Some(members) = users.get_mut(uid) {
                    members.remove(&connection);
                    if members.is_empty() {
                        users.remove(uid);
                    }
                }
            }
        }
    }

    /// Sends a text frame to every subscriber of a channel.
    ///
    /// Subscribers whose queues are full miss this message; subscribers whose
    /// receivers have been dropped are pruned from the registry.
    pub async fn broadcast(&self, channel: &ChannelKey, message: &str) {
        let member_ids: Vec<Uuid> = {
            let channels = self.channels.read().await;
            match channels.get(channel) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };
        self.deliver(&member_ids, message, Some(channel)).await;
    }

    /// Sends a text frame to a single connection by id.
    pub async fn send_to_connection(&self, connection: Uuid, message: &str) {
        self.deliver(&[connection], message, None).await;
    }

    /// Sends a text frame to every connection registered under a user id.
    pub async fn send_to_user(&self, user_id: &str, message: &str) {
        let member_ids: Vec<Uuid> = {
            let users = self.users.read().await;
            match users.get(user_id) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };
        self.deliver(&member_ids, message, None).await;
    }

    async fn deliver(&self, member_ids: &[Uuid], message: &str, channel: Option<&ChannelKey>) {
        let senders: Vec<(Uuid, mpsc::Sender<String>)> = {
            let connections = self.connections.read().await;
            member_ids
                .iter()
                .filter_map(|id| connections.get(id).map(|e| (*id, e.tx.clone())))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in senders {
            match tx.try_send(message.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %id,
                        channel = channel.map(|c| c.to_string()).unwrap_or_default(),
                        "outbound queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.detach(id).await;
        }
    }

    /// Number of live subscribers on a channel.
    pub async fn subscriber_count(&self, channel: &ChannelKey) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel).map(HashSet::len).unwrap_or(0)
    }
}
