//! Connection registry and group fan-out
//!
//! Each WebSocket session registers an unbounded sender here; group
//! membership lives only as long as the connection. Publishing snapshots
//! the member list, then sends without holding any lock, so a slow or
//! dead member never blocks the rest. Senders that fail are pruned on
//! the spot.

pub mod session;

use binsight_common::events::HubEvent;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

pub struct Hub {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<HubEvent>>>,
    groups: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection, returning its id
    pub async fn register(&self, sender: mpsc::UnboundedSender<HubEvent>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, sender);
        debug!(connection_id = %id, "Connection registered");
        id
    }

    /// Drop a connection and every group membership it held
    pub async fn unregister(&self, id: Uuid) {
        self.connections.write().await.remove(&id);

        let mut groups = self.groups.write().await;
        groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });

        debug!(connection_id = %id, "Connection unregistered");
    }

    /// Add a connection to a group, creating the group on first join
    ///
    /// Returns false for connections that are not registered.
    pub async fn join(&self, id: Uuid, group: &str) -> bool {
        if !self.connections.read().await.contains_key(&id) {
            return false;
        }

        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(id);

        debug!(connection_id = %id, group, "Joined group");
        true
    }

    /// Remove a connection from a group; empty groups disappear
    pub async fn leave(&self, id: Uuid, group: &str) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                groups.remove(group);
            }
        }

        debug!(connection_id = %id, group, "Left group");
    }

    /// Deliver an event to every current member of a group
    ///
    /// Returns the number of successful deliveries. Members whose channel
    /// is gone are unregistered.
    pub async fn publish(&self, group: &str, event: &HubEvent) -> usize {
        let members: Vec<Uuid> = match self.groups.read().await.get(group) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        self.deliver(&members, event).await
    }

    /// Deliver an event to every group it routes to
    ///
    /// A connection belonging to several target groups receives a single
    /// copy. Events that route nowhere are not broadcast.
    pub async fn publish_routed(&self, event: &HubEvent) -> usize {
        let target_groups = event.groups();
        if target_groups.is_empty() {
            return 0;
        }

        let mut members: HashSet<Uuid> = HashSet::new();
        {
            let groups = self.groups.read().await;
            for group in &target_groups {
                if let Some(group_members) = groups.get(group) {
                    members.extend(group_members.iter().copied());
                }
            }
        }

        let members: Vec<Uuid> = members.into_iter().collect();
        self.deliver(&members, event).await
    }

    /// Send an event to one connection, e.g. a direct command reply
    pub async fn send_to(&self, id: Uuid, event: &HubEvent) -> bool {
        let sender = match self.connections.read().await.get(&id) {
            Some(sender) => sender.clone(),
            None => return false,
        };

        if sender.send(event.clone()).is_err() {
            self.unregister(id).await;
            return false;
        }
        true
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn member_count(&self, group: &str) -> usize {
        self.groups
            .read()
            .await
            .get(group)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    async fn deliver(&self, members: &[Uuid], event: &HubEvent) -> usize {
        let senders: Vec<(Uuid, mpsc::UnboundedSender<HubEvent>)> = {
            let connections = self.connections.read().await;
            members
                .iter()
                .filter_map(|id| connections.get(id).map(|s| (*id, s.clone())))
                .collect()
        };

        let mut delivered = 0;
        let mut dead: Vec<Uuid> = Vec::new();

        for (id, sender) in senders {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            debug!(connection_id = %id, event = event.event_type(), "Dropping dead connection");
            self.unregister(id).await;
        }

        delivered
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsight_common::events::{GROUP_CLASSIFICATION, GROUP_DASHBOARD};
    use chrono::Utc;

    fn heartbeat() -> HubEvent {
        HubEvent::Heartbeat {
            source: "cnn_service".to_string(),
            status: "alive".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn detection() -> HubEvent {
        HubEvent::ItemDetected {
            detection_id: "det-1".to_string(),
            source: "camera".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_group_members_only() {
        let hub = Hub::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = hub.register(tx_a).await;
        let b = hub.register(tx_b).await;

        assert!(hub.join(a, GROUP_CLASSIFICATION).await);
        assert!(hub.join(b, GROUP_DASHBOARD).await);

        let delivered = hub.publish(GROUP_CLASSIFICATION, &detection()).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err(), "Non-member should receive nothing");
    }

    #[tokio::test]
    async fn test_join_requires_registered_connection() {
        let hub = Hub::new();
        assert!(!hub.join(Uuid::new_v4(), GROUP_DASHBOARD).await);
        assert_eq!(hub.member_count(GROUP_DASHBOARD).await, 0);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let hub = Hub::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        hub.join(id, GROUP_CLASSIFICATION).await;

        hub.leave(id, GROUP_CLASSIFICATION).await;

        assert_eq!(hub.publish(GROUP_CLASSIFICATION, &detection()).await, 0);
        assert!(rx.try_recv().is_err());
        assert!(hub.group_names().await.is_empty(), "Empty group should disappear");
    }

    #[tokio::test]
    async fn test_unregister_clears_all_memberships() {
        let hub = Hub::new();

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        hub.join(id, GROUP_CLASSIFICATION).await;
        hub.join(id, GROUP_DASHBOARD).await;

        hub.unregister(id).await;

        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.member_count(GROUP_CLASSIFICATION).await, 0);
        assert_eq!(hub.member_count(GROUP_DASHBOARD).await, 0);
    }

    #[tokio::test]
    async fn test_dead_member_is_pruned_without_blocking_others() {
        let hub = Hub::new();

        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let dead = hub.register(tx_dead).await;
        let live = hub.register(tx_live).await;
        hub.join(dead, GROUP_CLASSIFICATION).await;
        hub.join(live, GROUP_CLASSIFICATION).await;

        drop(rx_dead);

        let delivered = hub.publish(GROUP_CLASSIFICATION, &detection()).await;
        assert_eq!(delivered, 1, "Live member should still be served");
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(hub.connection_count().await, 1, "Dead connection should be pruned");
    }

    #[tokio::test]
    async fn test_publish_routed_delivers_one_copy_per_connection() {
        let hub = Hub::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        hub.join(id, "HealthMonitor").await;
        hub.join(id, GROUP_DASHBOARD).await;

        // Heartbeat routes to both of this connection's groups
        let delivered = hub.publish_routed(&heartbeat()).await;
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "Dual membership must not duplicate delivery");
    }

    #[tokio::test]
    async fn test_direct_reply_events_are_not_broadcast() {
        let hub = Hub::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        hub.join(id, GROUP_DASHBOARD).await;

        let reply = HubEvent::IngestAccepted {
            classification_id: 1,
            detection_id: "det-1".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(hub.publish_routed(&reply).await, 0);
        assert!(rx.try_recv().is_err());

        assert!(hub.send_to(id, &reply).await, "Direct send should still work");
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_returns_false() {
        let hub = Hub::new();
        assert!(!hub.send_to(Uuid::new_v4(), &heartbeat()).await);
    }
}
