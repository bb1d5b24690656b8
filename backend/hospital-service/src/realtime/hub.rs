/// Channel hub for realtime fan-out
///
/// Every open WebSocket is registered with an unbounded sender and joins a
/// set of channels:
/// - `user:{id}` for notifications addressed to the user
/// - `role:{role}` for role-wide queue traffic
/// - `department:{dept}` for the department the user works in or subscribed to
///
/// Publishing to several channels delivers each event once per connection.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::messages::RealtimeEvent;
use crate::metrics;
use crate::middleware::AuthUser;
use crate::models::{audience_roles, UserRole};

/// Type alias for realtime event sender
pub type EventSender = mpsc::UnboundedSender<RealtimeEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    User(Uuid),
    Role(UserRole),
    Department(String),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{}", id),
            Channel::Role(role) => write!(f, "role:{}", role),
            Channel::Department(dept) => write!(f, "department:{}", dept),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

struct Connection {
    user_id: Uuid,
    sender: EventSender,
    channels: HashSet<Channel>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    channels: HashMap<Channel, HashSet<ConnectionId>>,
}

impl HubState {
    fn join(&mut self, id: ConnectionId, channel: Channel) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.channels.insert(channel.clone()) {
            return false;
        }
        self.channels.entry(channel).or_default().insert(id);
        true
    }

    fn leave(&mut self, id: ConnectionId, channel: &Channel) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.channels.remove(channel) {
            return false;
        }
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
        true
    }

    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        for channel in conn.channels {
            if let Some(members) = self.channels.get_mut(&channel) {
                members.remove(&id);
                if members.is_empty() {
                    self.channels.remove(&channel);
                }
            }
        }
        true
    }
}

/// Thread-safe registry of open connections and their channel memberships.
#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<RwLock<HubState>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and join its default channels.
    ///
    /// Returns the connection id and the channels joined, in join order.
    pub async fn connect(
        &self,
        user: &AuthUser,
        department: Option<&str>,
        sender: EventSender,
    ) -> (ConnectionId, Vec<Channel>) {
        let id = ConnectionId(Uuid::new_v4());
        let mut channels = vec![Channel::User(user.id), Channel::Role(user.role)];
        if let Some(dept) = department {
            channels.push(Channel::Department(dept.to_string()));
        }

        let mut state = self.inner.write().await;
        state.connections.insert(
            id,
            Connection {
                user_id: user.id,
                sender,
                channels: HashSet::new(),
            },
        );
        for channel in &channels {
            state.join(id, channel.clone());
        }
        metrics::set_realtime_connections(state.connections.len());

        (id, channels)
    }

    /// Remove a connection and every membership it held.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut state = self.inner.write().await;
        if state.remove(id) {
            metrics::set_realtime_connections(state.connections.len());
        }
    }

    pub async fn join(&self, id: ConnectionId, channel: Channel) -> bool {
        self.inner.write().await.join(id, channel)
    }

    pub async fn leave(&self, id: ConnectionId, channel: &Channel) -> bool {
        self.inner.write().await.leave(id, channel)
    }

    /// Deliver an event to the union of the given channels.
    ///
    /// Returns the number of connections reached. Connections whose receiver
    /// is gone are pruned.
    pub async fn send_to(&self, channels: &[Channel], event: &RealtimeEvent) -> usize {
        let dead = {
            let state = self.inner.read().await;
            let targets: HashSet<ConnectionId> = channels
                .iter()
                .filter_map(|channel| state.channels.get(channel))
                .flatten()
                .copied()
                .collect();
            Self::deliver(&state, targets.into_iter(), event)
        };
        self.finish_delivery(dead).await
    }

    /// Deliver an event to every open connection.
    pub async fn broadcast(&self, event: &RealtimeEvent) -> usize {
        let dead = {
            let state = self.inner.read().await;
            let targets: Vec<ConnectionId> = state.connections.keys().copied().collect();
            Self::deliver(&state, targets.into_iter(), event)
        };
        self.finish_delivery(dead).await
    }

    /// Deliver a notification-style event to one user's connections.
    pub async fn send_to_user(&self, user_id: Uuid, event: &RealtimeEvent) -> usize {
        self.send_to(&[Channel::User(user_id)], event).await
    }

    /// Deliver a queue event to the department channel and the roles staffing it.
    pub async fn publish_department(&self, department: &str, event: &RealtimeEvent) -> usize {
        self.send_to(&department_audience(department), event).await
    }

    /// Deliver an event to a single connection.
    pub async fn send_to_connection(&self, id: ConnectionId, event: &RealtimeEvent) -> bool {
        let dead = {
            let state = self.inner.read().await;
            Self::deliver(&state, std::iter::once(id), event)
        };
        self.finish_delivery(dead).await > 0
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn connected_users_count(&self) -> usize {
        let state = self.inner.read().await;
        state
            .connections
            .values()
            .map(|c| c.user_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub async fn channel_size(&self, channel: &Channel) -> usize {
        self.inner
            .read()
            .await
            .channels
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Sends to each target; returns (delivered, dead) ids.
    fn deliver(
        state: &HubState,
        targets: impl Iterator<Item = ConnectionId>,
        event: &RealtimeEvent,
    ) -> (usize, Vec<ConnectionId>) {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in targets {
            if let Some(conn) = state.connections.get(&id) {
                if conn.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(id);
                }
            }
        }
        (delivered, dead)
    }

    async fn finish_delivery(&self, (delivered, dead): (usize, Vec<ConnectionId>)) -> usize {
        if !dead.is_empty() {
            let mut state = self.inner.write().await;
            for id in dead {
                state.remove(id);
            }
            metrics::set_realtime_connections(state.connections.len());
        }
        delivered
    }
}

/// Channels that follow a department's queue.
pub fn department_audience(department: &str) -> Vec<Channel> {
    std::iter::once(Channel::Department(department.to_string()))
        .chain(audience_roles(department).iter().map(|r| Channel::Role(*r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(role: UserRole) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: format!("{}@hospital.test", role),
            role,
        }
    }

    #[tokio::test]
    async fn connect_joins_default_channels() {
        let hub = ChannelHub::new();
        let doctor = staff(UserRole::Doctor);
        let (tx, _rx) = mpsc::unbounded_channel();

        let (_, channels) = hub.connect(&doctor, Some("cardiology"), tx).await;

        assert_eq!(
            channels,
            vec![
                Channel::User(doctor.id),
                Channel::Role(UserRole::Doctor),
                Channel::Department("cardiology".into()),
            ]
        );
        assert_eq!(hub.channel_size(&Channel::Role(UserRole::Doctor)).await, 1);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn overlapping_channels_deliver_once() {
        let hub = ChannelHub::new();
        let tech = staff(UserRole::LabTechnician);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.connect(&tech, Some("laboratory"), tx).await;

        // Member of both department:laboratory and role:lab_technician
        let event = RealtimeEvent::pong();
        let reached = hub.publish_department("laboratory", &event).await;

        assert_eq!(reached, 1);
        assert_eq!(rx.recv().await, Some(event));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connections_are_pruned() {
        let hub = ChannelHub::new();
        let nurse = staff(UserRole::Nurse);
        let (tx, rx) = mpsc::unbounded_channel();
        hub.connect(&nurse, None, tx).await;
        drop(rx);

        let reached = hub.broadcast(&RealtimeEvent::pong()).await;

        assert_eq!(reached, 0);
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.channel_size(&Channel::User(nurse.id)).await, 0);
    }

    #[tokio::test]
    async fn disconnect_removes_memberships() {
        let hub = ChannelHub::new();
        let billing = staff(UserRole::Billing);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = hub.connect(&billing, Some("billing"), tx).await;
        assert!(hub.join(id, Channel::Department("pharmacy".into())).await);

        hub.disconnect(id).await;

        assert_eq!(hub.channel_size(&Channel::Department("billing".into())).await, 0);
        assert_eq!(hub.channel_size(&Channel::Department("pharmacy".into())).await, 0);
        assert_eq!(hub.connected_users_count().await, 0);
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let hub = ChannelHub::new();
        let doctor = staff(UserRole::Doctor);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = hub.connect(&doctor, None, tx).await;
        let ward = Channel::Department("ward-3".into());

        assert!(hub.join(id, ward.clone()).await);
        assert!(!hub.join(id, ward.clone()).await);
        assert!(hub.leave(id, &ward).await);
        assert!(!hub.leave(id, &ward).await);
    }

    #[tokio::test]
    async fn user_channel_reaches_every_device() {
        let hub = ChannelHub::new();
        let pharmacist = staff(UserRole::Pharmacist);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.connect(&pharmacist, None, tx1).await;
        hub.connect(&pharmacist, None, tx2).await;

        let reached = hub.send_to_user(pharmacist.id, &RealtimeEvent::pong()).await;

        assert_eq!(reached, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(hub.connected_users_count().await, 1);
    }

    #[test]
    fn department_audience_includes_staffing_roles() {
        let channels = department_audience("pharmacy");
        assert_eq!(
            channels,
            vec![
                Channel::Department("pharmacy".into()),
                Channel::Role(UserRole::Pharmacist),
            ]
        );
        assert_eq!(Channel::Role(UserRole::LabTechnician).to_string(), "role:lab_technician");
    }
}
