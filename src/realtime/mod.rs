//! Real-time fan-out channel.
//!
//! Pushes progress and membership events to connections grouped into one
//! logical room per organization. The channel is an explicit handle with an
//! `init`/`shutdown` lifecycle; components that publish receive a clone of the
//! handle, there is no ambient global.
//!
//! Delivery is at-most-once: each connection owns a bounded queue, a full or
//! dropped queue loses the event, ordering holds only per connection, and a
//! disconnected client misses everything until its next full refresh.

pub mod events;

pub use events::{ProgressChange, RefreshDomain, ServerEvent};

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the real-time channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel has been shut down; no further connects or publishes.
    #[error("realtime channel is shut down")]
    Closed,
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Queue capacity floor; connect needs room for its own handshake events.
const MIN_QUEUE_CAPACITY: usize = 8;

struct Member {
    user: String,
    sender: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct ChannelState {
    open: bool,
    next_connection: u64,
    /// organization id -> connection id -> member
    rooms: HashMap<String, HashMap<u64, Member>>,
}

/// Cloneable handle to the real-time fan-out channel.
#[derive(Clone)]
pub struct RealtimeChannel {
    state: Arc<RwLock<ChannelState>>,
    build_tag: Arc<str>,
    queue_capacity: usize,
}

impl RealtimeChannel {
    /// Bring up a channel. `build_tag` is sent to every connection on
    /// connect; `queue_capacity` bounds each connection's event queue.
    pub fn init(build_tag: impl Into<String>, queue_capacity: usize) -> Self {
        let channel = Self {
            state: Arc::new(RwLock::new(ChannelState {
                open: true,
                ..Default::default()
            })),
            build_tag: Arc::from(build_tag.into()),
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
        };
        info!("realtime channel up (build {})", channel.build_tag);
        channel
    }

    /// Tear the channel down: evict every connection and refuse any further
    /// connect or publish.
    pub fn shutdown(&self) {
        let mut state = self.state.write().expect("channel lock poisoned");
        state.open = false;
        let evicted: usize = state.rooms.values().map(HashMap::len).sum();
        state.rooms.clear();
        info!("realtime channel shut down ({} connections evicted)", evicted);
    }

    pub fn is_open(&self) -> bool {
        self.state.read().expect("channel lock poisoned").open
    }

    /// Join one room per organization. The new connection is immediately
    /// handed the build tag and the set of user ids currently online in its
    /// rooms; other room members learn the user came online.
    pub fn connect(
        &self,
        user_id: impl Into<String>,
        org_ids: &[String],
    ) -> ChannelResult<Connection> {
        let user_id = user_id.into();
        let mut state = self.state.write().expect("channel lock poisoned");
        if !state.open {
            return Err(ChannelError::Closed);
        }

        let connection_id = state.next_connection;
        state.next_connection += 1;
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        // Online set and first-connection-per-room bookkeeping, before we join.
        let mut online: Vec<String> = Vec::new();
        let mut newly_online_rooms: Vec<&String> = Vec::new();
        for org_id in org_ids {
            let members = state.rooms.get(org_id);
            let already_here = members
                .map(|m| m.values().any(|member| member.user == user_id))
                .unwrap_or(false);
            if !already_here {
                newly_online_rooms.push(org_id);
            }
            if let Some(members) = members {
                for member in members.values() {
                    if member.user != user_id && !online.contains(&member.user) {
                        online.push(member.user.clone());
                    }
                }
            }
        }

        // Handshake straight into the fresh queue; capacity floor guarantees
        // room for both events.
        let _ = sender.try_send(ServerEvent::Info {
            version: self.build_tag.to_string(),
        });
        let _ = sender.try_send(ServerEvent::UsersJoined {
            users: online.clone(),
        });

        // Announce to rooms where this user was not yet online.
        for org_id in &newly_online_rooms {
            if let Some(members) = state.rooms.get(org_id.as_str()) {
                for member in members.values() {
                    Self::deliver(
                        member,
                        ServerEvent::UsersJoined {
                            users: vec![user_id.clone()],
                        },
                    );
                }
            }
        }

        for org_id in org_ids {
            state.rooms.entry(org_id.clone()).or_default().insert(
                connection_id,
                Member {
                    user: user_id.clone(),
                    sender: sender.clone(),
                },
            );
        }
        debug!("connection {} ({}) joined {} rooms", connection_id, user_id, org_ids.len());

        Ok(Connection {
            channel: self.clone(),
            id: connection_id,
            user: user_id,
            org_ids: org_ids.to_vec(),
            receiver,
        })
    }

    /// Broadcast to every connection in an organization's room.
    pub fn publish(&self, org_id: &str, event: ServerEvent) -> ChannelResult<usize> {
        self.publish_filtered(org_id, event, None)
    }

    /// Broadcast to a room, skipping every connection of `except_user` (used
    /// for refresh invalidations, which the acting user already knows about).
    pub fn publish_filtered(
        &self,
        org_id: &str,
        event: ServerEvent,
        except_user: Option<&str>,
    ) -> ChannelResult<usize> {
        let state = self.state.read().expect("channel lock poisoned");
        if !state.open {
            return Err(ChannelError::Closed);
        }
        let mut delivered = 0;
        if let Some(members) = state.rooms.get(org_id) {
            for member in members.values() {
                if except_user == Some(member.user.as_str()) {
                    continue;
                }
                if Self::deliver(member, event.clone()) {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// User ids currently online in a room.
    pub fn online_users(&self, org_id: &str) -> Vec<String> {
        let state = self.state.read().expect("channel lock poisoned");
        let mut users: Vec<String> = Vec::new();
        if let Some(members) = state.rooms.get(org_id) {
            for member in members.values() {
                if !users.contains(&member.user) {
                    users.push(member.user.clone());
                }
            }
        }
        users
    }

    fn deliver(member: &Member, event: ServerEvent) -> bool {
        match member.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // At-most-once: the slow consumer loses this event and will
                // recover on its next full refresh.
                warn!("dropping event for slow connection of user {}", member.user);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn disconnect(&self, connection_id: u64, user_id: &str, org_ids: &[String]) {
        let mut state = self.state.write().expect("channel lock poisoned");
        if !state.open {
            return;
        }
        for org_id in org_ids {
            let Some(members) = state.rooms.get_mut(org_id) else {
                continue;
            };
            members.remove(&connection_id);
            let still_online = members.values().any(|member| member.user == user_id);
            if !still_online {
                for member in members.values() {
                    Self::deliver(
                        member,
                        ServerEvent::UsersLeft {
                            users: vec![user_id.to_string()],
                        },
                    );
                }
            }
            if members.is_empty() {
                state.rooms.remove(org_id);
            }
        }
        debug!("connection {} ({}) left", connection_id, user_id);
    }
}

/// One authenticated connection's membership in its organization rooms.
/// Dropping the connection notifies the remaining room members.
pub struct Connection {
    channel: RealtimeChannel,
    id: u64,
    user: String,
    org_ids: Vec<String>,
    receiver: mpsc::Receiver<ServerEvent>,
}

impl Connection {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Next event, in per-connection delivery order. `None` once the channel
    /// has shut down and the queue drained.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, used by tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.channel.disconnect(self.id, &self.user, &self.org_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_receives_build_tag_and_online_set() {
        let channel = RealtimeChannel::init("v1.2.3", 16);
        let rooms = vec!["o1".to_string()];
        let _first = channel.connect("u1", &rooms).unwrap();
        let mut second = channel.connect("u2", &rooms).unwrap();

        assert_eq!(
            second.try_recv(),
            Some(ServerEvent::Info {
                version: "v1.2.3".into()
            })
        );
        assert_eq!(
            second.try_recv(),
            Some(ServerEvent::UsersJoined {
                users: vec!["u1".into()]
            })
        );
    }

    #[test]
    fn presence_tracks_last_connection_per_user() {
        let channel = RealtimeChannel::init("v1", 16);
        let rooms = vec!["o1".to_string()];
        let mut watcher = channel.connect("u1", &rooms).unwrap();
        watcher.try_recv();
        watcher.try_recv();

        let tab_a = channel.connect("u2", &rooms).unwrap();
        let tab_b = channel.connect("u2", &rooms).unwrap();
        assert_eq!(
            watcher.try_recv(),
            Some(ServerEvent::UsersJoined {
                users: vec!["u2".into()]
            })
        );
        // Second tab of the same user is not re-announced.
        assert_eq!(watcher.try_recv(), None);

        drop(tab_a);
        assert_eq!(watcher.try_recv(), None);
        drop(tab_b);
        assert_eq!(
            watcher.try_recv(),
            Some(ServerEvent::UsersLeft {
                users: vec!["u2".into()]
            })
        );
    }

    #[test]
    fn publish_is_scoped_to_the_room() {
        let channel = RealtimeChannel::init("v1", 16);
        let mut in_room = channel.connect("u1", &["o1".to_string()]).unwrap();
        let mut outside = channel.connect("u2", &["o2".to_string()]).unwrap();
        for conn in [&mut in_room, &mut outside] {
            conn.try_recv();
            conn.try_recv();
        }

        let delivered = channel
            .publish(
                "o1",
                ServerEvent::UsersJoined {
                    users: vec!["x".into()],
                },
            )
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(in_room.try_recv().is_some());
        assert!(outside.try_recv().is_none());
    }

    #[test]
    fn refresh_skips_the_acting_user() {
        let channel = RealtimeChannel::init("v1", 16);
        let rooms = vec!["o1".to_string()];
        let mut actor = channel.connect("u1", &rooms).unwrap();
        let mut other = channel.connect("u2", &rooms).unwrap();
        for conn in [&mut actor, &mut other] {
            while conn.try_recv().is_some() {}
        }

        let event = ServerEvent::Refresh {
            except: "u1".into(),
            domains: vec![RefreshDomain::Items, RefreshDomain::Share],
        };
        channel.publish_filtered("o1", event.clone(), Some("u1")).unwrap();
        assert_eq!(actor.try_recv(), None);
        assert_eq!(other.try_recv(), Some(event));
    }

    #[test]
    fn shutdown_refuses_connects_and_publishes() {
        let channel = RealtimeChannel::init("v1", 16);
        let conn = channel.connect("u1", &["o1".to_string()]).unwrap();
        channel.shutdown();
        assert!(matches!(
            channel.connect("u2", &["o1".to_string()]),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            channel.publish("o1", ServerEvent::UsersLeft { users: vec![] }),
            Err(ChannelError::Closed)
        ));
        drop(conn);
    }

    #[test]
    fn slow_consumer_drops_events_instead_of_blocking() {
        let channel = RealtimeChannel::init("v1", 8);
        let mut conn = channel.connect("u1", &["o1".to_string()]).unwrap();

        // Fill the bounded queue well past capacity; publish must not block
        // and the surplus is silently dropped.
        for i in 0..50 {
            channel
                .publish(
                    "o1",
                    ServerEvent::UsersJoined {
                        users: vec![format!("u{}", i)],
                    },
                )
                .unwrap();
        }
        let mut received = 0;
        while conn.try_recv().is_some() {
            received += 1;
        }
        assert!(received <= 8);
        assert!(received >= 1);
    }
}
