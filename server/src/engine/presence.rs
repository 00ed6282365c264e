use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use super::events::UserId;

/// Basic online/offline presence: a user is online while at least one of
/// their gateway connections is open.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    connections: DashMap<UserId, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Returns true if the user just came online.
    pub fn connect(&self, user_id: &str) -> bool {
        let mut count = self.connections.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        let came_online = *count == 1;
        drop(count);

        if came_online {
            info!(%user_id, "user online");
        }
        came_online
    }

    /// Record a closed connection. Returns true if the user just went offline.
    pub fn disconnect(&self, user_id: &str) -> bool {
        let went_offline = match self.connections.entry(user_id.to_string()) {
            Entry::Occupied(mut e) => {
                if *e.get() <= 1 {
                    e.remove();
                    true
                } else {
                    *e.get_mut() -= 1;
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        if went_offline {
            info!(%user_id, "user offline");
        }
        went_offline
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_while_any_connection_open() {
        let presence = PresenceTracker::new();
        assert!(!presence.is_online("alice"));

        assert!(presence.connect("alice"));
        assert!(!presence.connect("alice"));
        assert!(presence.is_online("alice"));

        assert!(!presence.disconnect("alice"));
        assert!(presence.is_online("alice"));
        assert!(presence.disconnect("alice"));
        assert!(!presence.is_online("alice"));
        assert_eq!(presence.online_count(), 0);
    }

    #[test]
    fn test_disconnect_unknown_user() {
        let presence = PresenceTracker::new();
        assert!(!presence.disconnect("ghost"));
    }
}
