use std::collections::HashSet;

use super::events::{ChannelId, ServerId, ServerInfo, UserId};

/// In-memory state for a server (guild).
#[derive(Debug, Clone)]
pub struct ServerState {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
    pub description: Option<String>,
    /// Channel IDs belonging to this server.
    pub channel_ids: HashSet<ChannelId>,
    /// User IDs who are members of this server (persistent membership).
    pub member_user_ids: HashSet<UserId>,
}

impl ServerState {
    pub fn new(id: ServerId, name: String, owner_id: UserId) -> Self {
        let mut member_user_ids = HashSet::new();
        member_user_ids.insert(owner_id.clone());
        Self {
            id,
            name,
            owner_id,
            description: None,
            channel_ids: HashSet::new(),
            member_user_ids,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            owner_id: self.owner_id.clone(),
            description: self.description.clone(),
            member_count: self.member_user_ids.len(),
        }
    }
}
