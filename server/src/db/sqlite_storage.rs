use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::error::ErrorKind;
use tracing::debug;

use crate::db::models::ChannelRow;
use crate::db::queries::{channels, messages, servers};
use crate::engine::channel::ChannelState;
use crate::engine::events::{Message, MessageId};
use crate::engine::server::ServerState;
use crate::engine::storage::Storage;
use crate::error::StorageError;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Storage engine backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Map a sqlx error onto the storage taxonomy. Lock contention and I/O are
/// transient; constraint violations are not.
pub fn classify(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StorageError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(ref db) => {
            let primary_code = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            match db.kind() {
                ErrorKind::UniqueViolation => StorageError::Conflict(db.message().to_string()),
                ErrorKind::ForeignKeyViolation => StorageError::NotFound,
                _ if matches!(primary_code, Some(SQLITE_BUSY | SQLITE_LOCKED)) => {
                    StorageError::Unavailable(db.message().to_string())
                }
                _ => StorageError::Backend(err.to_string()),
            }
        }
        other => StorageError::Backend(other.to_string()),
    }
}

fn to_db_id(id: MessageId) -> Result<i64, StorageError> {
    i64::try_from(id).map_err(|_| StorageError::Backend(format!("message id {id} out of range")))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load_servers(&self) -> Result<Vec<ServerState>, StorageError> {
        let rows = servers::list_all_servers(&self.pool).await.map_err(classify)?;
        let members = servers::list_all_members(&self.pool).await.map_err(classify)?;

        let mut by_id: HashMap<String, ServerState> = rows
            .into_iter()
            .map(|row| {
                let state = ServerState::new(row.id.clone(), row.name, row.owner_id)
                    .with_description(row.description);
                (row.id, state)
            })
            .collect();
        for m in members {
            if let Some(server) = by_id.get_mut(&m.server_id) {
                server.member_user_ids.insert(m.user_id);
            }
        }
        Ok(by_id.into_values().collect())
    }

    async fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError> {
        let rows = channels::list_all_channels(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(ChannelRow::into_state).collect())
    }

    async fn insert_server(&self, server: &ServerState) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        servers::create_server(
            &mut *tx,
            &server.id,
            &server.name,
            &server.owner_id,
            server.description.as_deref(),
        )
        .await
        .map_err(classify)?;
        servers::add_server_member(&mut *tx, &server.id, &server.owner_id)
            .await
            .map_err(classify)?;
        for user_id in &server.member_user_ids {
            servers::add_server_member(&mut *tx, &server.id, user_id)
                .await
                .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn delete_server(&self, server_id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        messages::delete_server_messages(&mut *tx, server_id)
            .await
            .map_err(classify)?;
        channels::delete_server_channels(&mut *tx, server_id)
            .await
            .map_err(classify)?;
        servers::remove_all_members(&mut *tx, server_id)
            .await
            .map_err(classify)?;
        servers::delete_server(&mut *tx, server_id)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        debug!(%server_id, "server rows deleted");
        Ok(())
    }

    async fn add_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError> {
        servers::add_server_member(&self.pool, server_id, user_id)
            .await
            .map_err(classify)
    }

    async fn remove_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError> {
        servers::remove_server_member(&self.pool, server_id, user_id)
            .await
            .map_err(classify)
    }

    async fn insert_channel(&self, channel: &ChannelState) -> Result<(), StorageError> {
        channels::create_channel(
            &self.pool,
            &channel.id,
            &channel.server_id,
            &channel.name,
            channel.kind.as_str(),
            channel.created_at,
        )
        .await
        .map_err(classify)
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        messages::delete_channel_messages(&mut *tx, channel_id)
            .await
            .map_err(classify)?;
        channels::delete_channel(&mut *tx, channel_id)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn last_message_id(&self, channel_id: &str) -> Result<MessageId, StorageError> {
        let last = channels::get_last_message_id(&self.pool, channel_id)
            .await
            .map_err(classify)?
            .unwrap_or(0);
        Ok(last.max(0) as MessageId)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        let id = to_db_id(message.id)?;
        let mut tx = self.pool.begin().await.map_err(classify)?;
        messages::insert_message(
            &mut *tx,
            &message.channel_id,
            id,
            &message.author_id,
            &message.content,
            message.created_at,
        )
        .await
        .map_err(classify)?;
        channels::advance_last_message_id(&mut *tx, &message.channel_id, id)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn list_messages_since(
        &self,
        channel_id: &str,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = messages::fetch_since(&self.pool, channel_id, after, limit)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn get_message(
        &self,
        channel_id: &str,
        id: MessageId,
    ) -> Result<Option<Message>, StorageError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        let row = messages::get_message(&self.pool, channel_id, id)
            .await
            .map_err(classify)?;
        Ok(row.map(Message::from))
    }

    async fn update_message_content(
        &self,
        channel_id: &str,
        id: MessageId,
        content: &str,
    ) -> Result<Message, StorageError> {
        let id = i64::try_from(id).map_err(|_| StorageError::NotFound)?;
        messages::update_content(&self.pool, channel_id, id, content)
            .await
            .map_err(classify)?
            .map(Message::from)
            .ok_or(StorageError::NotFound)
    }

    async fn delete_message(&self, channel_id: &str, id: MessageId) -> Result<(), StorageError> {
        let id = i64::try_from(id).map_err(|_| StorageError::NotFound)?;
        let removed = messages::delete_message(&self.pool, channel_id, id)
            .await
            .map_err(classify)?;
        if removed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
