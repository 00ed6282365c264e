use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::db::models::MessageRow;

const MESSAGE_COLUMNS: &str = "channel_id, id, author_id, content, created_at, edited";

/// Insert a new channel message.
pub async fn insert_message<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    id: i64,
    author_id: &str,
    content: &str,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (channel_id, id, author_id, content, created_at, edited) \
         VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(channel_id)
    .bind(id)
    .bind(author_id)
    .bind(content)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

/// Messages after a cursor, oldest first.
pub async fn fetch_since<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    after: i64,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE channel_id = ? AND id > ? \
         ORDER BY id ASC \
         LIMIT ?"
    ))
    .bind(channel_id)
    .bind(after)
    .bind(limit)
    .fetch_all(exec)
    .await
}

pub async fn get_message<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    id: i64,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = ? AND id = ?"
    ))
    .bind(channel_id)
    .bind(id)
    .fetch_optional(exec)
    .await
}

/// Replace content and flag the message as edited. Returns the updated row.
pub async fn update_content<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    id: i64,
    content: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "UPDATE messages SET content = ?, edited = 1 \
         WHERE channel_id = ? AND id = ? \
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(content)
    .bind(channel_id)
    .bind(id)
    .fetch_optional(exec)
    .await
}

/// Delete one message. Returns the number of rows removed.
pub async fn delete_message<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages WHERE channel_id = ? AND id = ?")
        .bind(channel_id)
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every message in a channel.
pub async fn delete_channel_messages<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM messages WHERE channel_id = ?")
        .bind(channel_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Delete every message in every channel of a server.
pub async fn delete_server_messages<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM messages WHERE channel_id IN (SELECT id FROM channels WHERE server_id = ?)",
    )
    .bind(server_id)
    .execute(exec)
    .await?;
    Ok(())
}
