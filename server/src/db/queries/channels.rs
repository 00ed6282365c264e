use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::db::models::ChannelRow;

/// Create a channel in a server.
pub async fn create_channel<'e>(
    exec: impl SqliteExecutor<'e>,
    id: &str,
    server_id: &str,
    name: &str,
    kind: &str,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channels (id, server_id, name, kind, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(server_id)
    .bind(name)
    .bind(kind)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

/// List every channel, for loading the registry at startup.
pub async fn list_all_channels<'e>(
    exec: impl SqliteExecutor<'e>,
) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT id, server_id, name, kind, last_message_id, created_at FROM channels ORDER BY name",
    )
    .fetch_all(exec)
    .await
}

/// Delete a channel by ID. Returns the number of rows removed.
pub async fn delete_channel<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every channel of a server.
pub async fn delete_server_channels<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM channels WHERE server_id = ?")
        .bind(server_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// The channel's high-water mark, or `None` if the channel doesn't exist.
pub async fn get_last_message_id<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT last_message_id FROM channels WHERE id = ?")
        .bind(channel_id)
        .fetch_optional(exec)
        .await
}

/// Raise the high-water mark. Never lowers it. Returns the number of rows matched.
pub async fn advance_last_message_id<'e>(
    exec: impl SqliteExecutor<'e>,
    channel_id: &str,
    id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE channels SET last_message_id = MAX(last_message_id, ?) WHERE id = ?",
    )
    .bind(id)
    .bind(channel_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}
