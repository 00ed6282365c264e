use sqlx::SqliteExecutor;

use crate::db::models::{ServerMemberRow, ServerRow};

/// Create a new server row. Membership is recorded separately.
pub async fn create_server<'e>(
    exec: impl SqliteExecutor<'e>,
    id: &str,
    name: &str,
    owner_id: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO servers (id, name, owner_id, description) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(owner_id)
        .bind(description)
        .execute(exec)
        .await?;
    Ok(())
}

/// List all servers.
pub async fn list_all_servers<'e>(
    exec: impl SqliteExecutor<'e>,
) -> Result<Vec<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>(
        "SELECT id, name, owner_id, description FROM servers ORDER BY name",
    )
        .fetch_all(exec)
        .await
}

/// Delete a server row. Returns the number of rows removed.
pub async fn delete_server<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM servers WHERE id = ?")
        .bind(server_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Add a user to a server. No-op if already a member.
pub async fn add_server_member<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO server_members (server_id, user_id) VALUES (?, ?)")
        .bind(server_id)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Remove a user from a server. No-op if not a member.
pub async fn remove_server_member<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM server_members WHERE server_id = ? AND user_id = ?")
        .bind(server_id)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Remove every membership of a server.
pub async fn remove_all_members<'e>(
    exec: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM server_members WHERE server_id = ?")
        .bind(server_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Every membership row, for loading the registry at startup.
pub async fn list_all_members<'e>(
    exec: impl SqliteExecutor<'e>,
) -> Result<Vec<ServerMemberRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerMemberRow>(
        "SELECT server_id, user_id FROM server_members ORDER BY joined_at",
    )
    .fetch_all(exec)
    .await
}
