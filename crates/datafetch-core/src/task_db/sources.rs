//! Data source CRUD on `data_sources`.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_timestamp, TaskDb};
use super::types::{Credentials, DataSource, NewDataSource, SourceId, SourcePatch};

const SOURCE_COLUMNS: &str =
    "id, name, url, description, protocol, auth_required, username, password, is_active";

fn row_to_source(row: &SqliteRow) -> Result<DataSource> {
    let protocol: String = row.get("protocol");
    let username: Option<String> = row.get("username");
    let password: Option<String> = row.get("password");
    Ok(DataSource {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        description: row.get("description"),
        protocol: protocol.parse()?,
        auth_required: row.get("auth_required"),
        credentials: username.map(|username| Credentials { username, password }),
        active: row.get("is_active"),
    })
}

impl TaskDb {
    /// Register a data source. `auth_required` follows the presence of credentials.
    pub async fn add_source(&self, source: &NewDataSource) -> Result<SourceId> {
        let (username, password) = match &source.credentials {
            Some(c) => (Some(c.username.as_str()), c.password.as_deref()),
            None => (None, None),
        };
        let row_id = sqlx::query(
            r#"
            INSERT INTO data_sources (
                name, url, description, protocol, auth_required,
                username, password, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
            "#,
        )
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.description)
        .bind(source.protocol.as_str())
        .bind(source.credentials.is_some())
        .bind(username)
        .bind(password)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(row_id)
    }

    pub async fn get_source(&self, id: SourceId) -> Result<Option<DataSource>> {
        let sql = format!("SELECT {} FROM data_sources WHERE id = ?1", SOURCE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    pub async fn list_sources(&self) -> Result<Vec<DataSource>> {
        let sql = format!("SELECT {} FROM data_sources ORDER BY id ASC", SOURCE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_source).collect()
    }

    /// Apply `patch` to a source in one transaction. Returns false if it does
    /// not exist. A duplicate name is rejected by the unique index.
    pub async fn update_source(&self, id: SourceId, patch: &SourcePatch) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {} FROM data_sources WHERE id = ?1", SOURCE_COLUMNS);
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(false);
        };
        let mut source = row_to_source(&row)?;
        patch.apply(&mut source);
        let (username, password) = match &source.credentials {
            Some(c) => (Some(c.username.as_str()), c.password.as_deref()),
            None => (None, None),
        };
        sqlx::query(
            r#"
            UPDATE data_sources
            SET name = ?1, url = ?2, description = ?3, protocol = ?4,
                auth_required = ?5, username = ?6, password = ?7
            WHERE id = ?8
            "#,
        )
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.description)
        .bind(source.protocol.as_str())
        .bind(source.auth_required)
        .bind(username)
        .bind(password)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Enable or disable a source. Returns false if it does not exist.
    pub async fn set_source_active(&self, id: SourceId, active: bool) -> Result<bool> {
        let r = sqlx::query("UPDATE data_sources SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Delete a source. Tasks still referencing it fail at dispatch.
    pub async fn remove_source(&self, id: SourceId) -> Result<bool> {
        let r = sqlx::query("DELETE FROM data_sources WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }
}
