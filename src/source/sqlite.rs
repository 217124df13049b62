//! SQLite-backed [`SourceStore`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{Page, SourceStore};
use crate::error::{CmdexError, Result};
use crate::models::{Command, CommandKey, DocSection, Example, Parameter, Version, VersionMapping};

pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn source_err(e: sqlx::Error) -> CmdexError {
    CmdexError::Source(e.to_string())
}

fn version_col(row: &SqliteRow, col: &str) -> Result<Version> {
    let raw: i64 = row.get(col);
    u8::try_from(raw)
        .map_err(|_| format!("invalid version {}", raw))
        .and_then(Version::try_from)
        .map_err(CmdexError::Source)
}

fn command_from_row(row: &SqliteRow) -> Result<Command> {
    Ok(Command {
        id: row.get("id"),
        version: version_col(row, "version")?,
        name: row.get("name"),
        synopsis: row.get("synopsis"),
        description: row.get("description"),
        syntax: row.get("syntax"),
        is_deprecated: row.get::<i64, _>("is_deprecated") != 0,
    })
}

#[async_trait]
impl SourceStore for SqliteSource {
    async fn list_commands(&self, version: Version, page: Page) -> Result<Vec<Command>> {
        let rows = sqlx::query(
            r#"
            SELECT version, id, name, synopsis, description, syntax, is_deprecated
            FROM commands
            WHERE version = ?
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(version.as_u8() as i64)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(source_err)?;

        rows.iter().map(command_from_row).collect()
    }

    async fn list_parameters(&self, command: CommandKey) -> Result<Vec<Parameter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, command_id, name, type_name, description, is_required
            FROM parameters
            WHERE command_version = ? AND command_id = ?
            ORDER BY id
            "#,
        )
        .bind(command.version.as_u8() as i64)
        .bind(command.id)
        .fetch_all(&self.pool)
        .await
        .map_err(source_err)?;

        Ok(rows
            .iter()
            .map(|row| Parameter {
                id: row.get("id"),
                command_id: row.get("command_id"),
                name: row.get("name"),
                type_name: row.get("type_name"),
                description: row.get("description"),
                is_required: row.get::<i64, _>("is_required") != 0,
            })
            .collect())
    }

    async fn list_examples(&self, command: CommandKey) -> Result<Vec<Example>> {
        let rows = sqlx::query(
            r#"
            SELECT id, command_id, title, code, description
            FROM examples
            WHERE command_version = ? AND command_id = ?
            ORDER BY id
            "#,
        )
        .bind(command.version.as_u8() as i64)
        .bind(command.id)
        .fetch_all(&self.pool)
        .await
        .map_err(source_err)?;

        Ok(rows
            .iter()
            .map(|row| Example {
                id: row.get("id"),
                command_id: row.get("command_id"),
                title: row.get("title"),
                code: row.get("code"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn list_doc_sections(&self, page: Page) -> Result<Vec<DocSection>> {
        let rows = sqlx::query(
            r#"
            SELECT path, heading, body, version
            FROM doc_sections
            ORDER BY path, heading
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(source_err)?;

        rows.iter()
            .map(|row| {
                let version = match row.get::<Option<i64>, _>("version") {
                    Some(_) => Some(version_col(row, "version")?),
                    None => None,
                };
                Ok(DocSection {
                    path: row.get("path"),
                    heading: row.get("heading"),
                    body: row.get("body"),
                    version,
                })
            })
            .collect()
    }

    async fn list_version_mappings(&self) -> Result<Vec<VersionMapping>> {
        let rows = sqlx::query(
            "SELECT v3_command_id, v4_command_id FROM version_mappings ORDER BY v3_command_id, v4_command_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(source_err)?;

        Ok(rows
            .iter()
            .map(|row| VersionMapping {
                v3_command_id: row.get("v3_command_id"),
                v4_command_id: row.get("v4_command_id"),
            })
            .collect())
    }
}
