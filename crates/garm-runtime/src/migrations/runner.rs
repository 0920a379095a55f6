//! Migration runner with advisory-lock serialization.
//!
//! Only one garm process runs migrations at a time; a second process
//! starting concurrently blocks on `pg_advisory_lock` until the first
//! finishes rather than racing it.

use std::collections::HashSet;
use std::path::Path;

use garm_core::error::{Error, Result};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// Arbitrary but fixed advisory lock id, derived from "GARM" ascii bytes.
const MIGRATION_LOCK_ID: i64 = 0x4741524D;

#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: sql.into(),
            down_sql: None,
        }
    }

    pub fn with_down(name: impl Into<String>, up_sql: impl Into<String>, down_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: Some(down_sql.into()),
        }
    }

    /// Parse migration content that may contain a `-- @up` / `-- @down`
    /// marker pair.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let name = name.into();
        let (up_sql, down_sql) = parse_migration_content(content);
        Self { name, up_sql, down_sql }
    }
}

fn parse_migration_content(content: &str) -> (String, Option<String>) {
    let down_markers = ["-- @down", "--@down", "-- @DOWN", "--@DOWN"];

    for marker in down_markers {
        if let Some(idx) = content.find(marker) {
            let up_part = &content[..idx];
            let down_part = &content[idx + marker.len()..];

            let up_sql = strip_up_marker(up_part).trim().to_string();
            let down_sql = down_part.trim().to_string();

            return if down_sql.is_empty() {
                (up_sql, None)
            } else {
                (up_sql, Some(down_sql))
            };
        }
    }

    (strip_up_marker(content).trim().to_string(), None)
}

fn strip_up_marker(s: &str) -> String {
    s.replace("-- @up", "")
        .replace("--@up", "")
        .replace("-- @UP", "")
        .replace("--@UP", "")
}

/// Applies the built-in garm schema migration followed by any
/// operator-supplied migrations, tracked in `garm_schema_migrations`.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run(&self, user_migrations: Vec<Migration>) -> Result<()> {
        self.acquire_lock().await?;
        let result = self.run_migrations_inner(user_migrations).await;
        if let Err(e) = self.release_lock().await {
            warn!("failed to release migration lock: {e}");
        }
        result
    }

    async fn run_migrations_inner(&self, user_migrations: Vec<Migration>) -> Result<()> {
        self.ensure_migrations_table().await?;
        let applied = self.get_applied_migrations().await?;
        debug!(?applied, "already-applied migrations");

        for migration in super::builtin::get_builtin_migrations() {
            if !applied.contains(&migration.name) {
                self.apply_migration(&migration).await?;
            }
        }
        for migration in user_migrations {
            if !applied.contains(&migration.name) {
                self.apply_migration(&migration).await?;
            }
        }
        Ok(())
    }

    async fn acquire_lock(&self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_lock(&self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS garm_schema_migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) UNIQUE NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                down_sql TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM garm_schema_migrations")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<()> {
        info!(name = %migration.name, "applying migration");

        for statement in split_sql_statements(&migration.up_sql) {
            let statement = statement.trim();
            if statement.is_empty() || statement.lines().all(|l| {
                let l = l.trim();
                l.is_empty() || l.starts_with("--")
            }) {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await.map_err(|e| {
                Error::Internal(format!("failed to apply migration '{}': {e}", migration.name))
            })?;
        }

        sqlx::query("INSERT INTO garm_schema_migrations (name, down_sql) VALUES ($1, $2)")
            .bind(&migration.name)
            .bind(&migration.down_sql)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn status(&self, available: &[Migration]) -> Result<MigrationStatus> {
        self.ensure_migrations_table().await?;
        let applied = self.get_applied_migrations().await?;

        let rows: Vec<(String, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as("SELECT name, applied_at FROM garm_schema_migrations ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        let pending = available
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .map(|m| m.name.clone())
            .collect();

        Ok(MigrationStatus {
            applied: rows
                .into_iter()
                .map(|(name, applied_at)| AppliedMigration { name, applied_at })
                .collect(),
            pending,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
}

/// Splits SQL into statements on top-level `;`, respecting dollar-quoted
/// strings so a PL/pgSQL function body isn't split mid-definition.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_quote = false;
    let mut dollar_tag = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if c == '$' {
            let mut potential_tag = String::from("$");
            while let Some(&next_c) = chars.peek() {
                if next_c == '$' {
                    potential_tag.push(chars.next().unwrap());
                    current.push('$');
                    break;
                } else if next_c.is_alphanumeric() || next_c == '_' {
                    potential_tag.push(chars.next().unwrap());
                    current.push(potential_tag.chars().last().unwrap());
                } else {
                    break;
                }
            }

            if potential_tag.len() >= 2 && potential_tag.ends_with('$') {
                if in_dollar_quote && potential_tag == dollar_tag {
                    in_dollar_quote = false;
                    dollar_tag.clear();
                } else if !in_dollar_quote {
                    in_dollar_quote = true;
                    dollar_tag = potential_tag;
                }
            }
        }

        if c == ';' && !in_dollar_quote {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    let stmt = current.trim().trim_end_matches(';').trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }
    statements
}

/// Loads operator-supplied migrations from a directory, named like
/// `0001_add_foo.sql`, sorted and applied in filename order.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "sql").unwrap_or(false) {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::BadRequest(format!("invalid migration filename: {path:?}")))?
                .to_string();
            let content = std::fs::read_to_string(&path)?;
            migrations.push(Migration::parse(name, &content));
        }
    }
    migrations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_from_empty_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_migrations_from_dir(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn load_from_nonexistent_dir_is_empty() {
        assert!(load_migrations_from_dir(Path::new("/nonexistent/path")).unwrap().is_empty());
    }

    #[test]
    fn loads_sorted_by_filename() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0002_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("0001_first.sql"), "SELECT 1;").unwrap();

        let migrations = load_migrations_from_dir(dir.path()).unwrap();
        assert_eq!(migrations[0].name, "0001_first");
        assert_eq!(migrations[1].name, "0002_second");
    }

    #[test]
    fn parse_splits_up_and_down() {
        let content = "-- @up\nCREATE TABLE t (id INT);\n\n-- @down\nDROP TABLE t;";
        let m = Migration::parse("0001_t", content);
        assert!(m.up_sql.contains("CREATE TABLE t"));
        assert!(!m.up_sql.contains("@up"));
        assert_eq!(m.down_sql, Some("DROP TABLE t;".to_string()));
    }

    #[test]
    fn split_respects_dollar_quoted_function_bodies() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND;\n$$ LANGUAGE plpgsql;\n\nSELECT 3;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[1].contains("SELECT 3"));
    }
}
