//! SQLite database layer

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::core::{Skill, Tag, content_hash};
use crate::error::{Result, SiftError};
use crate::storage::{SkillStore, StoreStats, migrations};

/// Column weights for `bm25()`: title, description, summary, content, tags.
const BM25_WEIGHTS: &str = "10.0, 4.0, 3.0, 1.0, 6.0";

const SKILL_COLUMNS: &str = "s.id, s.title, s.description, s.summary, s.content, s.embedding_id";

/// SQLite database wrapper for the skill store
pub struct Database {
    conn: Mutex<Connection>,
    schema_version: u32,
}

impl Database {
    /// Open database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::configure_pragmas(&conn)?;
        let schema_version = migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            schema_version,
        })
    }

    /// Current schema version after migrations.
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Run a closure against the locked connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    /// Insert or replace a skill and its tags.
    ///
    /// The stored `embedding_id` is kept only when it still equals the
    /// content hash of the incoming fields; otherwise the skill goes back to
    /// pending. Returns the skill as stored.
    pub fn save_skill(&self, skill: &Skill) -> Result<Skill> {
        if skill.id.trim().is_empty() {
            return Err(SiftError::InvalidArgument("skill id is empty".to_string()));
        }

        let mut stored = skill.clone();
        if !stored.embedding_id.is_empty() && stored.embedding_id != content_hash(&stored) {
            debug!(skill_id = %stored.id, "content changed, embedding invalidated");
            stored.embedding_id.clear();
        }

        let now = Utc::now().to_rfc3339();
        let tag_text = stored
            .tags
            .iter()
            .map(|tag| tag.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO skills
                (id, title, description, summary, content, tag_text, embedding_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                summary = excluded.summary,
                content = excluded.content,
                tag_text = excluded.tag_text,
                embedding_id = excluded.embedding_id,
                updated_at = excluded.updated_at",
            params![
                stored.id,
                stored.title,
                stored.description,
                stored.summary,
                stored.content,
                tag_text,
                stored.embedding_id,
                now,
            ],
        )?;
        tx.execute("DELETE FROM skill_tags WHERE skill_id = ?1", [&stored.id])?;
        for tag in &stored.tags {
            tx.execute(
                "INSERT OR IGNORE INTO skill_tags (skill_id, name, slug) VALUES (?1, ?2, ?3)",
                params![stored.id, tag.name, tag.slug],
            )?;
        }
        tx.commit()?;

        Ok(stored)
    }

    /// Delete a skill. Returns `false` when it did not exist.
    pub fn delete_skill(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM skills WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    /// All skills ordered by title.
    pub fn list_skills(&self, limit: usize) -> Result<Vec<Skill>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SKILL_COLUMNS} FROM skills s ORDER BY s.title LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit_param(Some(limit))], skill_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        with_tags(&conn, rows)
    }
}

impl SkillStore for Database {
    fn count_pending_embeddings(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM skills WHERE embedding_id = ''",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn get_pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Skill>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SKILL_COLUMNS} FROM skills s
             WHERE s.embedding_id = ''
             ORDER BY s.created_at, s.rowid
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit_param(limit)], skill_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        with_tags(&conn, rows)
    }

    fn set_embedding_id(&self, id: &str, hash: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current = load_skill(&tx, id)?;
        let updated = match current {
            Some(skill) if content_hash(&skill) == hash => {
                tx.execute(
                    "UPDATE skills SET embedding_id = ?2 WHERE id = ?1",
                    params![id, hash],
                )? > 0
            }
            Some(_) => {
                debug!(skill_id = %id, "content changed during indexing, left pending");
                false
            }
            None => false,
        };
        tx.commit()?;
        Ok(updated)
    }

    fn get_skill(&self, id: &str) -> Result<Option<Skill>> {
        let conn = self.conn.lock();
        load_skill(&conn, id)
    }

    fn search_ranked(&self, query: &str, limit: usize) -> Result<Vec<Skill>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SKILL_COLUMNS} FROM skills_fts
             JOIN skills s ON s.rowid = skills_fts.rowid
             WHERE skills_fts MATCH ?1
             ORDER BY bm25(skills_fts, {BM25_WEIGHTS})
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![fts_query, limit_param(Some(limit))], skill_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        with_tags(&conn, rows)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let (total, pending, last_updated): (i64, i64, Option<String>) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN embedding_id = '' THEN 1 ELSE 0 END), 0),
                    MAX(updated_at)
             FROM skills",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            total_skills: usize::try_from(total).unwrap_or(0),
            pending: usize::try_from(pending).unwrap_or(0),
            last_updated: last_updated
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        })
    }
}

fn load_skill(conn: &Connection, id: &str) -> Result<Option<Skill>> {
    let skill = conn
        .query_row(
            &format!("SELECT {SKILL_COLUMNS} FROM skills s WHERE s.id = ?1"),
            [id],
            skill_from_row,
        )
        .optional()?;
    match skill {
        Some(mut skill) => {
            skill.tags = load_tags(conn, &skill.id)?;
            Ok(Some(skill))
        }
        None => Ok(None),
    }
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<Skill> {
    Ok(Skill {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        summary: row.get(3)?,
        content: row.get(4)?,
        tags: Vec::new(),
        embedding_id: row.get(5)?,
    })
}

fn load_tags(conn: &Connection, skill_id: &str) -> Result<Vec<Tag>> {
    let mut stmt =
        conn.prepare_cached("SELECT name, slug FROM skill_tags WHERE skill_id = ?1 ORDER BY rowid")?;
    let tags = stmt
        .query_map([skill_id], |row| {
            Ok(Tag {
                name: row.get(0)?,
                slug: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

fn with_tags(conn: &Connection, mut skills: Vec<Skill>) -> Result<Vec<Skill>> {
    for skill in &mut skills {
        skill.tags = load_tags(conn, &skill.id)?;
    }
    Ok(skills)
}

/// SQLite treats a negative LIMIT as unbounded.
fn limit_param(limit: Option<usize>) -> i64 {
    limit.and_then(|n| i64::try_from(n).ok()).unwrap_or(-1)
}

/// Turn free text into an FTS5 expression of quoted terms joined by OR, so
/// user input never reaches the FTS query parser as syntax.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| term.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
