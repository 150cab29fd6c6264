//! Schema migrations, tracked with `PRAGMA user_version`

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

const MIGRATIONS: &[&str] = &[
    // 1: skills, tags, full-text index
    r"
    CREATE TABLE IF NOT EXISTS skills (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        summary TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL DEFAULT '',
        tag_text TEXT NOT NULL DEFAULT '',
        embedding_id TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_skills_embedding_id ON skills(embedding_id);

    CREATE TABLE IF NOT EXISTS skill_tags (
        skill_id TEXT NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        PRIMARY KEY (skill_id, slug)
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS skills_fts USING fts5(
        title,
        description,
        summary,
        content,
        tag_text,
        content = 'skills',
        content_rowid = 'rowid',
        tokenize = 'porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS skills_fts_insert AFTER INSERT ON skills BEGIN
        INSERT INTO skills_fts(rowid, title, description, summary, content, tag_text)
        VALUES (new.rowid, new.title, new.description, new.summary, new.content, new.tag_text);
    END;

    CREATE TRIGGER IF NOT EXISTS skills_fts_delete AFTER DELETE ON skills BEGIN
        INSERT INTO skills_fts(skills_fts, rowid, title, description, summary, content, tag_text)
        VALUES ('delete', old.rowid, old.title, old.description, old.summary, old.content, old.tag_text);
    END;

    CREATE TRIGGER IF NOT EXISTS skills_fts_update
    AFTER UPDATE OF title, description, summary, content, tag_text ON skills BEGIN
        INSERT INTO skills_fts(skills_fts, rowid, title, description, summary, content, tag_text)
        VALUES ('delete', old.rowid, old.title, old.description, old.summary, old.content, old.tag_text);
        INSERT INTO skills_fts(rowid, title, description, summary, content, tag_text)
        VALUES (new.rowid, new.title, new.description, new.summary, new.content, new.tag_text);
    END;
    ",
];

/// Current schema version after all migrations.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Apply outstanding migrations and return the resulting schema version.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = idx as u32 + 1;
        debug!(version, "applying migration");
        conn.execute_batch(&format!(
            "BEGIN;\n{sql}\nPRAGMA user_version = {version};\nCOMMIT;"
        ))?;
    }

    Ok(current.max(SCHEMA_VERSION))
}
