//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the
//! schema from version N to N+1 inside one transaction.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            info!(version, "applying schema migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, crate::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Uniqueness rules live here, not in application code: the live-grant
/// triple is a partial unique index (soft-deleted rows release the slot),
/// and the (subject, grant) pair is a full unique constraint so that
/// concurrent assigns cannot create duplicate rows.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Organizational units ("sectors") that own permission grants
        CREATE TABLE sectors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER                -- soft delete
        );

        -- Authenticated actors
        CREATE TABLE subjects (
            id INTEGER PRIMARY KEY,
            handle TEXT NOT NULL UNIQUE,      -- email-like login handle
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            sector_id INTEGER REFERENCES sectors(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        -- Permission grants owned by a sector
        CREATE TABLE grants (
            id INTEGER PRIMARY KEY,
            sector_id INTEGER NOT NULL REFERENCES sectors(id),
            resource TEXT NOT NULL,
            action TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        -- At most one LIVE grant per (sector, resource, action)
        CREATE UNIQUE INDEX uq_grants_live
            ON grants(sector_id, resource, action)
            WHERE deleted_at IS NULL;

        -- Direct subject-to-grant links
        CREATE TABLE assignments (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER NOT NULL REFERENCES subjects(id),
            grant_id INTEGER NOT NULL REFERENCES grants(id),
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,

            UNIQUE(subject_id, grant_id)
        );

        -- Append-only audit trail; rows are never updated or deleted
        CREATE TABLE audit_records (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER,               -- NULL for system actions
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id INTEGER,
            detail TEXT NOT NULL,             -- JSON
            origin TEXT,
            created_at INTEGER NOT NULL
        );

        -- Generic business entities written by mutation handlers
        CREATE TABLE documents (
            id INTEGER PRIMARY KEY,
            entity_type TEXT NOT NULL,
            data TEXT NOT NULL,               -- JSON
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        -- Indexes for common queries
        CREATE INDEX idx_subjects_sector ON subjects(sector_id);
        CREATE INDEX idx_grants_sector ON grants(sector_id);
        CREATE INDEX idx_assignments_subject ON assignments(subject_id);
        CREATE INDEX idx_audit_subject ON audit_records(subject_id);
        CREATE INDEX idx_audit_entity_type ON audit_records(entity_type);
        CREATE INDEX idx_audit_created ON audit_records(created_at);
        CREATE INDEX idx_documents_type ON documents(entity_type);
        "#,
    )?;

    Ok(())
}
