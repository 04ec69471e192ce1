//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the access engine. It uses
//! rusqlite with bundled SQLite, wrapped in async via
//! `tokio::spawn_blocking`. The connection sits behind a mutex, so store
//! operations are serialized; each operation that touches more than one
//! row runs inside its own transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use civica_core::{
    Action, AssignmentId, AuditDraft, AuditFilter, AuditId, AuditRecord, Document, DocumentId,
    GrantDraft, GrantId, Group, GroupDraft, GroupId, PermissionGrant, Resource, Subject,
    SubjectDraft, SubjectGrantAssignment, SubjectId, SubjectPatch,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::now_millis;
use crate::traits::{
    AssignOutcome, GrantSource, MutationFn, MutationOutput, Store, StoreTxn, DEFAULT_AUDIT_LIMIT,
};

/// SQLite-based store implementation.
///
/// Thread-safe via an internal mutex. All operations run under
/// `spawn_blocking` to avoid stalling the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(&path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on a blocking thread.
    async fn on_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

const SUBJECT_COLUMNS: &str =
    "id, handle, display_name, active, sector_id, created_at, updated_at, deleted_at";
const SECTOR_COLUMNS: &str =
    "id, name, description, active, created_at, updated_at, deleted_at";
const GRANT_COLUMNS: &str =
    "id, sector_id, resource, action, active, created_at, updated_at, deleted_at";
const ASSIGNMENT_COLUMNS: &str = "id, subject_id, grant_id, active, created_at";
const AUDIT_COLUMNS: &str =
    "id, subject_id, action, entity_type, entity_id, detail, origin, created_at";
const DOCUMENT_COLUMNS: &str = "id, entity_type, data, created_at, updated_at, deleted_at";

fn row_to_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: SubjectId(row.get(0)?),
        handle: row.get(1)?,
        display_name: row.get(2)?,
        active: row.get(3)?,
        group_id: row.get::<_, Option<i64>>(4)?.map(GroupId),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        active: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionGrant> {
    let resource: String = row.get(2)?;
    let action: String = row.get(3)?;
    Ok(PermissionGrant {
        id: GrantId(row.get(0)?),
        group_id: GroupId(row.get(1)?),
        resource: Resource::new(resource).map_err(|e| conversion_error(2, e))?,
        action: Action::new(action).map_err(|e| conversion_error(3, e))?,
        active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubjectGrantAssignment> {
    Ok(SubjectGrantAssignment {
        id: AssignmentId(row.get(0)?),
        subject_id: SubjectId(row.get(1)?),
        grant_id: GrantId(row.get(2)?),
        active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRecord> {
    let detail: String = row.get(5)?;
    Ok(AuditRecord {
        id: AuditId(row.get(0)?),
        subject_id: row.get::<_, Option<i64>>(1)?.map(SubjectId),
        action: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        detail: serde_json::from_str(&detail).map_err(|e| conversion_error(5, e))?,
        origin: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let data: String = row.get(2)?;
    Ok(Document {
        id: DocumentId(row.get(0)?),
        entity_type: row.get(1)?,
        data: serde_json::from_str(&data).map_err(|e| conversion_error(2, e))?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared row operations
//
// These run against a plain `&Connection` so that the same code serves
// both the Store methods (which open their own transactions) and the
// `StoreTxn` surface handed to coordinated mutations.
// ─────────────────────────────────────────────────────────────────────────────

// The centralized live filter; every lookup appends it.
const LIVE: &str = "active = 1 AND deleted_at IS NULL";

fn find_subject_on(conn: &Connection, id: SubjectId) -> Result<Option<Subject>> {
    conn.query_row(
        &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ?1 AND {LIVE}"),
        params![id.get()],
        row_to_subject,
    )
    .optional()
    .map_err(StoreError::from)
}

fn find_group_on(conn: &Connection, id: GroupId) -> Result<Option<Group>> {
    conn.query_row(
        &format!("SELECT {SECTOR_COLUMNS} FROM sectors WHERE id = ?1 AND {LIVE}"),
        params![id.get()],
        row_to_group,
    )
    .optional()
    .map_err(StoreError::from)
}

fn find_grant_on(conn: &Connection, id: GrantId) -> Result<Option<PermissionGrant>> {
    conn.query_row(
        &format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = ?1 AND {LIVE}"),
        params![id.get()],
        row_to_grant,
    )
    .optional()
    .map_err(StoreError::from)
}

fn find_direct_grant_on(
    conn: &Connection,
    subject_id: SubjectId,
    resource: &Resource,
    action: &Action,
) -> Result<Option<PermissionGrant>> {
    conn.query_row(
        &format!(
            "SELECT g.{} FROM grants g
             JOIN assignments a ON a.grant_id = g.id
             WHERE a.subject_id = ?1 AND a.active = 1
               AND g.resource = ?2 AND g.action = ?3
               AND g.active = 1 AND g.deleted_at IS NULL",
            GRANT_COLUMNS.replace(", ", ", g.")
        ),
        params![subject_id.get(), resource.as_str(), action.as_str()],
        row_to_grant,
    )
    .optional()
    .map_err(StoreError::from)
}

fn find_group_grant_on(
    conn: &Connection,
    group_id: GroupId,
    resource: &Resource,
    action: &Action,
) -> Result<Option<PermissionGrant>> {
    conn.query_row(
        &format!(
            "SELECT {GRANT_COLUMNS} FROM grants
             WHERE sector_id = ?1 AND resource = ?2 AND action = ?3 AND {LIVE}"
        ),
        params![group_id.get(), resource.as_str(), action.as_str()],
        row_to_grant,
    )
    .optional()
    .map_err(StoreError::from)
}

fn subject_is_live(conn: &Connection, id: SubjectId) -> Result<bool> {
    let live: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM subjects WHERE id = ?1 AND {LIVE})"),
        params![id.get()],
        |row| row.get(0),
    )?;
    Ok(live)
}

fn grant_is_live(conn: &Connection, id: GrantId) -> Result<bool> {
    let live: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM grants WHERE id = ?1 AND {LIVE})"),
        params![id.get()],
        |row| row.get(0),
    )?;
    Ok(live)
}

/// Idempotent assign: a single upsert resolves concurrent duplicates at
/// the storage layer via the `UNIQUE(subject_id, grant_id)` constraint.
fn assign_on(
    conn: &Connection,
    subject_id: SubjectId,
    grant_id: GrantId,
    now: i64,
) -> Result<AssignOutcome> {
    if !subject_is_live(conn, subject_id)? {
        return Err(StoreError::NotFound(format!("subject {subject_id}")));
    }
    if !grant_is_live(conn, grant_id)? {
        return Err(StoreError::NotFound(format!("grant {grant_id}")));
    }

    let prior: Option<bool> = conn
        .query_row(
            "SELECT active FROM assignments WHERE subject_id = ?1 AND grant_id = ?2",
            params![subject_id.get(), grant_id.get()],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO assignments (subject_id, grant_id, active, created_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(subject_id, grant_id) DO UPDATE SET active = 1",
        params![subject_id.get(), grant_id.get(), now],
    )?;

    let assignment = conn.query_row(
        &format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
             WHERE subject_id = ?1 AND grant_id = ?2"
        ),
        params![subject_id.get(), grant_id.get()],
        row_to_assignment,
    )?;

    Ok(match prior {
        None => AssignOutcome::Created(assignment),
        Some(false) => AssignOutcome::Reactivated(assignment),
        Some(true) => AssignOutcome::AlreadyActive(assignment),
    })
}

fn revoke_on(conn: &Connection, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE assignments SET active = 0
         WHERE subject_id = ?1 AND grant_id = ?2 AND active = 1",
        params![subject_id.get(), grant_id.get()],
    )?;
    Ok(changed > 0)
}

fn append_audit_on(conn: &Connection, draft: &AuditDraft, now: i64) -> Result<AuditRecord> {
    let detail = serde_json::to_string(&draft.detail)
        .map_err(|e| StoreError::InvalidData(format!("detail payload: {e}")))?;

    conn.execute(
        "INSERT INTO audit_records
            (subject_id, action, entity_type, entity_id, detail, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            draft.subject_id.map(SubjectId::get),
            draft.action,
            draft.entity_type,
            draft.entity_id,
            detail,
            draft.origin,
            now,
        ],
    )?;

    Ok(AuditRecord {
        id: AuditId(conn.last_insert_rowid()),
        subject_id: draft.subject_id,
        action: draft.action.clone(),
        entity_type: draft.entity_type.clone(),
        entity_id: draft.entity_id,
        detail: draft.detail.clone(),
        origin: draft.origin.clone(),
        created_at: now,
    })
}

fn list_audit_on(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
    let mut sql =
        format!("SELECT {AUDIT_COLUMNS} FROM audit_records WHERE 1=1");
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(subject_id) = filter.subject_id {
        sql.push_str(" AND subject_id = ?");
        binds.push(subject_id.get().into());
    }
    if let Some(entity_type) = &filter.entity_type {
        sql.push_str(" AND entity_type = ?");
        binds.push(entity_type.clone().into());
    }
    if let Some(action) = &filter.action {
        sql.push_str(" AND action = ?");
        binds.push(action.clone().into());
    }
    if let Some(since) = filter.since {
        sql.push_str(" AND created_at >= ?");
        binds.push(since.into());
    }
    if let Some(until) = filter.until {
        sql.push_str(" AND created_at <= ?");
        binds.push(until.into());
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    binds.push(i64::from(filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)).into());
    binds.push(i64::from(filter.offset.unwrap_or(0)).into());

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(rusqlite::params_from_iter(binds), row_to_audit)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

fn insert_subject_on(conn: &Connection, draft: &SubjectDraft, now: i64) -> Result<Subject> {
    if let Some(group_id) = draft.group_id {
        if find_group_on(conn, group_id)?.is_none() {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
    }

    conn.execute(
        "INSERT INTO subjects (handle, display_name, active, sector_id, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?4)",
        params![
            draft.handle,
            draft.display_name,
            draft.group_id.map(GroupId::get),
            now,
        ],
    )?;

    Ok(Subject {
        id: SubjectId(conn.last_insert_rowid()),
        handle: draft.handle.clone(),
        display_name: draft.display_name.clone(),
        active: true,
        group_id: draft.group_id,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

fn update_subject_on(
    conn: &Connection,
    id: SubjectId,
    patch: &SubjectPatch,
    now: i64,
) -> Result<Subject> {
    // Inactive subjects can still be patched (e.g. reactivated), deleted
    // ones cannot.
    let mut subject = conn
        .query_row(
            &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.get()],
            row_to_subject,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))?;

    if let Some(display_name) = &patch.display_name {
        subject.display_name = display_name.clone();
    }
    if let Some(active) = patch.active {
        subject.active = active;
    }
    if let Some(group_id) = patch.group_id {
        if let Some(target) = group_id {
            if find_group_on(conn, target)?.is_none() {
                return Err(StoreError::NotFound(format!("group {target}")));
            }
        }
        subject.group_id = group_id;
    }
    subject.updated_at = now;

    conn.execute(
        "UPDATE subjects SET display_name = ?2, active = ?3, sector_id = ?4, updated_at = ?5
         WHERE id = ?1",
        params![
            id.get(),
            subject.display_name,
            subject.active,
            subject.group_id.map(GroupId::get),
            now,
        ],
    )?;

    Ok(subject)
}

fn soft_delete_subject_on(conn: &Connection, id: SubjectId, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE subjects SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.get(), now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("subject {id}")));
    }
    Ok(())
}

fn insert_group_on(conn: &Connection, draft: &GroupDraft, now: i64) -> Result<Group> {
    conn.execute(
        "INSERT INTO sectors (name, description, active, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?3)",
        params![draft.name, draft.description, now],
    )?;

    Ok(Group {
        id: GroupId(conn.last_insert_rowid()),
        name: draft.name.clone(),
        description: draft.description.clone(),
        active: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

/// Soft-delete a group and cascade to its live grants. Audit records are
/// never cascaded.
fn soft_delete_group_on(conn: &Connection, id: GroupId, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sectors SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.get(), now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("group {id}")));
    }

    conn.execute(
        "UPDATE grants SET deleted_at = ?2, updated_at = ?2
         WHERE sector_id = ?1 AND deleted_at IS NULL",
        params![id.get(), now],
    )?;
    Ok(())
}

fn insert_grant_on(conn: &Connection, draft: &GrantDraft, now: i64) -> Result<PermissionGrant> {
    if find_group_on(conn, draft.group_id)?.is_none() {
        return Err(StoreError::NotFound(format!("group {}", draft.group_id)));
    }

    // The partial unique index rejects a second live grant for the triple.
    conn.execute(
        "INSERT INTO grants (sector_id, resource, action, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
        params![
            draft.group_id.get(),
            draft.resource.as_str(),
            draft.action.as_str(),
            now,
        ],
    )?;

    Ok(PermissionGrant {
        id: GrantId(conn.last_insert_rowid()),
        group_id: draft.group_id,
        resource: draft.resource.clone(),
        action: draft.action.clone(),
        active: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

fn set_grant_active_on(
    conn: &Connection,
    id: GrantId,
    active: bool,
    now: i64,
) -> Result<PermissionGrant> {
    let mut grant = conn
        .query_row(
            &format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.get()],
            row_to_grant,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("grant {id}")))?;

    conn.execute(
        "UPDATE grants SET active = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.get(), active, now],
    )?;

    grant.active = active;
    grant.updated_at = now;
    Ok(grant)
}

fn soft_delete_grant_on(conn: &Connection, id: GrantId, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE grants SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.get(), now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("grant {id}")));
    }
    Ok(())
}

fn insert_document_on(
    conn: &Connection,
    entity_type: &str,
    data: &Value,
    now: i64,
) -> Result<Document> {
    let encoded = serde_json::to_string(data)
        .map_err(|e| StoreError::InvalidData(format!("document payload: {e}")))?;

    conn.execute(
        "INSERT INTO documents (entity_type, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![entity_type, encoded, now],
    )?;

    Ok(Document {
        id: DocumentId(conn.last_insert_rowid()),
        entity_type: entity_type.to_string(),
        data: data.clone(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

fn update_document_on(
    conn: &Connection,
    id: DocumentId,
    data: &Value,
    now: i64,
) -> Result<Document> {
    let mut document = get_document_on(conn, id)?
        .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;

    let encoded = serde_json::to_string(data)
        .map_err(|e| StoreError::InvalidData(format!("document payload: {e}")))?;
    conn.execute(
        "UPDATE documents SET data = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.get(), encoded, now],
    )?;

    document.data = data.clone();
    document.updated_at = now;
    Ok(document)
}

fn soft_delete_document_on(conn: &Connection, id: DocumentId, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE documents SET deleted_at = ?2, updated_at = ?2
         WHERE id = ?1 AND deleted_at IS NULL",
        params![id.get(), now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("document {id}")));
    }
    Ok(())
}

fn get_document_on(conn: &Connection, id: DocumentId) -> Result<Option<Document>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND deleted_at IS NULL"),
        params![id.get()],
        row_to_document,
    )
    .optional()
    .map_err(StoreError::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactional scope
// ─────────────────────────────────────────────────────────────────────────────

/// The `StoreTxn` surface over a live SQLite transaction.
struct SqliteTxn<'a> {
    conn: &'a Connection,
    now: i64,
}

impl StoreTxn for SqliteTxn<'_> {
    fn now(&self) -> i64 {
        self.now
    }

    fn insert_subject(&mut self, draft: &SubjectDraft) -> Result<Subject> {
        insert_subject_on(self.conn, draft, self.now)
    }

    fn update_subject(&mut self, id: SubjectId, patch: &SubjectPatch) -> Result<Subject> {
        update_subject_on(self.conn, id, patch, self.now)
    }

    fn soft_delete_subject(&mut self, id: SubjectId) -> Result<()> {
        soft_delete_subject_on(self.conn, id, self.now)
    }

    fn insert_group(&mut self, draft: &GroupDraft) -> Result<Group> {
        insert_group_on(self.conn, draft, self.now)
    }

    fn soft_delete_group(&mut self, id: GroupId) -> Result<()> {
        soft_delete_group_on(self.conn, id, self.now)
    }

    fn insert_grant(&mut self, draft: &GrantDraft) -> Result<PermissionGrant> {
        insert_grant_on(self.conn, draft, self.now)
    }

    fn set_grant_active(&mut self, id: GrantId, active: bool) -> Result<PermissionGrant> {
        set_grant_active_on(self.conn, id, active, self.now)
    }

    fn soft_delete_grant(&mut self, id: GrantId) -> Result<()> {
        soft_delete_grant_on(self.conn, id, self.now)
    }

    fn assign(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome> {
        assign_on(self.conn, subject_id, grant_id, self.now)
    }

    fn revoke(&mut self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
        revoke_on(self.conn, subject_id, grant_id)
    }

    fn insert_document(&mut self, entity_type: &str, data: &Value) -> Result<Document> {
        insert_document_on(self.conn, entity_type, data, self.now)
    }

    fn update_document(&mut self, id: DocumentId, data: &Value) -> Result<Document> {
        update_document_on(self.conn, id, data, self.now)
    }

    fn soft_delete_document(&mut self, id: DocumentId) -> Result<()> {
        soft_delete_document_on(self.conn, id, self.now)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        get_document_on(self.conn, id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>> {
        self.on_conn(move |conn| find_subject_on(conn, id)).await
    }

    async fn find_subject_by_handle(&self, handle: &str) -> Result<Option<Subject>> {
        let handle = handle.to_string();
        self.on_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE handle = ?1 AND {LIVE}"),
                params![handle],
                row_to_subject,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.on_conn(move |conn| find_group_on(conn, id)).await
    }

    async fn find_grant(&self, id: GrantId) -> Result<Option<PermissionGrant>> {
        self.on_conn(move |conn| find_grant_on(conn, id)).await
    }

    async fn list_group_grants(&self, group_id: GroupId) -> Result<Vec<PermissionGrant>> {
        self.on_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM grants WHERE sector_id = ?1 AND {LIVE} ORDER BY id"
            ))?;
            let grants = stmt
                .query_map(params![group_id.get()], row_to_grant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(grants)
        })
        .await
    }

    async fn find_direct_grant(
        &self,
        subject_id: SubjectId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>> {
        let resource = resource.clone();
        let action = action.clone();
        self.on_conn(move |conn| find_direct_grant_on(conn, subject_id, &resource, &action))
            .await
    }

    async fn find_group_grant(
        &self,
        group_id: GroupId,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<PermissionGrant>> {
        let resource = resource.clone();
        let action = action.clone();
        self.on_conn(move |conn| find_group_grant_on(conn, group_id, &resource, &action))
            .await
    }

    async fn find_effective_grant(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<Option<GrantSource>> {
        let subject_id = subject.id;
        let group_id = subject.group_id;
        let resource = resource.clone();
        let action = action.clone();

        // Both lookups run inside one transaction so the decision never
        // observes a torn view of the grant tables.
        self.on_conn(move |conn| {
            let tx = conn.transaction()?;

            if let Some(grant) = find_direct_grant_on(&tx, subject_id, &resource, &action)? {
                return Ok(Some(GrantSource::Direct(grant)));
            }
            if let Some(group_id) = group_id {
                if let Some(grant) = find_group_grant_on(&tx, group_id, &resource, &action)? {
                    return Ok(Some(GrantSource::Group(grant)));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn assign(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<AssignOutcome> {
        self.on_conn(move |conn| {
            let tx = conn.transaction()?;
            let outcome = assign_on(&tx, subject_id, grant_id, now_millis())?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn revoke(&self, subject_id: SubjectId, grant_id: GrantId) -> Result<bool> {
        self.on_conn(move |conn| revoke_on(conn, subject_id, grant_id))
            .await
    }

    async fn list_assignments(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<SubjectGrantAssignment>> {
        self.on_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE subject_id = ?1 ORDER BY id"
            ))?;
            let assignments = stmt
                .query_map(params![subject_id.get()], row_to_assignment)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(assignments)
        })
        .await
    }

    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord> {
        self.on_conn(move |conn| append_audit_on(conn, &draft, now_millis()))
            .await
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let filter = filter.clone();
        self.on_conn(move |conn| list_audit_on(conn, &filter)).await
    }

    async fn mutate_with_audit(
        &self,
        draft: AuditDraft,
        mutation: MutationFn,
    ) -> Result<(MutationOutput, AuditRecord)> {
        self.on_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();

            let output = {
                let mut scope = SqliteTxn { conn: &tx, now };
                mutation(&mut scope).map_err(StoreError::Mutation)?
            };

            let mut draft = draft;
            if draft.entity_id.is_none() {
                draft.entity_id = output.entity_id;
            }

            // The audit row shares the mutation's transaction: if it cannot
            // be committed, the mutation is discarded with it.
            let record = append_audit_on(&tx, &draft, now)
                .map_err(|e| StoreError::Recording(e.to_string()))?;
            tx.commit()
                .map_err(|e| StoreError::Recording(e.to_string()))?;

            Ok((output, record))
        })
        .await
    }
}
