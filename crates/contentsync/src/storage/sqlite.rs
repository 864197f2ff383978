use crate::config::StorageConfig;
use crate::error::{ErrorKind, Result, StorageError, SyncError};
use crate::storage::sql_utils::WhereClause;
use crate::storage::storage_trait::{EntityQuery, RecordStore};
use crate::types::{
    ContentFields, Entity, LocalId, RemoteId, SiteId, UploadOperation, UploadRecord, UploadState,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub type DbPool = Pool<SqliteConnectionManager>;

const ENTITY_COLUMNS: &str =
    "local_id, site_id, remote_id, kind, is_local_only, is_locally_modified, fields";

const UPLOAD_COLUMNS: &str =
    "local_id, operation, state, progress, error_kind, error_message, attempts";

/// SQLite implementation of the RecordStore trait
pub struct SqliteRecordStore {
    pool: DbPool,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self> {
        let cache_size = config.sqlite_cache_size;
        let busy_timeout = config.sqlite_busy_timeout;
        let path_ref = path.as_ref();

        // Initialize schema with a single connection first
        {
            let conn = Connection::open(path_ref)?;
            Self::configure(&conn, cache_size, busy_timeout)?;
            Self::create_schema(&conn)?;
        }

        // foreign_keys is per connection, so every pooled connection sets it
        let manager = SqliteConnectionManager::file(path_ref)
            .with_init(move |conn| Self::configure(conn, cache_size, busy_timeout));

        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .min_idle(Some(1))
            .build(manager)?;

        debug!("record store opened at {:?}", path_ref);
        Ok(SqliteRecordStore { pool })
    }

    fn configure(conn: &Connection, cache_size: i32, busy_timeout: i32) -> rusqlite::Result<()> {
        conn.pragma_update(None, "cache_size", cache_size)?;
        conn.pragma_update(None, "busy_timeout", busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- Local copies of remote content. AUTOINCREMENT keeps local ids from
            -- being reused after a delete.
            CREATE TABLE IF NOT EXISTS entities (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL,
                remote_id INTEGER,             -- NULL until created remotely
                kind TEXT NOT NULL,
                is_local_only INTEGER NOT NULL DEFAULT 0,
                is_locally_modified INTEGER NOT NULL DEFAULT 0,
                fields TEXT NOT NULL,          -- JSON ContentFields
                UNIQUE (site_id, remote_id),
                CHECK (is_local_only = 0 OR remote_id IS NULL)
            );

            -- One upload record per entity
            CREATE TABLE IF NOT EXISTS uploads (
                local_id INTEGER PRIMARY KEY,
                operation TEXT NOT NULL,
                state TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                error_kind TEXT,
                error_message TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (local_id) REFERENCES entities(local_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_entities_site_kind ON entities(site_id, kind);
            CREATE INDEX IF NOT EXISTS idx_uploads_state ON uploads(state);
            "#,
        )
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn entity_where(query: &EntityQuery) -> WhereClause {
        let mut clause = WhereClause::new();
        if let Some(site_id) = query.site_id {
            clause.push("site_id = ?", site_id.0);
        }
        if let Some(kind) = query.kind {
            clause.push("kind = ?", kind.as_str().to_string());
        }
        if let Some(remote_id) = query.remote_id {
            match remote_id.to_sql() {
                Some(id) => clause.push("remote_id = ?", id),
                None => clause.push("remote_id IS NULL AND ? = 0", 0i64),
            }
        }
        if let Some(local_only) = query.is_local_only {
            clause.push("is_local_only = ?", local_only as i64);
        }
        if let Some(modified) = query.is_locally_modified {
            clause.push("is_locally_modified = ?", modified as i64);
        }
        clause
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let kind: String = row.get(3)?;
    let fields: String = row.get(6)?;
    Ok(Entity {
        local_id: LocalId(row.get(0)?),
        site_id: SiteId(row.get(1)?),
        remote_id: RemoteId::from_sql(row.get(2)?),
        kind: FromStr::from_str(&kind).map_err(|e| conversion_error(3, e))?,
        is_local_only: row.get(4)?,
        is_locally_modified: row.get(5)?,
        fields: serde_json::from_str::<ContentFields>(&fields).map_err(|e| conversion_error(6, e))?,
    })
}

fn row_to_upload(row: &Row<'_>) -> rusqlite::Result<UploadRecord> {
    let operation: String = row.get(1)?;
    let state: String = row.get(2)?;
    let error_kind: Option<String> = row.get(4)?;
    let error_message: Option<String> = row.get(5)?;
    let progress: f64 = row.get(3)?;
    Ok(UploadRecord {
        local_id: LocalId(row.get(0)?),
        operation: UploadOperation::from_str(&operation).map_err(|e| conversion_error(1, e))?,
        state: UploadState::from_str(&state).map_err(|e| conversion_error(2, e))?,
        progress: progress as f32,
        last_error: error_kind.map(|kind| {
            SyncError::from_parts(ErrorKind::parse(&kind), error_message.unwrap_or_default())
        }),
        attempts: row.get(6)?,
    })
}

fn write_upload(conn: &Connection, record: &UploadRecord) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO uploads (local_id, operation, state, progress, error_kind, error_message, attempts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (local_id) DO UPDATE SET
            operation = excluded.operation,
            state = excluded.state,
            progress = excluded.progress,
            error_kind = excluded.error_kind,
            error_message = excluded.error_message,
            attempts = excluded.attempts
        "#,
        params![
            record.local_id.0,
            record.operation.as_str(),
            record.state.as_str(),
            record.progress as f64,
            record.last_error.as_ref().map(|e| e.kind().as_str()),
            record.last_error.as_ref().map(|e| e.message().to_string()),
            record.attempts,
        ],
    )
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, local_id: LocalId) -> Result<Option<Entity>> {
        let conn = self.pool.get()?;
        let entity = conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE local_id = ?1", ENTITY_COLUMNS),
                [local_id.0],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    fn find_by_remote_id(&self, site_id: SiteId, remote_id: RemoteId) -> Result<Option<Entity>> {
        let Some(remote) = remote_id.to_sql() else {
            return Ok(None);
        };
        let conn = self.pool.get()?;
        let entity = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entities WHERE site_id = ?1 AND remote_id = ?2",
                    ENTITY_COLUMNS
                ),
                [site_id.0, remote],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    fn find(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let conn = self.pool.get()?;
        let clause = Self::entity_where(query);
        let sql = format!(
            "SELECT {} FROM entities{} ORDER BY local_id",
            ENTITY_COLUMNS,
            clause.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(clause.params()), row_to_entity)?;
        let entities = rows.collect::<rusqlite::Result<Vec<Entity>>>()?;
        Ok(entities)
    }

    fn count(&self, query: &EntityQuery) -> Result<usize> {
        let conn = self.pool.get()?;
        let clause = Self::entity_where(query);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM entities{}", clause.sql()),
            rusqlite::params_from_iter(clause.params()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert(&self, entity: &Entity) -> Result<Entity> {
        let conn = self.pool.get()?;
        let fields = serde_json::to_string(&entity.fields)?;
        conn.execute(
            r#"
            INSERT INTO entities (site_id, remote_id, kind, is_local_only, is_locally_modified, fields)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entity.site_id.0,
                entity.remote_id.to_sql(),
                entity.kind.as_str(),
                entity.is_local_only,
                entity.is_locally_modified,
                fields,
            ],
        )?;

        let mut stored = entity.clone();
        stored.local_id = LocalId(conn.last_insert_rowid());
        Ok(stored)
    }

    fn upsert(&self, entity: &Entity) -> Result<usize> {
        if !entity.local_id.is_assigned() {
            self.insert(entity)?;
            return Ok(1);
        }

        let conn = self.pool.get()?;
        let fields = serde_json::to_string(&entity.fields)?;
        let written = conn.execute(
            r#"
            UPDATE entities
            SET site_id = ?2, remote_id = ?3, kind = ?4,
                is_local_only = ?5, is_locally_modified = ?6, fields = ?7
            WHERE local_id = ?1
            "#,
            params![
                entity.local_id.0,
                entity.site_id.0,
                entity.remote_id.to_sql(),
                entity.kind.as_str(),
                entity.is_local_only,
                entity.is_locally_modified,
                fields,
            ],
        )?;
        Ok(written)
    }

    fn delete(&self, local_id: LocalId) -> Result<usize> {
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM entities WHERE local_id = ?1", [local_id.0])?;
        Ok(deleted)
    }

    fn delete_where(&self, query: &EntityQuery) -> Result<usize> {
        let conn = self.pool.get()?;
        let clause = Self::entity_where(query);
        let deleted = conn.execute(
            &format!("DELETE FROM entities{}", clause.sql()),
            rusqlite::params_from_iter(clause.params()),
        )?;
        Ok(deleted)
    }

    fn get_upload(&self, local_id: LocalId) -> Result<Option<UploadRecord>> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM uploads WHERE local_id = ?1", UPLOAD_COLUMNS),
                [local_id.0],
                row_to_upload,
            )
            .optional()?;
        Ok(record)
    }

    fn put_upload(&self, record: &UploadRecord) -> Result<usize> {
        let conn = self.pool.get()?;
        let written = write_upload(&conn, record)?;
        Ok(written)
    }

    fn transition_upload(
        &self,
        record: &UploadRecord,
        from: &[UploadState],
        create_if_missing: bool,
    ) -> Result<usize> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock up front so the state check and the
        // write cannot interleave with another pooled connection
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT state FROM uploads WHERE local_id = ?1",
                [record.local_id.0],
                |row| row.get(0),
            )
            .optional()?;

        let allowed = match current {
            None => create_if_missing,
            Some(state) => {
                let state = UploadState::from_str(&state)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                from.contains(&state)
            }
        };
        if !allowed {
            return Ok(0);
        }

        let written = write_upload(&tx, record)?;
        tx.commit()?;
        Ok(written)
    }

    fn update_upload_progress(&self, local_id: LocalId, progress: f32) -> Result<usize> {
        let conn = self.pool.get()?;
        let written = conn.execute(
            r#"
            UPDATE uploads SET progress = ?2
            WHERE local_id = ?1 AND state = ?3 AND progress <= ?2
            "#,
            params![local_id.0, progress as f64, UploadState::Uploading.as_str()],
        )?;
        Ok(written)
    }

    fn find_uploads(&self, state: Option<UploadState>) -> Result<Vec<UploadRecord>> {
        let conn = self.pool.get()?;
        let mut clause = WhereClause::new();
        if let Some(state) = state {
            clause.push("state = ?", state.as_str().to_string());
        }
        let sql = format!(
            "SELECT {} FROM uploads{} ORDER BY local_id",
            UPLOAD_COLUMNS,
            clause.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(clause.params()), row_to_upload)?;
        let records = rows.collect::<rusqlite::Result<Vec<UploadRecord>>>()?;
        Ok(records)
    }

    fn delete_upload(&self, local_id: LocalId) -> Result<usize> {
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM uploads WHERE local_id = ?1", [local_id.0])?;
        Ok(deleted)
    }
}
