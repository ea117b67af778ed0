//! SQLite storage implementation.
//!
//! This module provides the concrete record store for gsync using SQLite.
//! It follows the `MutationContext` pattern: every write runs inside one
//! IMMEDIATE transaction that also appends its audit events, so each record
//! write is an independent unit of consistency.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Extractable, NewRecord, OwnerLink, PropertyMap, Record, RecordId, RecordKind, RecordType};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::{apply_schema, verify_schema};
use crate::storage::store::{RecordSource, RecordStore};

const DEFAULT_ACTOR: &str = "gsync";

/// SQLite-based record store.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    read_only: bool,
    actor: String,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, record_type: RecordType, record_id: &RecordId, event_type: EventType) {
        self.events.push(
            Event::new(record_type.as_str(), &record_id.to_string(), event_type, &self.actor)
                .with_comment(&self.op_name),
        );
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        record_type: RecordType,
        record_id: &RecordId,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(record_type.as_str(), &record_id.to_string(), event_type, &self.actor)
                .with_values(old_value, new_value)
                .with_comment(&self.op_name),
        );
    }
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

const RECORD_COLUMNS: &str = "id, owner_id, owner_field, kind, created_at, modified_at";

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let owner_id: Option<String> = row.get(1)?;
    let owner_field: Option<String> = row.get(2)?;
    let kind: String = row.get(3)?;

    let id = id.parse::<RecordId>().map_err(|e| conversion_error(0, e))?;
    let owner = match (owner_id, owner_field) {
        (Some(owner), Some(field)) => Some(OwnerLink {
            owner: owner.parse::<RecordId>().map_err(|e| conversion_error(1, e))?,
            field,
        }),
        _ => None,
    };
    let kind: RecordKind = serde_json::from_str(&kind).map_err(|e| conversion_error(3, e))?;

    Ok(Record {
        id,
        owner,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
        kind,
    })
}

impl SqliteStorage {
    /// Open a store at the given path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a store with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Open an existing store without write access.
    ///
    /// SQLite enforces this too: the connection itself is read-only.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the file does not exist, or a database
    /// error if it is not a gsync store.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotInitialized {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        verify_schema(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Open an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Set the actor recorded in audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Refuses to run on a read-only store
    /// 2. Begins an IMMEDIATE transaction (for write locking)
    /// 3. Executes the mutation closure
    /// 4. Writes audit events
    /// 5. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        if self.read_only {
            return Err(Error::ReadOnlyStore);
        }

        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, &self.actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    /// Insert a fully formed record, keeping its identity and timestamps.
    ///
    /// Used to seed stores. The owner, if any, must already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the id exists, the owner is missing, or the insert fails.
    pub fn insert_record(&mut self, record: &Record) -> Result<()> {
        let kind = serde_json::to_string(&record.kind)?;
        self.mutate("insert_record", |tx, ctx| {
            ensure_absent(tx, &record.id)?;
            let position = match &record.owner {
                Some(link) => next_position(tx, link)?,
                None => 0,
            };
            tx.execute(
                "INSERT INTO records (id, record_type, owner_id, owner_field, position, kind, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.id.to_string(),
                    record.record_type().as_str(),
                    record.owner.as_ref().map(|l| l.owner.to_string()),
                    record.owner.as_ref().map(|l| l.field.clone()),
                    position,
                    kind,
                    record.created_at,
                    record.modified_at,
                ],
            )?;
            ctx.record_event(record.record_type(), &record.id, EventType::RecordSeeded);
            Ok(())
        })
    }

    /// Number of records of one type.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, record_type: RecordType) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE record_type = ?1",
            [record_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Audit events for one record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events_for(&self, id: &RecordId) -> Result<Vec<Event>> {
        Ok(get_events(&self.conn, &id.to_string(), None)?)
    }
}

fn ensure_absent(tx: &Transaction, id: &RecordId) -> Result<()> {
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM records WHERE id = ?1", [id.to_string()], |row| row.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(Error::DuplicateRecord { id: id.to_string() });
    }
    Ok(())
}

fn next_position(tx: &Transaction, link: &OwnerLink) -> Result<i64> {
    let owner_exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM records WHERE id = ?1",
            [link.owner.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if owner_exists.is_none() {
        return Err(Error::RecordNotFound {
            id: link.owner.to_string(),
        });
    }
    let position: i64 = tx.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM records WHERE owner_id = ?1 AND owner_field = ?2",
        rusqlite::params![link.owner.to_string(), link.field],
        |row| row.get(0),
    )?;
    Ok(position)
}

fn load_record(conn: &Connection, id: &RecordId) -> Result<Option<Record>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], map_record_row).optional()?)
}

impl RecordSource for SqliteStorage {
    fn all(&self, record_type: RecordType) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE record_type = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map([record_type.as_str()], map_record_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        load_record(&self.conn, id)
    }

    fn children(&self, owner: &RecordId) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = ?1 ORDER BY owner_field, position, rowid"
        ))?;
        let rows = stmt
            .query_map([owner.to_string()], map_record_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl RecordStore for SqliteStorage {
    fn create(&mut self, record: &NewRecord) -> Result<Record> {
        let now = chrono::Utc::now().timestamp_millis();
        let kind = RecordKind::empty(record.record_type);
        let kind_json = serde_json::to_string(&kind)?;

        self.mutate("create", |tx, ctx| {
            ensure_absent(tx, &record.id)?;
            let position = match &record.owner {
                Some(link) => next_position(tx, link)?,
                None => 0,
            };
            tx.execute(
                "INSERT INTO records (id, record_type, owner_id, owner_field, position, kind, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    record.id.to_string(),
                    record.record_type.as_str(),
                    record.owner.as_ref().map(|l| l.owner.to_string()),
                    record.owner.as_ref().map(|l| l.field.clone()),
                    position,
                    kind_json,
                    now,
                ],
            )?;
            ctx.record_event(record.record_type, &record.id, EventType::RecordCreated);
            Ok(())
        })?;

        debug!(id = %record.id, record_type = %record.record_type, "created record");
        Ok(Record {
            id: record.id,
            owner: record.owner.clone(),
            created_at: now,
            modified_at: now,
            kind,
        })
    }

    fn update(&mut self, id: &RecordId, properties: &PropertyMap) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("update", |tx, ctx| {
            let mut record = load_record(tx, id)?.ok_or_else(|| Error::RecordNotFound { id: id.to_string() })?;
            let before = record.kind.extract();

            for (name, value) in properties {
                record.kind.apply(name, value.clone())?;
            }

            let after = record.kind.extract();
            let old: PropertyMap = properties
                .keys()
                .filter_map(|k| before.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            let new: PropertyMap = properties
                .keys()
                .filter_map(|k| after.get(k).map(|v| (k.clone(), v.clone())))
                .collect();

            tx.execute(
                "UPDATE records SET kind = ?1, modified_at = ?2 WHERE id = ?3",
                rusqlite::params![serde_json::to_string(&record.kind)?, now, id.to_string()],
            )?;
            ctx.record_change(
                record.record_type(),
                id,
                EventType::RecordUpdated,
                Some(serde_json::to_string(&old)?),
                Some(serde_json::to_string(&new)?),
            );
            Ok(())
        })
    }

    fn delete(&mut self, id: &RecordId) -> Result<()> {
        self.mutate("delete", |tx, ctx| {
            let record = load_record(tx, id)?.ok_or_else(|| Error::RecordNotFound { id: id.to_string() })?;
            tx.execute("DELETE FROM records WHERE id = ?1", [id.to_string()])?;
            ctx.record_event(record.record_type(), id, EventType::RecordDeleted);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, LocalizedText, PropertyValue, Sense};

    fn entry(form: &str) -> Record {
        Record::new(RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", form),
            ..Entry::default()
        }))
    }

    #[test]
    fn test_open_memory() {
        let storage = SqliteStorage::open_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_insert_and_get_preserves_identity() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let record = entry("run").with_timestamps(1000, 2000);
        storage.insert_record(&record).unwrap();

        let loaded = storage.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(storage.all(RecordType::Entry).unwrap().len(), 1);
        assert_eq!(storage.count(RecordType::Sense).unwrap(), 0);
    }

    #[test]
    fn test_create_then_update() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let id = RecordId::generate();
        storage
            .create(&NewRecord {
                id,
                record_type: RecordType::Entry,
                owner: None,
            })
            .unwrap();

        let mut props = PropertyMap::new();
        props.insert(
            "lexeme_form".to_string(),
            PropertyValue::Localized(LocalizedText::new().with("en", "walk")),
        );
        storage.update(&id, &props).unwrap();

        let loaded = storage.get(&id).unwrap().unwrap();
        assert_eq!(loaded.label(), "walk");

        let events = storage.events_for(&id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RecordCreated);
        assert_eq!(events[1].event_type, EventType::RecordUpdated);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let record = entry("run");
        storage.insert_record(&record).unwrap();
        let result = storage.create(&NewRecord {
            id: record.id,
            record_type: RecordType::Entry,
            owner: None,
        });
        assert!(matches!(result, Err(Error::DuplicateRecord { .. })));
    }

    #[test]
    fn test_create_with_missing_owner_fails() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let result = storage.create(&NewRecord {
            id: RecordId::generate(),
            record_type: RecordType::Sense,
            owner: Some(OwnerLink {
                owner: RecordId::generate(),
                field: "senses".to_string(),
            }),
        });
        assert!(matches!(result, Err(Error::RecordNotFound { .. })));
    }

    #[test]
    fn test_update_unknown_property_rolls_back() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let record = entry("run");
        storage.insert_record(&record).unwrap();

        let mut props = PropertyMap::new();
        props.insert(
            "lexeme_form".to_string(),
            PropertyValue::Localized(LocalizedText::new().with("en", "changed")),
        );
        props.insert("bogus".to_string(), PropertyValue::Bool(true));
        assert!(storage.update(&record.id, &props).is_err());

        let loaded = storage.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.label(), "run");
    }

    #[test]
    fn test_delete_cascades_to_owned_children() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let parent = entry("run");
        let child = Record::new(RecordKind::Sense(Sense::default())).owned_by(parent.id, "senses");
        storage.insert_record(&parent).unwrap();
        storage.insert_record(&child).unwrap();
        assert_eq!(storage.children(&parent.id).unwrap().len(), 1);

        storage.delete(&parent.id).unwrap();
        assert!(storage.get(&child.id).unwrap().is_none());
    }

    #[test]
    fn test_children_keep_position_order() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let parent = entry("run");
        storage.insert_record(&parent).unwrap();
        let first = Record::new(RecordKind::Sense(Sense::default())).owned_by(parent.id, "senses");
        let second = Record::new(RecordKind::Sense(Sense::default())).owned_by(parent.id, "senses");
        storage.insert_record(&first).unwrap();
        storage.insert_record(&second).unwrap();

        let ids: Vec<RecordId> = storage.children(&parent.id).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("source.db");
        {
            let mut storage = SqliteStorage::open(&path).unwrap();
            storage.insert_record(&entry("run")).unwrap();
        }

        let mut storage = SqliteStorage::open_read_only(&path).unwrap();
        assert!(storage.is_read_only());
        assert_eq!(storage.all(RecordType::Entry).unwrap().len(), 1);
        assert!(matches!(storage.delete(&RecordId::generate()), Err(Error::ReadOnlyStore)));
    }

    #[test]
    fn test_read_only_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = SqliteStorage::open_read_only(&dir.path().join("nope.db"));
        assert!(matches!(result, Err(Error::NotInitialized { .. })));
    }
}
