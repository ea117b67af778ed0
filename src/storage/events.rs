//! Audit event storage and retrieval.
//!
//! Every write that reaches a store through the CRUD layer leaves an event,
//! so a sync run can be traced afterwards record by record.

use rusqlite::{Connection, Result};

/// Event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RecordSeeded,
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecordSeeded => "record_seeded",
            Self::RecordCreated => "record_created",
            Self::RecordUpdated => "record_updated",
            Self::RecordDeleted => "record_deleted",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "record_seeded" => Some(Self::RecordSeeded),
            "record_created" => Some(Self::RecordCreated),
            "record_updated" => Some(Self::RecordUpdated),
            "record_deleted" => Some(Self::RecordDeleted),
            _ => None,
        }
    }
}

/// An audit event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub record_type: String,
    pub record_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

impl Event {
    /// Create a new event (id will be assigned by database).
    #[must_use]
    pub fn new(record_type: &str, record_id: &str, event_type: EventType, actor: &str) -> Self {
        Self {
            id: 0,
            record_type: record_type.to_string(),
            record_id: record_id.to_string(),
            event_type,
            actor: actor.to_string(),
            old_value: None,
            new_value: None,
            comment: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Add old/new values for field change tracking.
    #[must_use]
    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    /// Add a comment to the event.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (record_type, record_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            event.record_type,
            event.record_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get events for a record, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(conn: &Connection, record_id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, record_type, record_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events
         WHERE record_id = ?1
         ORDER BY id ASC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(rusqlite::params![record_id, limit], |row| {
        let raw: String = row.get(3)?;
        let event_type = EventType::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown event type: {raw}").into(),
            )
        })?;
        Ok(Event {
            id: row.get(0)?,
            record_type: row.get(1)?,
            record_id: row.get(2)?,
            event_type,
            actor: row.get(4)?,
            old_value: row.get(5)?,
            new_value: row.get(6)?,
            comment: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;

    rows.collect()
}
