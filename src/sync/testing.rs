//! Test doubles for the store traits.

use crate::error::Result;
use crate::model::{NewRecord, PropertyMap, Record, RecordId, RecordType};
use crate::storage::{RecordSource, RecordStore};

/// Read-only in-memory source. Unlike SQLite it accepts any owner links,
/// including cycles.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl RecordSource for MemorySource {
    fn all(&self, record_type: RecordType) -> Result<Vec<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.record_type() == record_type)
            .cloned()
            .collect())
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.records.iter().find(|r| &r.id == id).cloned())
    }

    fn children(&self, owner: &RecordId) -> Result<Vec<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.owner.as_ref().is_some_and(|o| &o.owner == owner))
            .cloned()
            .collect())
    }
}

/// One CRUD call seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(RecordId),
    /// Record id, written fields, and whether the record existed at call time.
    Update(RecordId, Vec<String>, bool),
    Delete(RecordId),
}

/// Wraps a store and logs every CRUD call in order.
pub struct RecordingStore<T> {
    pub inner: T,
    pub calls: Vec<Call>,
    /// Fail any write touching this record.
    pub fail_on: Option<RecordId>,
    /// Fail every update; creates and deletes still go through.
    pub fail_updates: bool,
}

impl<T> RecordingStore<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: Vec::new(),
            fail_on: None,
            fail_updates: false,
        }
    }

    pub fn failing_on(mut self, id: RecordId) -> Self {
        self.fail_on = Some(id);
        self
    }

    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn write_count(&self) -> usize {
        self.calls.len()
    }

    fn check(&self, id: &RecordId) -> Result<()> {
        if self.fail_on.as_ref() == Some(id) {
            return Err(crate::error::Error::Other(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

impl<T: RecordSource> RecordSource for RecordingStore<T> {
    fn all(&self, record_type: RecordType) -> Result<Vec<Record>> {
        self.inner.all(record_type)
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        self.inner.get(id)
    }

    fn children(&self, owner: &RecordId) -> Result<Vec<Record>> {
        self.inner.children(owner)
    }
}

impl<T: RecordStore> RecordStore for RecordingStore<T> {
    fn create(&mut self, record: &NewRecord) -> Result<Record> {
        self.calls.push(Call::Create(record.id));
        self.check(&record.id)?;
        self.inner.create(record)
    }

    fn update(&mut self, id: &RecordId, properties: &PropertyMap) -> Result<()> {
        let existed = self.inner.contains(id)?;
        self.calls
            .push(Call::Update(*id, properties.keys().cloned().collect(), existed));
        self.check(id)?;
        if self.fail_updates {
            return Err(crate::error::Error::Other(format!("injected update failure for {id}")));
        }
        self.inner.update(id, properties)
    }

    fn delete(&mut self, id: &RecordId) -> Result<()> {
        self.calls.push(Call::Delete(*id));
        self.check(id)?;
        self.inner.delete(id)
    }
}
