//! The CRUD layer consumed by the sync engine.
//!
//! Reads and writes are split into two traits. Components that must never
//! mutate a store (the source side of every operation) only accept a
//! [`RecordSource`], which has no write methods.

use crate::error::Result;
use crate::model::{NewRecord, PropertyMap, Record, RecordId, RecordType};

/// Read access to a store.
pub trait RecordSource {
    /// All records of one type, in store order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn all(&self, record_type: RecordType) -> Result<Vec<Record>>;

    /// A record by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Owned children of `owner`, grouped by collection, in position order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn children(&self, owner: &RecordId) -> Result<Vec<Record>>;

    /// Whether a record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn contains(&self, id: &RecordId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }
}

/// Write access to a store.
pub trait RecordStore: RecordSource {
    /// Create an empty record; properties are written afterwards with `update`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id already exists, the owner is missing or
    /// the store is read-only.
    fn create(&mut self, record: &NewRecord) -> Result<Record>;

    /// Write the given properties onto an existing record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing, a property is unknown or
    /// mistyped, or the store is read-only.
    fn update(&mut self, id: &RecordId, properties: &PropertyMap) -> Result<()>;

    /// Delete a record and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or the store is read-only.
    fn delete(&mut self, id: &RecordId) -> Result<()>;
}
