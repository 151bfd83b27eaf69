//! Numeric id allocation for collections without an auto-increment primitive.
//!
//! Each sequence is one counter row; `allocate` increments and reads it in a
//! single statement. Values are never handed out twice, but a value whose
//! insert later fails is simply skipped, so sequences can have gaps.

use crate::error::{RegistrarError, Result};
use crate::store::Store;
use serde::Serialize;
use std::fmt;

/// The sequences used by entity creation. Courses have caller-supplied ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Student,
    Instructor,
    Department,
    Enrollment,
}

impl Sequence {
    pub const ALL: [Sequence; 4] = [
        Sequence::Student,
        Sequence::Instructor,
        Sequence::Department,
        Sequence::Enrollment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Sequence::Student => "student",
            Sequence::Instructor => "instructor",
            Sequence::Department => "department",
            Sequence::Enrollment => "enrollment",
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted counter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub name: String,
    pub value: i64,
}

pub struct SequenceAllocator<'a> {
    store: &'a Store,
}

impl<'a> SequenceAllocator<'a> {
    pub fn new(store: &'a Store) -> Self {
        SequenceAllocator { store }
    }

    /// Issue the next value of `name`. The first call for an unseen name
    /// returns `sequence_base + 1`.
    pub fn allocate(&self, name: &str) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(RegistrarError::Validation(
                "Sequence name must not be empty".into(),
            ));
        }
        let base = self.store.config().sequence_base;
        let value = self
            .store
            .write_txn(|| self.store.db().next_counter_value(name, base))?;
        log::debug!("Allocated {name} #{value}");
        Ok(value)
    }

    pub fn next(&self, sequence: Sequence) -> Result<i64> {
        self.allocate(sequence.as_str())
    }

    /// Last value issued for `name`, if any.
    pub fn current(&self, name: &str) -> Result<Option<i64>> {
        self.store.db().get_counter(name)
    }

    pub fn counters(&self) -> Result<Vec<Counter>> {
        Ok(self
            .store
            .db()
            .list_counters()?
            .into_iter()
            .map(|(name, value)| Counter { name, value })
            .collect())
    }
}
