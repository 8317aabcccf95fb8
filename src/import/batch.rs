//! Explicit staging of writes between flushes.
//!
//! [`PendingWrites`] holds every insert and update accepted since the last
//! flush. [`BatchWriter`] owns it, fills generated values (ids and stamps)
//! right before the store sees the records, and clears it once the store has
//! committed the batch.

use std::sync::Arc;

use crate::auth::ValueGenerator;
use crate::error::ImportResult;
use crate::models::Record;
use crate::store::EntityStore;

/// Writes staged for the next flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWrites {
    inserts: Vec<Record>,
    updates: Vec<Record>,
}

impl PendingWrites {
    pub fn inserts(&self) -> &[Record] {
        &self.inserts
    }

    pub fn updates(&self) -> &[Record] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }

    fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
    }
}

/// Position of a staged record inside [`PendingWrites`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Insert(usize),
    Update(usize),
}

pub struct BatchWriter {
    batch_size: usize,
    pending: PendingWrites,
    generator: Arc<dyn ValueGenerator>,
}

impl BatchWriter {
    pub fn new(batch_size: usize, generator: Arc<dyn ValueGenerator>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: PendingWrites {
                inserts: Vec::with_capacity(batch_size),
                updates: Vec::new(),
            },
            generator,
        }
    }

    pub fn stage_insert(&mut self, record: Record) -> Slot {
        self.pending.inserts.push(record);
        Slot::Insert(self.pending.inserts.len() - 1)
    }

    pub fn stage_update(&mut self, record: Record) -> Slot {
        self.pending.updates.push(record);
        Slot::Update(self.pending.updates.len() - 1)
    }

    pub fn slot_mut(&mut self, slot: Slot) -> Option<&mut Record> {
        match slot {
            Slot::Insert(idx) => self.pending.inserts.get_mut(idx),
            Slot::Update(idx) => self.pending.updates.get_mut(idx),
        }
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// Whether the staged writes reached the batch size.
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    /// Write every staged record in one store transaction.
    ///
    /// On success the staging area is cleared. On failure it is left as is
    /// and the error is returned to the caller untouched.
    ///
    /// # Returns
    /// Number of records inserted
    pub async fn flush<S: EntityStore>(&mut self, store: &mut S) -> ImportResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        for record in self
            .pending
            .inserts
            .iter_mut()
            .chain(self.pending.updates.iter_mut())
        {
            fill_generated(record, self.generator.as_ref());
        }

        let staged = self.pending.len();
        let inserted = store.apply(&self.pending).await?;
        log::debug!(
            "flushed {} staged writes ({} inserted)",
            staged,
            inserted
        );
        self.pending.clear();
        Ok(inserted)
    }
}

fn fill_generated(record: &mut Record, generator: &dyn ValueGenerator) {
    match record {
        Record::Role(role) => {
            role.id.get_or_insert_with(|| generator.next_value());
            role.concurrency_stamp
                .get_or_insert_with(|| generator.next_value());
        }
        Record::User(user) => {
            user.id.get_or_insert_with(|| generator.next_value());
            user.security_stamp
                .get_or_insert_with(|| generator.next_value());
            user.concurrency_stamp
                .get_or_insert_with(|| generator.next_value());
        }
        _ => {}
    }
}
