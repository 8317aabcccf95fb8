//! Insert/update/skip decisions for accepted rows.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::ImportResult;
use crate::import::batch::{BatchWriter, Slot};
use crate::import::cache::{DuplicateKeyIndex, ReferenceCache};
use crate::import::ensure_live;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::models::LookupKey;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Staged as a new record.
    Insert,
    /// Merged into a stored or staged record and changed it.
    Update,
    /// Matched an existing record without changing it.
    Unchanged,
    /// Composite key already claimed.
    SkipDuplicate,
    /// Foreign key does not resolve.
    SkipInvalidReference,
}

pub struct UpsertResolver {
    strategy: &'static EntityStrategy,
    references: ReferenceCache,
    duplicates: DuplicateKeyIndex,
    /// Staged records by every key that identifies them.
    staged: HashMap<LookupKey, Slot>,
}

impl UpsertResolver {
    pub fn new(strategy: &'static EntityStrategy) -> Self {
        Self {
            strategy,
            references: ReferenceCache::new(),
            duplicates: DuplicateKeyIndex::new(strategy.kind),
            staged: HashMap::new(),
        }
    }

    /// Decide what to do with `candidate` and stage the resulting write.
    ///
    /// # Arguments
    /// * `store` - Store used for reference checks and point lookups
    /// * `candidate` - Record built from the current row
    /// * `writer` - Staging area receiving inserts and updates
    /// * `ctx` - Run state handed to the strategy's merge and prepare steps
    /// * `cancel` - Checked before every store round-trip
    pub async fn resolve<S: EntityStore>(
        &mut self,
        store: &mut S,
        candidate: Candidate,
        writer: &mut BatchWriter,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> ImportResult<Decision> {
        let Candidate {
            mut record,
            reference,
            claim,
        } = candidate;

        if let Some(reference) = reference {
            if self.references.cached(reference.target, &reference.key).is_none() {
                ensure_live(cancel)?;
            }
            let valid = self
                .references
                .is_valid(store, reference.target, &reference.key)
                .await?;
            if !valid {
                log::debug!(
                    "{}: {:?} '{}' not found, skipping row",
                    self.strategy.name,
                    reference.target,
                    reference.key
                );
                return Ok(Decision::SkipInvalidReference);
            }
        }

        match self.strategy.policy {
            UpsertPolicy::AppendUnique => {
                if let Some(claim) = claim {
                    ensure_live(cancel)?;
                    if !self.duplicates.claim(store, &claim.parent, claim.key).await? {
                        return Ok(Decision::SkipDuplicate);
                    }
                }
                writer.stage_insert(record);
                Ok(Decision::Insert)
            }
            UpsertPolicy::Upsert => {
                let Some(key) = record.lookup_key() else {
                    writer.stage_insert(record);
                    return Ok(Decision::Insert);
                };

                if let Some(slot) = self.staged.get(&key).copied() {
                    if let Some(staged) = writer.slot_mut(slot) {
                        let changed = (self.strategy.merge)(staged, record, ctx)?;
                        if !changed {
                            return Ok(Decision::Unchanged);
                        }
                        // A merge can rename the record, so re-key the slot.
                        let keys = staged.identity_keys();
                        self.staged.retain(|_, tracked| *tracked != slot);
                        self.track(keys, slot);
                        return Ok(Decision::Update);
                    }
                }

                ensure_live(cancel)?;
                match store.find(&key).await? {
                    Some(mut existing) => {
                        if !(self.strategy.merge)(&mut existing, record, ctx)? {
                            return Ok(Decision::Unchanged);
                        }
                        let keys = existing.identity_keys();
                        let slot = writer.stage_update(existing);
                        self.track(keys, slot);
                        Ok(Decision::Update)
                    }
                    None => {
                        (self.strategy.prepare)(&mut record, ctx)?;
                        let keys = record.identity_keys();
                        let slot = writer.stage_insert(record);
                        self.track(keys, slot);
                        Ok(Decision::Insert)
                    }
                }
            }
        }
    }

    /// Drop slot bookkeeping once the staged writes are durable.
    pub fn forget_staged(&mut self) {
        self.staged.clear();
    }

    fn track(&mut self, keys: Vec<LookupKey>, slot: Slot) {
        for key in keys {
            self.staged.insert(key, slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PasswordService, UuidGenerator};
    use crate::entities;
    use crate::import::validate::RowValidator;
    use crate::import::source::ImportRow;
    use crate::models::{Customer, EntityKind, Record, Role};
    use crate::test_support::MemoryStore;
    use std::sync::Arc;

    fn candidate(strategy: &EntityStrategy, row: ImportRow, ctx: &mut RunContext) -> Candidate {
        let valid = RowValidator::new(strategy.columns)
            .validate(&row)
            .expect("valid row");
        (strategy.build)(&valid, ctx).expect("candidate")
    }

    fn context() -> RunContext {
        RunContext::new(Arc::new(PasswordService::new().expect("hasher")))
    }

    #[tokio::test]
    async fn stored_record_with_same_fields_is_unchanged() {
        let strategy = entities::lookup("customer").expect("customer strategy");
        let mut store = MemoryStore::new().with_record(Record::Customer(Customer {
            id: Some(1),
            code: "A".into(),
            name: "Acme".into(),
            email: None,
        }));
        let mut resolver = UpsertResolver::new(strategy);
        let mut writer = BatchWriter::new(10, Arc::new(UuidGenerator));
        let mut ctx = context();
        let cancel = CancellationToken::new();

        let row = ImportRow::new(2).with("Code", "A").with("Name", "Acme");
        let decision = resolver
            .resolve(&mut store, candidate(strategy, row, &mut ctx), &mut writer, &mut ctx, &cancel)
            .await
            .expect("resolve");
        assert_eq!(decision, Decision::Unchanged);
        assert!(writer.pending().is_empty());

        let row = ImportRow::new(3).with("Code", "A").with("Name", "Acme Corp");
        let decision = resolver
            .resolve(&mut store, candidate(strategy, row, &mut ctx), &mut writer, &mut ctx, &cancel)
            .await
            .expect("resolve");
        assert_eq!(decision, Decision::Update);
        assert_eq!(writer.pending().updates().len(), 1);
    }

    #[tokio::test]
    async fn repeated_key_merges_into_staged_insert() {
        let strategy = entities::lookup("customer").expect("customer strategy");
        let mut store = MemoryStore::new();
        let mut resolver = UpsertResolver::new(strategy);
        let mut writer = BatchWriter::new(10, Arc::new(UuidGenerator));
        let mut ctx = context();
        let cancel = CancellationToken::new();

        for (line, name) in [(2, "Acme"), (3, "Acme Two")] {
            let row = ImportRow::new(line).with("Code", "A").with("Name", name);
            resolver
                .resolve(&mut store, candidate(strategy, row, &mut ctx), &mut writer, &mut ctx, &cancel)
                .await
                .expect("resolve");
        }

        assert_eq!(writer.pending().inserts().len(), 1);
        assert_eq!(store.find_calls(), 1);
        let Record::Customer(staged) = &writer.pending().inserts()[0] else {
            panic!("customer staged");
        };
        assert_eq!(staged.name, "Acme Two");
    }

    #[tokio::test]
    async fn renamed_staged_user_is_found_under_its_new_name() {
        let strategy = entities::lookup("user").expect("user strategy");
        let mut store = MemoryStore::new();
        let mut resolver = UpsertResolver::new(strategy);
        let mut writer = BatchWriter::new(10, Arc::new(UuidGenerator));
        let mut ctx = context();
        let cancel = CancellationToken::new();

        let rows = [
            ImportRow::new(2).with("Id", "u1").with("UserName", "alice"),
            ImportRow::new(3).with("Id", "u1").with("UserName", "bob"),
            ImportRow::new(4).with("UserName", "bob"),
            ImportRow::new(5).with("UserName", "alice"),
        ];
        let mut decisions = Vec::new();
        for row in rows {
            let decision = resolver
                .resolve(&mut store, candidate(strategy, row, &mut ctx), &mut writer, &mut ctx, &cancel)
                .await
                .expect("resolve");
            decisions.push(decision);
        }

        assert_eq!(
            decisions,
            vec![
                Decision::Insert,
                Decision::Update,
                Decision::Unchanged,
                Decision::Insert
            ]
        );
        assert_eq!(writer.pending().inserts().len(), 2);
        let Record::User(first) = &writer.pending().inserts()[0] else {
            panic!("user staged");
        };
        assert_eq!(first.id.as_deref(), Some("u1"));
        assert_eq!(first.normalized_user_name, "BOB");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_store_lookup() {
        let strategy = entities::lookup("role").expect("role strategy");
        let mut store = MemoryStore::new().with_record(Record::Role(Role {
            id: Some("r1".into()),
            name: "Admin".into(),
            normalized_name: "ADMIN".into(),
            concurrency_stamp: Some("s".into()),
        }));
        let mut resolver = UpsertResolver::new(strategy);
        let mut writer = BatchWriter::new(10, Arc::new(UuidGenerator));
        let mut ctx = context();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let row = ImportRow::new(2).with("Name", "Admin");
        let result = resolver
            .resolve(&mut store, candidate(strategy, row, &mut ctx), &mut writer, &mut ctx, &cancel)
            .await;
        assert!(matches!(result, Err(crate::error::ImportError::Cancelled)));
        assert_eq!(store.find_calls(), 0);
        assert_eq!(store.count(EntityKind::Role), 1);
    }
}
