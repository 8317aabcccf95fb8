//! Relational store access.
//!
//! The pipeline only talks to [`EntityStore`]: point lookups, existence
//! checks, claim key scans and one transactional write per flush. Drivers
//! exist for Postgres and MySQL; [`Store`] picks one at runtime.

pub mod mysql;
pub mod postgres;

use crate::error::ImportResult;
use crate::import::batch::PendingWrites;
use crate::models::{EntityKind, LookupKey, Record, ReferenceTarget};

pub use mysql::MySqlStore;
pub use postgres::PgStore;

/// A stored claim as `(claim_type, claim_value)`.
pub type ClaimPair = (String, Option<String>);

#[allow(async_fn_in_trait)]
pub trait EntityStore {
    /// Whether a row with primary key `key` exists in `target`.
    async fn exists(&mut self, target: ReferenceTarget, key: &str) -> ImportResult<bool>;

    /// All claims of kind `kind` attached to `parent` (a role or user id).
    async fn load_claim_keys(&mut self, kind: EntityKind, parent: &str)
    -> ImportResult<Vec<ClaimPair>>;

    /// Point lookup by natural or composite key. Users come back with their
    /// linked role ids.
    async fn find(&mut self, key: &LookupKey) -> ImportResult<Option<Record>>;

    /// `(normalized_name, id)` for every role.
    async fn role_directory(&mut self) -> ImportResult<Vec<(String, String)>>;

    /// Persist all pending inserts and updates in one transaction.
    ///
    /// # Returns
    /// Number of records inserted
    async fn apply(&mut self, writes: &PendingWrites) -> ImportResult<usize>;
}

/// Runtime-selected store driver.
pub enum Store {
    Postgres(PgStore),
    MySql(MySqlStore),
}

impl Store {
    pub async fn close(self) {
        match self {
            Store::Postgres(store) => store.pool().close().await,
            Store::MySql(store) => store.pool().close().await,
        }
    }
}

impl EntityStore for Store {
    async fn exists(&mut self, target: ReferenceTarget, key: &str) -> ImportResult<bool> {
        match self {
            Store::Postgres(store) => store.exists(target, key).await,
            Store::MySql(store) => store.exists(target, key).await,
        }
    }

    async fn load_claim_keys(
        &mut self,
        kind: EntityKind,
        parent: &str,
    ) -> ImportResult<Vec<ClaimPair>> {
        match self {
            Store::Postgres(store) => store.load_claim_keys(kind, parent).await,
            Store::MySql(store) => store.load_claim_keys(kind, parent).await,
        }
    }

    async fn find(&mut self, key: &LookupKey) -> ImportResult<Option<Record>> {
        match self {
            Store::Postgres(store) => store.find(key).await,
            Store::MySql(store) => store.find(key).await,
        }
    }

    async fn role_directory(&mut self) -> ImportResult<Vec<(String, String)>> {
        match self {
            Store::Postgres(store) => store.role_directory().await,
            Store::MySql(store) => store.role_directory().await,
        }
    }

    async fn apply(&mut self, writes: &PendingWrites) -> ImportResult<usize> {
        match self {
            Store::Postgres(store) => store.apply(writes).await,
            Store::MySql(store) => store.apply(writes).await,
        }
    }
}
