pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod models;
pub mod store;

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the process-wide logger. Safe to call more than once.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::error::{ImportError, ImportResult};
    use crate::import::batch::PendingWrites;
    use crate::models::{EntityKind, LookupKey, Record, ReferenceTarget};
    use crate::store::{ClaimPair, EntityStore};

    pub use database::{TestDatabase, TestDatabaseError};

    /// In-memory [`EntityStore`] with round-trip counters and failure
    /// injection. Every `apply` is all-or-nothing, like a real transaction.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        records: Vec<Record>,
        next_id: i64,
        fail_on_apply: Option<usize>,
        apply_calls: usize,
        exists_calls: usize,
        find_calls: usize,
        claim_scans: usize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a record before the run starts.
        pub fn with_record(mut self, record: Record) -> Self {
            self.insert_record(record);
            self
        }

        /// Make the `nth` call to `apply` (1-based) fail without writing anything.
        pub fn fail_on_apply(mut self, nth: usize) -> Self {
            self.fail_on_apply = Some(nth);
            self
        }

        pub fn insert_record(&mut self, record: Record) {
            let record = self.with_surrogate_id(record);
            self.records.push(record);
        }

        pub fn records(&self) -> &[Record] {
            &self.records
        }

        pub fn count(&self, kind: EntityKind) -> usize {
            self.records.iter().filter(|r| r.kind() == kind).count()
        }

        pub fn find_record(&self, key: &LookupKey) -> Option<&Record> {
            self.records.iter().find(|r| r.matches(key))
        }

        pub fn apply_calls(&self) -> usize {
            self.apply_calls
        }

        pub fn exists_calls(&self) -> usize {
            self.exists_calls
        }

        pub fn find_calls(&self) -> usize {
            self.find_calls
        }

        pub fn claim_scans(&self) -> usize {
            self.claim_scans
        }

        fn with_surrogate_id(&mut self, mut record: Record) -> Record {
            self.next_id += 1;
            let next = self.next_id;
            match &mut record {
                Record::Customer(c) => {
                    c.id.get_or_insert(next);
                }
                Record::RoleClaim(c) => {
                    c.id.get_or_insert(next as i32);
                }
                Record::UserClaim(c) => {
                    c.id.get_or_insert(next as i32);
                }
                Record::ExtEmployee(e) => {
                    e.id.get_or_insert(next as i32);
                }
                _ => {}
            }
            record
        }
    }

    impl EntityStore for MemoryStore {
        async fn exists(&mut self, target: ReferenceTarget, key: &str) -> ImportResult<bool> {
            self.exists_calls += 1;
            Ok(self.records.iter().any(|record| match (target, record) {
                (ReferenceTarget::Role, Record::Role(role)) => role.id.as_deref() == Some(key),
                (ReferenceTarget::User, Record::User(user)) => user.id.as_deref() == Some(key),
                _ => false,
            }))
        }

        async fn load_claim_keys(
            &mut self,
            kind: EntityKind,
            parent: &str,
        ) -> ImportResult<Vec<ClaimPair>> {
            self.claim_scans += 1;
            let pairs = self
                .records
                .iter()
                .filter_map(|record| match (kind, record) {
                    (EntityKind::RoleClaim, Record::RoleClaim(c)) if c.role_id == parent => {
                        Some((c.claim_type.clone(), c.claim_value.clone()))
                    }
                    (EntityKind::UserClaim, Record::UserClaim(c)) if c.user_id == parent => {
                        Some((c.claim_type.clone(), c.claim_value.clone()))
                    }
                    _ => None,
                })
                .collect();
            Ok(pairs)
        }

        async fn find(&mut self, key: &LookupKey) -> ImportResult<Option<Record>> {
            self.find_calls += 1;
            Ok(self.find_record(key).cloned())
        }

        async fn role_directory(&mut self) -> ImportResult<Vec<(String, String)>> {
            Ok(self
                .records
                .iter()
                .filter_map(|record| match record {
                    Record::Role(role) => role
                        .id
                        .clone()
                        .map(|id| (role.normalized_name.clone(), id)),
                    _ => None,
                })
                .collect())
        }

        async fn apply(&mut self, writes: &PendingWrites) -> ImportResult<usize> {
            self.apply_calls += 1;
            if self.fail_on_apply == Some(self.apply_calls) {
                return Err(ImportError::Store(format!(
                    "injected failure on apply #{}",
                    self.apply_calls
                )));
            }

            let mut staged = self.records.clone();
            for record in writes.updates() {
                let key = record
                    .lookup_key()
                    .ok_or_else(|| ImportError::Store("claims are never updated".to_string()))?;
                let slot = staged
                    .iter_mut()
                    .find(|existing| existing.matches(&key))
                    .ok_or_else(|| ImportError::Store(format!("update target missing: {key:?}")))?;
                *slot = record.clone();
            }
            for record in writes.inserts() {
                let clash = record
                    .identity_keys()
                    .iter()
                    .any(|key| staged.iter().any(|existing| existing.matches(key)));
                if clash {
                    return Err(ImportError::Store(format!(
                        "unique key violation: {:?}",
                        record.lookup_key()
                    )));
                }
                staged.push(record.clone());
            }

            let inserted = writes.inserts().len();
            let first_new = staged.len() - inserted;
            let fresh: Vec<Record> = staged.drain(first_new..).collect();
            self.records = staged;
            for record in fresh {
                self.insert_record(record);
            }
            Ok(inserted)
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::db::postgres_migrator;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral Postgres database with the importer schema applied.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            connection_string: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh database by launching a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stdout(
                        "database system is ready to accept connections",
                    ))
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions = admin_url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("import_{}", Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", database_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&database_name))
                    .await?;

                postgres_migrator().run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    connection_string: format!(
                        "postgres://postgres:postgres@{}:{}/{}",
                        host, port, database_name
                    ),
                    database_name,
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// URL of the ephemeral database, for code that opens its own pool.
            pub fn connection_string(&self) -> &str {
                &self.connection_string
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database(self.admin_options.clone(), &self.database_name).await?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", database_name);
            sqlx::query(&drop_sql).execute(&admin_pool).await?;
            Ok(())
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::auth::UuidGenerator;
        use crate::import::batch::BatchWriter;
        use crate::models::{Customer, Role};
        use std::sync::Arc;

        fn customer(code: &str) -> Record {
            Record::Customer(Customer {
                id: None,
                code: code.into(),
                name: code.into(),
                email: None,
            })
        }

        fn writer_with(records: Vec<Record>) -> BatchWriter {
            let mut writer = BatchWriter::new(10, Arc::new(UuidGenerator));
            for record in records {
                writer.stage_insert(record);
            }
            writer
        }

        #[tokio::test]
        async fn failing_apply_leaves_records_untouched() {
            let mut store = MemoryStore::new().fail_on_apply(2);
            assert_eq!(store.apply(&PendingWrites::default()).await.unwrap(), 0);

            let writer = writer_with(vec![customer("A")]);
            assert!(store.apply(writer.pending()).await.is_err());
            assert_eq!(store.count(EntityKind::Customer), 0);
            assert_eq!(store.apply(writer.pending()).await.unwrap(), 1);
            assert_eq!(store.apply_calls(), 3);
        }

        #[tokio::test]
        async fn duplicate_insert_is_a_unique_violation() {
            let mut store = MemoryStore::new().with_record(customer("A"));
            let writer = writer_with(vec![customer("B"), customer("A")]);
            assert!(store.apply(writer.pending()).await.is_err());
            assert_eq!(store.count(EntityKind::Customer), 1);
        }

        #[tokio::test]
        async fn seeded_records_get_surrogate_ids() {
            let mut store = MemoryStore::new()
                .with_record(customer("A"))
                .with_record(Record::Role(Role {
                    id: Some("r1".into()),
                    name: "Admin".into(),
                    normalized_name: "ADMIN".into(),
                    concurrency_stamp: None,
                }));
            let Some(Record::Customer(stored)) =
                store.find(&LookupKey::CustomerCode("A".into())).await.unwrap()
            else {
                panic!("customer");
            };
            assert!(stored.id.is_some());
            assert_eq!(
                store.role_directory().await.unwrap(),
                vec![("ADMIN".to_string(), "r1".to_string())]
            );
        }
    }
}
