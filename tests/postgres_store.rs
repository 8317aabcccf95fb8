use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use identity_import::auth::{CredentialHasher, PasswordService, UuidGenerator};
use identity_import::config::{ImportSettings, Provider};
use identity_import::db;
use identity_import::import::{Dispatcher, ImportReport, PipelineOptions};
use identity_import::store::{EntityStore, PgStore};
use identity_import::test_support::TestDatabase;

async fn test_database() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping postgres test: {err}");
            None
        }
    }
}

fn csv_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write csv");
    file
}

async fn import<S: EntityStore>(store: &mut S, entity: &str, contents: &str) -> ImportReport {
    let file = csv_file(contents);
    let dispatcher = Dispatcher::new(
        Arc::new(PasswordService::new().expect("hasher")),
        Arc::new(UuidGenerator),
    );
    dispatcher
        .dispatch(
            entity,
            file.path(),
            store,
            PipelineOptions {
                batch_size: 2,
                ..PipelineOptions::default()
            },
            CancellationToken::new(),
        )
        .await
        .expect("import succeeds")
}

#[tokio::test]
async fn identity_entities_round_trip_through_postgres() {
    let Some(test_db) = test_database().await else {
        return;
    };
    let pool = test_db.pool().clone();
    let mut store = PgStore::new(pool.clone());

    let roles = import(&mut store, "role", "Name\nAdmin\nOps\nadmin\n").await;
    assert_eq!(roles.counters.inserted, 2);
    assert_eq!(roles.counters.updated, 1);

    let users = import(
        &mut store,
        "user",
        "Id,UserName,Email,Roles,Password\nu1,alice,alice@example.com,Admin;Ops;Ghost,s3cret\nu2,bob,,,\n",
    )
    .await;
    assert_eq!(users.counters.inserted, 2);
    assert_eq!(users.warnings, vec!["role not found (skipped): Ghost".to_string()]);

    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE user_id = 'u1'")
        .fetch_one(&pool)
        .await
        .expect("count links");
    assert_eq!(links, 2);

    let hash: Option<String> = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = 'u1'")
        .fetch_one(&pool)
        .await
        .expect("hash");
    let hash = hash.expect("password hashed");
    assert!(PasswordService::new().unwrap().verify("s3cret", &hash).unwrap());

    let rerun = import(
        &mut store,
        "user",
        "Id,UserName,Email,Roles,Password\nu1,alice,alice@example.com,Admin;Ops,s3cret\n",
    )
    .await;
    assert_eq!(rerun.counters.inserted, 0);
    assert_eq!(rerun.counters.updated, 0);

    let admin_id: String = sqlx::query_scalar("SELECT id FROM roles WHERE normalized_name = 'ADMIN'")
        .fetch_one(&pool)
        .await
        .expect("admin role");
    let claims = import(
        &mut store,
        "roleclaim",
        &format!(
            "RoleId,ClaimType,ClaimValue\n{admin_id},perm,read\n{admin_id},perm,read\nmissing,perm,read\n"
        ),
    )
    .await;
    assert_eq!(claims.counters.inserted, 1);
    assert_eq!(claims.counters.duplicates, 1);
    assert_eq!(claims.counters.invalid, 1);

    let tokens = import(
        &mut store,
        "usertoken",
        "UserId,LoginProvider,Name,Value\nu1,Authenticator,Key,abc\nu1,Authenticator,Key,def\n",
    )
    .await;
    assert_eq!(tokens.counters.inserted, 1);
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM user_tokens WHERE user_id = 'u1' AND name = 'Key'")
            .fetch_one(&pool)
            .await
            .expect("token");
    assert_eq!(value.as_deref(), Some("def"));

    let employees = import(
        &mut store,
        "extemployee",
        "EmployeeId,PositionId,EmployeeName,LastUpdate,HelperEmployeePositionTypeId\nE1,P1,Dana,2024-03-01,2\n",
    )
    .await;
    assert_eq!(employees.counters.inserted, 1);
    let updated = import(
        &mut store,
        "extemployee",
        "EmployeeId,PositionId,EmployeeName,LastUpdate,HelperEmployeePositionTypeId\nE1,P1,Dana R,2024-03-02,2\n",
    )
    .await;
    assert_eq!(updated.counters.updated, 1);

    test_db.close().await.expect("cleanup");
}

#[tokio::test]
async fn connect_runs_migrations_for_postgres() {
    let Some(test_db) = test_database().await else {
        return;
    };

    let settings = ImportSettings {
        provider: Provider::Postgres,
        connection_string: test_db.connection_string().to_string(),
        ..ImportSettings::default()
    };
    let mut store = db::connect(&settings).await.expect("connect");
    let report = import(&mut store, "customer", "Code,Name\nA,Acme\nB,Beta\nC,Gamma\n").await;
    assert_eq!(report.counters.inserted, 3);
    store.close().await;

    test_db.close().await.expect("cleanup");
}
