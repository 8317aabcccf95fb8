//! Connection setup and schema migrations.

use sqlx::migrate::Migrator;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;

use crate::config::{ImportSettings, Provider};
use crate::error::{ImportError, ImportResult};
use crate::store::{MySqlStore, PgStore, Store};

static PG_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");
static MYSQL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");

const MAX_CONNECTIONS: u32 = 5;

/// Open a pool for the configured provider and bring the schema up to date.
///
/// `SqlServer` is recognised by the settings layer but has no driver here;
/// it fails before any connection attempt.
pub async fn connect(settings: &ImportSettings) -> ImportResult<Store> {
    settings.validate()?;

    match settings.provider {
        Provider::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect(&settings.connection_string)
                .await?;
            run_migrations(&PG_MIGRATOR, &pool).await?;
            Ok(Store::Postgres(PgStore::new(pool)))
        }
        Provider::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect(&settings.connection_string)
                .await?;
            run_migrations(&MYSQL_MIGRATOR, &pool).await?;
            Ok(Store::MySql(MySqlStore::new(pool)))
        }
        Provider::SqlServer => Err(ImportError::DriverUnavailable(Provider::SqlServer)),
    }
}

/// Apply pending migrations. Already applied migrations are skipped.
async fn run_migrations<'a, A>(migrator: &Migrator, pool: A) -> ImportResult<()>
where
    A: sqlx::Acquire<'a>,
    <A::Connection as std::ops::Deref>::Target: sqlx::migrate::Migrate,
{
    log::info!("checking database migration state");
    migrator.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}

/// Postgres migrator, exposed for test databases.
pub fn postgres_migrator() -> &'static Migrator {
    &PG_MIGRATOR
}
