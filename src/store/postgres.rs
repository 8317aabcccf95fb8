//! Postgres driver.
//!
//! Inserts are written column-wise through `UNNEST`, one statement per entity
//! per flush. Updates are issued row by row inside the same transaction.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::{ImportError, ImportResult};
use crate::import::batch::PendingWrites;
use crate::models::{
    Customer, EntityKind, ExtEmployee, LookupKey, Record, ReferenceTarget, Role, RoleClaim, User,
    UserClaim, UserLogin, UserToken,
};
use crate::store::{ClaimPair, EntityStore};

const EMPLOYEE_COLUMNS: &str = "id, employee_id, employee_name, position_id, position_name, \
    area, plant_area, directorate, function, department, email, level, superior_id, \
    superior_position_id, user_name, unit, posgrd, cost_center, entity, last_update, \
    helper_is_delegate, helper_employee_position_type_id";

const USER_COLUMNS: &str = "id, user_name, normalized_user_name, email, normalized_email, \
    phone_number, email_confirmed, password_hash, security_stamp, concurrency_stamp";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user(&self, column: &str, value: &str) -> ImportResult<Option<Record>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let Some(mut user) = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        if let Some(id) = &user.id {
            user.role_ids = sqlx::query_scalar(
                "SELECT role_id FROM user_roles WHERE user_id = $1 ORDER BY role_id",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        }
        Ok(Some(Record::User(user)))
    }
}

impl EntityStore for PgStore {
    async fn exists(&mut self, target: ReferenceTarget, key: &str) -> ImportResult<bool> {
        let sql = match target {
            ReferenceTarget::Role => "SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)",
            ReferenceTarget::User => "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)",
        };
        let found: bool = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn load_claim_keys(
        &mut self,
        kind: EntityKind,
        parent: &str,
    ) -> ImportResult<Vec<ClaimPair>> {
        let sql = match kind {
            EntityKind::RoleClaim => {
                "SELECT COALESCE(claim_type, ''), claim_value FROM role_claims WHERE role_id = $1"
            }
            EntityKind::UserClaim => {
                "SELECT COALESCE(claim_type, ''), claim_value FROM user_claims WHERE user_id = $1"
            }
            other => return Err(ImportError::Store(format!("{other:?} has no claims"))),
        };
        let pairs: Vec<ClaimPair> = sqlx::query_as(sql)
            .bind(parent)
            .fetch_all(&self.pool)
            .await?;
        Ok(pairs)
    }

    async fn find(&mut self, key: &LookupKey) -> ImportResult<Option<Record>> {
        let record = match key {
            LookupKey::CustomerCode(code) => {
                sqlx::query_as::<_, Customer>(
                    "SELECT id, code, name, email FROM customers WHERE code = $1",
                )
                .bind(code)
                .fetch_optional(&self.pool)
                .await?
                .map(Record::Customer)
            }
            LookupKey::RoleName(normalized) => sqlx::query_as::<_, Role>(
                "SELECT id, name, normalized_name, concurrency_stamp FROM roles WHERE normalized_name = $1",
            )
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?
            .map(Record::Role),
            LookupKey::UserId(id) => return self.find_user("id", id).await,
            LookupKey::UserName(normalized) => {
                return self.find_user("normalized_user_name", normalized).await;
            }
            LookupKey::Login {
                login_provider,
                provider_key,
            } => sqlx::query_as::<_, UserLogin>(
                "SELECT login_provider, provider_key, provider_display_name, user_id \
                 FROM user_logins WHERE login_provider = $1 AND provider_key = $2",
            )
            .bind(login_provider)
            .bind(provider_key)
            .fetch_optional(&self.pool)
            .await?
            .map(Record::UserLogin),
            LookupKey::Token {
                user_id,
                login_provider,
                name,
            } => sqlx::query_as::<_, UserToken>(
                "SELECT user_id, login_provider, name, value FROM user_tokens \
                 WHERE user_id = $1 AND login_provider = $2 AND name = $3",
            )
            .bind(user_id)
            .bind(login_provider)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(Record::UserToken),
            LookupKey::Employee {
                employee_id,
                position_id,
            } => {
                let sql = format!(
                    "SELECT {EMPLOYEE_COLUMNS} FROM external_data.ext_employee_from_sinta \
                     WHERE employee_id = $1 AND position_id = $2"
                );
                let row = sqlx::query(&sql)
                    .bind(employee_id)
                    .bind(position_id)
                    .fetch_optional(&self.pool)
                    .await?;
                match row {
                    Some(row) => Some(Record::ExtEmployee(employee_from_row(&row)?)),
                    None => None,
                }
            }
        };
        Ok(record)
    }

    async fn role_directory(&mut self) -> ImportResult<Vec<(String, String)>> {
        let roles: Vec<(String, String)> =
            sqlx::query_as("SELECT normalized_name, id FROM roles")
                .fetch_all(&self.pool)
                .await?;
        Ok(roles)
    }

    async fn apply(&mut self, writes: &PendingWrites) -> ImportResult<usize> {
        let mut tx = self.pool.begin().await?;

        let inserted = insert_records(&mut tx, writes.inserts()).await?;
        for record in writes.updates() {
            update_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        log::trace!(
            "postgres batch committed: {} inserted, {} updated",
            inserted,
            writes.updates().len()
        );
        Ok(inserted)
    }
}

fn employee_from_row(row: &PgRow) -> Result<ExtEmployee, sqlx::Error> {
    let position_type: Option<i16> = row.try_get("helper_employee_position_type_id")?;
    Ok(ExtEmployee {
        id: row.try_get("id")?,
        employee_id: row.try_get("employee_id")?,
        employee_name: row.try_get("employee_name")?,
        position_id: row.try_get("position_id")?,
        position_name: row.try_get("position_name")?,
        area: row.try_get("area")?,
        plant_area: row.try_get("plant_area")?,
        directorate: row.try_get("directorate")?,
        function: row.try_get("function")?,
        department: row.try_get("department")?,
        email: row.try_get("email")?,
        level: row.try_get("level")?,
        superior_id: row.try_get("superior_id")?,
        superior_position_id: row.try_get("superior_position_id")?,
        user_name: row.try_get("user_name")?,
        unit: row.try_get("unit")?,
        posgrd: row.try_get("posgrd")?,
        cost_center: row.try_get("cost_center")?,
        entity: row.try_get("entity")?,
        last_update: row.try_get("last_update")?,
        helper_is_delegate: row.try_get("helper_is_delegate")?,
        helper_employee_position_type_id: position_type.and_then(|v| u8::try_from(v).ok()),
    })
}

/// Values filled by the batch writer before a flush.
fn generated(value: &Option<String>, what: &str) -> ImportResult<String> {
    value
        .clone()
        .ok_or_else(|| ImportError::Store(format!("{what} reached the store without a value")))
}

async fn insert_records(
    tx: &mut Transaction<'_, Postgres>,
    records: &[Record],
) -> ImportResult<usize> {
    let mut customers = Vec::new();
    let mut roles = Vec::new();
    let mut users = Vec::new();
    let mut role_claims = Vec::new();
    let mut user_claims = Vec::new();
    let mut logins = Vec::new();
    let mut tokens = Vec::new();
    let mut employees = Vec::new();

    for record in records {
        match record {
            Record::Customer(c) => customers.push(c),
            Record::Role(r) => roles.push(r),
            Record::User(u) => users.push(u),
            Record::RoleClaim(c) => role_claims.push(c),
            Record::UserClaim(c) => user_claims.push(c),
            Record::UserLogin(l) => logins.push(l),
            Record::UserToken(t) => tokens.push(t),
            Record::ExtEmployee(e) => employees.push(e),
        }
    }

    let mut inserted = 0;
    inserted += insert_customers(tx, &customers).await?;
    inserted += insert_roles(tx, &roles).await?;
    inserted += insert_users(tx, &users).await?;
    inserted += insert_role_claims(tx, &role_claims).await?;
    inserted += insert_user_claims(tx, &user_claims).await?;
    inserted += insert_logins(tx, &logins).await?;
    inserted += insert_tokens(tx, &tokens).await?;
    inserted += insert_employees(tx, &employees).await?;
    Ok(inserted)
}

async fn insert_customers(
    tx: &mut Transaction<'_, Postgres>,
    customers: &[&Customer],
) -> ImportResult<usize> {
    if customers.is_empty() {
        return Ok(0);
    }

    let mut codes = Vec::with_capacity(customers.len());
    let mut names = Vec::with_capacity(customers.len());
    let mut emails = Vec::with_capacity(customers.len());
    for customer in customers {
        codes.push(customer.code.clone());
        names.push(customer.name.clone());
        emails.push(customer.email.clone());
    }

    let result = sqlx::query(
        r#"INSERT INTO customers (code, name, email)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])"#,
    )
    .bind(&codes)
    .bind(&names)
    .bind(&emails)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_roles(tx: &mut Transaction<'_, Postgres>, roles: &[&Role]) -> ImportResult<usize> {
    if roles.is_empty() {
        return Ok(0);
    }

    let mut ids = Vec::with_capacity(roles.len());
    let mut names = Vec::with_capacity(roles.len());
    let mut normalized = Vec::with_capacity(roles.len());
    let mut stamps = Vec::with_capacity(roles.len());
    for role in roles {
        ids.push(generated(&role.id, "role id")?);
        names.push(role.name.clone());
        normalized.push(role.normalized_name.clone());
        stamps.push(role.concurrency_stamp.clone());
    }

    let result = sqlx::query(
        r#"INSERT INTO roles (id, name, normalized_name, concurrency_stamp)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])"#,
    )
    .bind(&ids)
    .bind(&names)
    .bind(&normalized)
    .bind(&stamps)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_users(tx: &mut Transaction<'_, Postgres>, users: &[&User]) -> ImportResult<usize> {
    if users.is_empty() {
        return Ok(0);
    }

    let mut ids = Vec::with_capacity(users.len());
    let mut user_names = Vec::with_capacity(users.len());
    let mut normalized_names = Vec::with_capacity(users.len());
    let mut emails = Vec::with_capacity(users.len());
    let mut normalized_emails = Vec::with_capacity(users.len());
    let mut phones = Vec::with_capacity(users.len());
    let mut confirmed = Vec::with_capacity(users.len());
    let mut hashes = Vec::with_capacity(users.len());
    let mut security_stamps = Vec::with_capacity(users.len());
    let mut concurrency_stamps = Vec::with_capacity(users.len());
    for user in users {
        ids.push(generated(&user.id, "user id")?);
        user_names.push(user.user_name.clone());
        normalized_names.push(user.normalized_user_name.clone());
        emails.push(user.email.clone());
        normalized_emails.push(user.normalized_email.clone());
        phones.push(user.phone_number.clone());
        confirmed.push(user.email_confirmed.unwrap_or(false));
        hashes.push(user.password_hash.clone());
        security_stamps.push(user.security_stamp.clone());
        concurrency_stamps.push(user.concurrency_stamp.clone());
    }

    let result = sqlx::query(
        r#"INSERT INTO users (id, user_name, normalized_user_name, email, normalized_email,
                              phone_number, email_confirmed, password_hash, security_stamp,
                              concurrency_stamp)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                                $6::text[], $7::bool[], $8::text[], $9::text[], $10::text[])"#,
    )
    .bind(&ids)
    .bind(&user_names)
    .bind(&normalized_names)
    .bind(&emails)
    .bind(&normalized_emails)
    .bind(&phones)
    .bind(&confirmed)
    .bind(&hashes)
    .bind(&security_stamps)
    .bind(&concurrency_stamps)
    .execute(&mut **tx)
    .await?;

    link_roles(tx, users).await?;
    Ok(result.rows_affected() as usize)
}

/// Add user-role links. Existing links are left alone.
async fn link_roles(tx: &mut Transaction<'_, Postgres>, users: &[&User]) -> ImportResult<()> {
    let mut user_ids = Vec::new();
    let mut role_ids = Vec::new();
    for user in users {
        let user_id = generated(&user.id, "user id")?;
        for role_id in &user.role_ids {
            user_ids.push(user_id.clone());
            role_ids.push(role_id.clone());
        }
    }
    if user_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"INSERT INTO user_roles (user_id, role_id)
           SELECT * FROM UNNEST($1::text[], $2::text[])
           ON CONFLICT DO NOTHING"#,
    )
    .bind(&user_ids)
    .bind(&role_ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_role_claims(
    tx: &mut Transaction<'_, Postgres>,
    claims: &[&RoleClaim],
) -> ImportResult<usize> {
    if claims.is_empty() {
        return Ok(0);
    }

    let role_ids: Vec<String> = claims.iter().map(|c| c.role_id.clone()).collect();
    let types: Vec<String> = claims.iter().map(|c| c.claim_type.clone()).collect();
    let values: Vec<Option<String>> = claims.iter().map(|c| c.claim_value.clone()).collect();

    let result = sqlx::query(
        r#"INSERT INTO role_claims (role_id, claim_type, claim_value)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])"#,
    )
    .bind(&role_ids)
    .bind(&types)
    .bind(&values)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_user_claims(
    tx: &mut Transaction<'_, Postgres>,
    claims: &[&UserClaim],
) -> ImportResult<usize> {
    if claims.is_empty() {
        return Ok(0);
    }

    let user_ids: Vec<String> = claims.iter().map(|c| c.user_id.clone()).collect();
    let types: Vec<String> = claims.iter().map(|c| c.claim_type.clone()).collect();
    let values: Vec<Option<String>> = claims.iter().map(|c| c.claim_value.clone()).collect();

    let result = sqlx::query(
        r#"INSERT INTO user_claims (user_id, claim_type, claim_value)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])"#,
    )
    .bind(&user_ids)
    .bind(&types)
    .bind(&values)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_logins(
    tx: &mut Transaction<'_, Postgres>,
    logins: &[&UserLogin],
) -> ImportResult<usize> {
    if logins.is_empty() {
        return Ok(0);
    }

    let providers: Vec<String> = logins.iter().map(|l| l.login_provider.clone()).collect();
    let keys: Vec<String> = logins.iter().map(|l| l.provider_key.clone()).collect();
    let names: Vec<Option<String>> = logins
        .iter()
        .map(|l| l.provider_display_name.clone())
        .collect();
    let user_ids: Vec<String> = logins.iter().map(|l| l.user_id.clone()).collect();

    let result = sqlx::query(
        r#"INSERT INTO user_logins (login_provider, provider_key, provider_display_name, user_id)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])"#,
    )
    .bind(&providers)
    .bind(&keys)
    .bind(&names)
    .bind(&user_ids)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_tokens(
    tx: &mut Transaction<'_, Postgres>,
    tokens: &[&UserToken],
) -> ImportResult<usize> {
    if tokens.is_empty() {
        return Ok(0);
    }

    let user_ids: Vec<String> = tokens.iter().map(|t| t.user_id.clone()).collect();
    let providers: Vec<String> = tokens.iter().map(|t| t.login_provider.clone()).collect();
    let names: Vec<String> = tokens.iter().map(|t| t.name.clone()).collect();
    let values: Vec<Option<String>> = tokens.iter().map(|t| t.value.clone()).collect();

    let result = sqlx::query(
        r#"INSERT INTO user_tokens (user_id, login_provider, name, value)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])"#,
    )
    .bind(&user_ids)
    .bind(&providers)
    .bind(&names)
    .bind(&values)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_employees(
    tx: &mut Transaction<'_, Postgres>,
    employees: &[&ExtEmployee],
) -> ImportResult<usize> {
    if employees.is_empty() {
        return Ok(0);
    }

    fn text(
        employees: &[&ExtEmployee],
        field: impl Fn(&ExtEmployee) -> &Option<String>,
    ) -> Vec<Option<String>> {
        employees.iter().map(|e| field(*e).clone()).collect()
    }

    let employee_ids: Vec<String> = employees.iter().map(|e| e.employee_id.clone()).collect();
    let position_ids: Vec<String> = employees.iter().map(|e| e.position_id.clone()).collect();
    let last_updates: Vec<_> = employees.iter().map(|e| e.last_update).collect();
    let delegates: Vec<Option<bool>> = employees.iter().map(|e| e.helper_is_delegate).collect();
    let position_types: Vec<Option<i16>> = employees
        .iter()
        .map(|e| e.helper_employee_position_type_id.map(i16::from))
        .collect();

    let result = sqlx::query(
        r#"INSERT INTO external_data.ext_employee_from_sinta (
               employee_id, employee_name, position_id, position_name, area, plant_area,
               directorate, function, department, email, level, superior_id,
               superior_position_id, user_name, unit, posgrd, cost_center, entity,
               last_update, helper_is_delegate, helper_employee_position_type_id)
           SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                                $6::text[], $7::text[], $8::text[], $9::text[], $10::text[],
                                $11::text[], $12::text[], $13::text[], $14::text[], $15::text[],
                                $16::text[], $17::text[], $18::text[], $19::timestamp[],
                                $20::bool[], $21::smallint[])"#,
    )
    .bind(&employee_ids)
    .bind(text(employees, |e| &e.employee_name))
    .bind(&position_ids)
    .bind(text(employees, |e| &e.position_name))
    .bind(text(employees, |e| &e.area))
    .bind(text(employees, |e| &e.plant_area))
    .bind(text(employees, |e| &e.directorate))
    .bind(text(employees, |e| &e.function))
    .bind(text(employees, |e| &e.department))
    .bind(text(employees, |e| &e.email))
    .bind(text(employees, |e| &e.level))
    .bind(text(employees, |e| &e.superior_id))
    .bind(text(employees, |e| &e.superior_position_id))
    .bind(text(employees, |e| &e.user_name))
    .bind(text(employees, |e| &e.unit))
    .bind(text(employees, |e| &e.posgrd))
    .bind(text(employees, |e| &e.cost_center))
    .bind(text(employees, |e| &e.entity))
    .bind(&last_updates)
    .bind(&delegates)
    .bind(&position_types)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn update_record(tx: &mut Transaction<'_, Postgres>, record: &Record) -> ImportResult<()> {
    match record {
        Record::Customer(c) => {
            sqlx::query("UPDATE customers SET name = $2, email = $3 WHERE code = $1")
                .bind(&c.code)
                .bind(&c.name)
                .bind(&c.email)
                .execute(&mut **tx)
                .await?;
        }
        Record::Role(r) => {
            sqlx::query(
                "UPDATE roles SET name = $2, normalized_name = $3, concurrency_stamp = $4 WHERE id = $1",
            )
            .bind(generated(&r.id, "role id")?)
            .bind(&r.name)
            .bind(&r.normalized_name)
            .bind(&r.concurrency_stamp)
            .execute(&mut **tx)
            .await?;
        }
        Record::User(u) => {
            sqlx::query(
                r#"UPDATE users SET user_name = $2, normalized_user_name = $3, email = $4,
                       normalized_email = $5, phone_number = $6, email_confirmed = $7,
                       password_hash = $8, security_stamp = $9, concurrency_stamp = $10
                   WHERE id = $1"#,
            )
            .bind(generated(&u.id, "user id")?)
            .bind(&u.user_name)
            .bind(&u.normalized_user_name)
            .bind(&u.email)
            .bind(&u.normalized_email)
            .bind(&u.phone_number)
            .bind(u.email_confirmed.unwrap_or(false))
            .bind(&u.password_hash)
            .bind(&u.security_stamp)
            .bind(&u.concurrency_stamp)
            .execute(&mut **tx)
            .await?;
            link_roles(tx, &[u]).await?;
        }
        Record::RoleClaim(_) | Record::UserClaim(_) => {
            return Err(ImportError::Store("claims are never updated".to_string()));
        }
        Record::UserLogin(l) => {
            sqlx::query(
                "UPDATE user_logins SET provider_display_name = $3, user_id = $4 \
                 WHERE login_provider = $1 AND provider_key = $2",
            )
            .bind(&l.login_provider)
            .bind(&l.provider_key)
            .bind(&l.provider_display_name)
            .bind(&l.user_id)
            .execute(&mut **tx)
            .await?;
        }
        Record::UserToken(t) => {
            sqlx::query(
                "UPDATE user_tokens SET value = $4 \
                 WHERE user_id = $1 AND login_provider = $2 AND name = $3",
            )
            .bind(&t.user_id)
            .bind(&t.login_provider)
            .bind(&t.name)
            .bind(&t.value)
            .execute(&mut **tx)
            .await?;
        }
        Record::ExtEmployee(e) => {
            sqlx::query(
                r#"UPDATE external_data.ext_employee_from_sinta SET
                       employee_name = $3, position_name = $4, area = $5, plant_area = $6,
                       directorate = $7, function = $8, department = $9, email = $10,
                       level = $11, superior_id = $12, superior_position_id = $13,
                       user_name = $14, unit = $15, posgrd = $16, cost_center = $17,
                       entity = $18, last_update = $19, helper_is_delegate = $20,
                       helper_employee_position_type_id = $21
                   WHERE employee_id = $1 AND position_id = $2"#,
            )
            .bind(&e.employee_id)
            .bind(&e.position_id)
            .bind(&e.employee_name)
            .bind(&e.position_name)
            .bind(&e.area)
            .bind(&e.plant_area)
            .bind(&e.directorate)
            .bind(&e.function)
            .bind(&e.department)
            .bind(&e.email)
            .bind(&e.level)
            .bind(&e.superior_id)
            .bind(&e.superior_position_id)
            .bind(&e.user_name)
            .bind(&e.unit)
            .bind(&e.posgrd)
            .bind(&e.cost_center)
            .bind(&e.entity)
            .bind(e.last_update)
            .bind(e.helper_is_delegate)
            .bind(e.helper_employee_position_type_id.map(i16::from))
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}
