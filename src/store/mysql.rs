//! MySQL / MariaDB driver.
//!
//! Same contract as the Postgres driver. Bulk inserts are multi-row
//! `INSERT .. VALUES` statements built with [`QueryBuilder`].

use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row, Transaction};

use crate::error::{ImportError, ImportResult};
use crate::import::batch::PendingWrites;
use crate::models::{
    Customer, EntityKind, ExtEmployee, LookupKey, Record, ReferenceTarget, Role, User, UserLogin,
    UserToken,
};
use crate::store::{ClaimPair, EntityStore};

const EMPLOYEE_COLUMNS: &str = "id, employee_id, employee_name, position_id, position_name, \
    area, plant_area, directorate, `function`, department, email, `level`, superior_id, \
    superior_position_id, user_name, unit, posgrd, cost_center, entity, last_update, \
    helper_is_delegate, helper_employee_position_type_id";

/// Placeholder limit of one MySQL prepared statement.
const MAX_BIND_PARAMS: usize = 65_535;

const USER_COLUMNS: &str = "id, user_name, normalized_user_name, email, normalized_email, \
    phone_number, email_confirmed, password_hash, security_stamp, concurrency_stamp";

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn find_user(&self, column: &str, value: &str) -> ImportResult<Option<Record>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
        let Some(mut user) = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        if let Some(id) = &user.id {
            user.role_ids =
                sqlx::query_scalar("SELECT role_id FROM user_roles WHERE user_id = ? ORDER BY role_id")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?;
        }
        Ok(Some(Record::User(user)))
    }
}

impl EntityStore for MySqlStore {
    async fn exists(&mut self, target: ReferenceTarget, key: &str) -> ImportResult<bool> {
        let sql = match target {
            ReferenceTarget::Role => "SELECT COUNT(*) FROM roles WHERE id = ?",
            ReferenceTarget::User => "SELECT COUNT(*) FROM users WHERE id = ?",
        };
        let count: i64 = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn load_claim_keys(
        &mut self,
        kind: EntityKind,
        parent: &str,
    ) -> ImportResult<Vec<ClaimPair>> {
        let sql = match kind {
            EntityKind::RoleClaim => {
                "SELECT COALESCE(claim_type, ''), claim_value FROM role_claims WHERE role_id = ?"
            }
            EntityKind::UserClaim => {
                "SELECT COALESCE(claim_type, ''), claim_value FROM user_claims WHERE user_id = ?"
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
                sqlx::query_as::<_, Customer>("SELECT id, code, name, email FROM customers WHERE code = ?")
                    .bind(code)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(Record::Customer)
            }
            LookupKey::RoleName(normalized) => sqlx::query_as::<_, Role>(
                "SELECT id, name, normalized_name, concurrency_stamp FROM roles WHERE normalized_name = ?",
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
                 FROM user_logins WHERE login_provider = ? AND provider_key = ?",
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
                 WHERE user_id = ? AND login_provider = ? AND name = ?",
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
                    "SELECT {EMPLOYEE_COLUMNS} FROM ext_employee_from_sinta \
                     WHERE employee_id = ? AND position_id = ?"
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
        let roles: Vec<(String, String)> = sqlx::query_as("SELECT normalized_name, id FROM roles")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn apply(&mut self, writes: &PendingWrites) -> ImportResult<usize> {
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0;
        for kind in kinds_in(writes.inserts()) {
            let group: Vec<&Record> = writes
                .inserts()
                .iter()
                .filter(|record| record.kind() == kind)
                .collect();
            for chunk in group.chunks(rows_per_statement(bind_columns(kind))) {
                inserted += insert_group(&mut tx, kind, chunk).await?;
            }
        }
        for record in writes.updates() {
            update_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        log::trace!(
            "mysql batch committed: {} inserted, {} updated",
            inserted,
            writes.updates().len()
        );
        Ok(inserted)
    }
}

/// Distinct kinds in first-seen order.
fn kinds_in(records: &[Record]) -> Vec<EntityKind> {
    let mut kinds = Vec::new();
    for record in records {
        if !kinds.contains(&record.kind()) {
            kinds.push(record.kind());
        }
    }
    kinds
}

/// Bound values per inserted row.
fn bind_columns(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Customer | EntityKind::RoleClaim | EntityKind::UserClaim => 3,
        EntityKind::Role | EntityKind::UserLogin | EntityKind::UserToken => 4,
        EntityKind::User => 10,
        EntityKind::ExtEmployee => 21,
    }
}

/// Rows that fit in one multi-row statement.
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn employee_from_row(row: &MySqlRow) -> Result<ExtEmployee, sqlx::Error> {
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
        helper_employee_position_type_id: row.try_get("helper_employee_position_type_id")?,
    })
}

fn generated(value: &Option<String>, what: &str) -> ImportResult<String> {
    value
        .clone()
        .ok_or_else(|| ImportError::Store(format!("{what} reached the store without a value")))
}

async fn insert_group(
    tx: &mut Transaction<'_, MySql>,
    kind: EntityKind,
    records: &[&Record],
) -> ImportResult<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<'_, MySql> = match kind {
        EntityKind::Customer => {
            let mut qb = QueryBuilder::new("INSERT INTO customers (code, name, email) ");
            qb.push_values(records, |mut b, record| {
                if let Record::Customer(c) = record {
                    b.push_bind(c.code.clone())
                        .push_bind(c.name.clone())
                        .push_bind(c.email.clone());
                }
            });
            qb
        }
        EntityKind::Role => {
            let ids = records
                .iter()
                .filter_map(|record| match record {
                    Record::Role(r) => Some(generated(&r.id, "role id")),
                    _ => None,
                })
                .collect::<ImportResult<Vec<_>>>()?;
            let mut qb = QueryBuilder::new(
                "INSERT INTO roles (id, name, normalized_name, concurrency_stamp) ",
            );
            qb.push_values(records.iter().zip(ids), |mut b, (record, id)| {
                if let Record::Role(r) = record {
                    b.push_bind(id)
                        .push_bind(r.name.clone())
                        .push_bind(r.normalized_name.clone())
                        .push_bind(r.concurrency_stamp.clone());
                }
            });
            qb
        }
        EntityKind::User => {
            let users: Vec<&User> = records
                .iter()
                .filter_map(|record| match record {
                    Record::User(u) => Some(u),
                    _ => None,
                })
                .collect();
            let ids = users
                .iter()
                .map(|u| generated(&u.id, "user id"))
                .collect::<ImportResult<Vec<_>>>()?;
            let mut qb = QueryBuilder::new(
                "INSERT INTO users (id, user_name, normalized_user_name, email, normalized_email, \
                 phone_number, email_confirmed, password_hash, security_stamp, concurrency_stamp) ",
            );
            qb.push_values(users.iter().zip(ids), |mut b, (u, id)| {
                b.push_bind(id)
                    .push_bind(u.user_name.clone())
                    .push_bind(u.normalized_user_name.clone())
                    .push_bind(u.email.clone())
                    .push_bind(u.normalized_email.clone())
                    .push_bind(u.phone_number.clone())
                    .push_bind(u.email_confirmed.unwrap_or(false))
                    .push_bind(u.password_hash.clone())
                    .push_bind(u.security_stamp.clone())
                    .push_bind(u.concurrency_stamp.clone());
            });
            let result = qb.build().execute(&mut **tx).await?;
            link_roles(tx, &users).await?;
            return Ok(result.rows_affected() as usize);
        }
        EntityKind::RoleClaim => {
            let mut qb =
                QueryBuilder::new("INSERT INTO role_claims (role_id, claim_type, claim_value) ");
            qb.push_values(records, |mut b, record| {
                if let Record::RoleClaim(c) = record {
                    b.push_bind(c.role_id.clone())
                        .push_bind(c.claim_type.clone())
                        .push_bind(c.claim_value.clone());
                }
            });
            qb
        }
        EntityKind::UserClaim => {
            let mut qb =
                QueryBuilder::new("INSERT INTO user_claims (user_id, claim_type, claim_value) ");
            qb.push_values(records, |mut b, record| {
                if let Record::UserClaim(c) = record {
                    b.push_bind(c.user_id.clone())
                        .push_bind(c.claim_type.clone())
                        .push_bind(c.claim_value.clone());
                }
            });
            qb
        }
        EntityKind::UserLogin => {
            let mut qb = QueryBuilder::new(
                "INSERT INTO user_logins (login_provider, provider_key, provider_display_name, user_id) ",
            );
            qb.push_values(records, |mut b, record| {
                if let Record::UserLogin(l) = record {
                    b.push_bind(l.login_provider.clone())
                        .push_bind(l.provider_key.clone())
                        .push_bind(l.provider_display_name.clone())
                        .push_bind(l.user_id.clone());
                }
            });
            qb
        }
        EntityKind::UserToken => {
            let mut qb = QueryBuilder::new(
                "INSERT INTO user_tokens (user_id, login_provider, name, value) ",
            );
            qb.push_values(records, |mut b, record| {
                if let Record::UserToken(t) = record {
                    b.push_bind(t.user_id.clone())
                        .push_bind(t.login_provider.clone())
                        .push_bind(t.name.clone())
                        .push_bind(t.value.clone());
                }
            });
            qb
        }
        EntityKind::ExtEmployee => {
            let mut qb = QueryBuilder::new(
                "INSERT INTO ext_employee_from_sinta (employee_id, employee_name, position_id, \
                 position_name, area, plant_area, directorate, `function`, department, email, \
                 `level`, superior_id, superior_position_id, user_name, unit, posgrd, cost_center, \
                 entity, last_update, helper_is_delegate, helper_employee_position_type_id) ",
            );
            qb.push_values(records, |mut b, record| {
                if let Record::ExtEmployee(e) = record {
                    b.push_bind(e.employee_id.clone())
                        .push_bind(e.employee_name.clone())
                        .push_bind(e.position_id.clone())
                        .push_bind(e.position_name.clone())
                        .push_bind(e.area.clone())
                        .push_bind(e.plant_area.clone())
                        .push_bind(e.directorate.clone())
                        .push_bind(e.function.clone())
                        .push_bind(e.department.clone())
                        .push_bind(e.email.clone())
                        .push_bind(e.level.clone())
                        .push_bind(e.superior_id.clone())
                        .push_bind(e.superior_position_id.clone())
                        .push_bind(e.user_name.clone())
                        .push_bind(e.unit.clone())
                        .push_bind(e.posgrd.clone())
                        .push_bind(e.cost_center.clone())
                        .push_bind(e.entity.clone())
                        .push_bind(e.last_update)
                        .push_bind(e.helper_is_delegate)
                        .push_bind(e.helper_employee_position_type_id);
                }
            });
            qb
        }
    };

    let result = qb.build().execute(&mut **tx).await?;
    Ok(result.rows_affected() as usize)
}

/// Add user-role links. Existing links are left alone.
async fn link_roles(tx: &mut Transaction<'_, MySql>, users: &[&User]) -> ImportResult<()> {
    let mut links = Vec::new();
    for user in users {
        let user_id = generated(&user.id, "user id")?;
        for role_id in &user.role_ids {
            links.push((user_id.clone(), role_id.clone()));
        }
    }
    if links.is_empty() {
        return Ok(());
    }

    for chunk in links.chunks(rows_per_statement(2)) {
        let mut qb: QueryBuilder<'_, MySql> =
            QueryBuilder::new("INSERT IGNORE INTO user_roles (user_id, role_id) ");
        qb.push_values(chunk, |mut b, (user_id, role_id)| {
            b.push_bind(user_id.clone()).push_bind(role_id.clone());
        });
        qb.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn update_record(tx: &mut Transaction<'_, MySql>, record: &Record) -> ImportResult<()> {
    match record {
        Record::Customer(c) => {
            sqlx::query("UPDATE customers SET name = ?, email = ? WHERE code = ?")
                .bind(&c.name)
                .bind(&c.email)
                .bind(&c.code)
                .execute(&mut **tx)
                .await?;
        }
        Record::Role(r) => {
            sqlx::query(
                "UPDATE roles SET name = ?, normalized_name = ?, concurrency_stamp = ? WHERE id = ?",
            )
            .bind(&r.name)
            .bind(&r.normalized_name)
            .bind(&r.concurrency_stamp)
            .bind(generated(&r.id, "role id")?)
            .execute(&mut **tx)
            .await?;
        }
        Record::User(u) => {
            sqlx::query(
                r#"UPDATE users SET user_name = ?, normalized_user_name = ?, email = ?,
                       normalized_email = ?, phone_number = ?, email_confirmed = ?,
                       password_hash = ?, security_stamp = ?, concurrency_stamp = ?
                   WHERE id = ?"#,
            )
            .bind(&u.user_name)
            .bind(&u.normalized_user_name)
            .bind(&u.email)
            .bind(&u.normalized_email)
            .bind(&u.phone_number)
            .bind(u.email_confirmed.unwrap_or(false))
            .bind(&u.password_hash)
            .bind(&u.security_stamp)
            .bind(&u.concurrency_stamp)
            .bind(generated(&u.id, "user id")?)
            .execute(&mut **tx)
            .await?;
            link_roles(tx, &[u]).await?;
        }
        Record::RoleClaim(_) | Record::UserClaim(_) => {
            return Err(ImportError::Store("claims are never updated".to_string()));
        }
        Record::UserLogin(l) => {
            sqlx::query(
                "UPDATE user_logins SET provider_display_name = ?, user_id = ? \
                 WHERE login_provider = ? AND provider_key = ?",
            )
            .bind(&l.provider_display_name)
            .bind(&l.user_id)
            .bind(&l.login_provider)
            .bind(&l.provider_key)
            .execute(&mut **tx)
            .await?;
        }
        Record::UserToken(t) => {
            sqlx::query(
                "UPDATE user_tokens SET value = ? WHERE user_id = ? AND login_provider = ? AND name = ?",
            )
            .bind(&t.value)
            .bind(&t.user_id)
            .bind(&t.login_provider)
            .bind(&t.name)
            .execute(&mut **tx)
            .await?;
        }
        Record::ExtEmployee(e) => {
            sqlx::query(
                r#"UPDATE ext_employee_from_sinta SET
                       employee_name = ?, position_name = ?, area = ?, plant_area = ?,
                       directorate = ?, `function` = ?, department = ?, email = ?, `level` = ?,
                       superior_id = ?, superior_position_id = ?, user_name = ?, unit = ?,
                       posgrd = ?, cost_center = ?, entity = ?, last_update = ?,
                       helper_is_delegate = ?, helper_employee_position_type_id = ?
                   WHERE employee_id = ? AND position_id = ?"#,
            )
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
            .bind(e.helper_employee_position_type_id)
            .bind(&e.employee_id)
            .bind(&e.position_id)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}
