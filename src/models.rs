use chrono::NaiveDateTime;
use sqlx::FromRow;

// ===== Reference Data =====

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Customer {
    pub id: Option<i64>,
    pub code: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtEmployee {
    pub id: Option<i32>,
    pub employee_id: String,
    pub employee_name: Option<String>,
    pub position_id: String,
    pub position_name: Option<String>,
    pub area: Option<String>,
    pub plant_area: Option<String>,
    pub directorate: Option<String>,
    pub function: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub level: Option<String>,
    pub superior_id: Option<String>,
    pub superior_position_id: Option<String>,
    pub user_name: Option<String>,
    pub unit: Option<String>,
    pub posgrd: Option<String>,
    pub cost_center: Option<String>,
    pub entity: Option<String>,
    pub last_update: Option<NaiveDateTime>,
    pub helper_is_delegate: Option<bool>,
    pub helper_employee_position_type_id: Option<u8>,
}

// ===== Identity Models =====

/// `id` and `concurrency_stamp` are generated at insert time when absent.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Role {
    pub id: Option<String>,
    pub name: String,
    pub normalized_name: String,
    pub concurrency_stamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: Option<String>,
    pub user_name: String,
    pub normalized_user_name: String,
    pub email: Option<String>,
    pub normalized_email: Option<String>,
    pub phone_number: Option<String>,
    /// `None` when the CSV leaves it blank; stored as `false`.
    pub email_confirmed: Option<bool>,
    pub password_hash: Option<String>,
    pub security_stamp: Option<String>,
    pub concurrency_stamp: Option<String>,
    /// Linked role ids; links are only ever added.
    #[sqlx(skip)]
    pub role_ids: Vec<String>,
    /// Plaintext read from the CSV. Never persisted.
    #[sqlx(skip)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleClaim {
    pub id: Option<i32>,
    pub role_id: String,
    pub claim_type: String,
    pub claim_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClaim {
    pub id: Option<i32>,
    pub user_id: String,
    pub claim_type: String,
    pub claim_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserLogin {
    pub login_provider: String,
    pub provider_key: String,
    pub provider_display_name: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserToken {
    pub user_id: String,
    pub login_provider: String,
    pub name: String,
    pub value: Option<String>,
}

// ===== Pipeline Types =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Customer,
    Role,
    User,
    RoleClaim,
    UserClaim,
    UserLogin,
    UserToken,
    ExtEmployee,
}

/// Tables a foreign-key value can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceTarget {
    Role,
    User,
}

/// Identity under which a record is looked up in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    CustomerCode(String),
    RoleName(String),
    UserId(String),
    UserName(String),
    Login {
        login_provider: String,
        provider_key: String,
    },
    Token {
        user_id: String,
        login_provider: String,
        name: String,
    },
    Employee {
        employee_id: String,
        position_id: String,
    },
}

/// A record of any supported entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Customer(Customer),
    Role(Role),
    User(User),
    RoleClaim(RoleClaim),
    UserClaim(UserClaim),
    UserLogin(UserLogin),
    UserToken(UserToken),
    ExtEmployee(ExtEmployee),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Customer(_) => EntityKind::Customer,
            Record::Role(_) => EntityKind::Role,
            Record::User(_) => EntityKind::User,
            Record::RoleClaim(_) => EntityKind::RoleClaim,
            Record::UserClaim(_) => EntityKind::UserClaim,
            Record::UserLogin(_) => EntityKind::UserLogin,
            Record::UserToken(_) => EntityKind::UserToken,
            Record::ExtEmployee(_) => EntityKind::ExtEmployee,
        }
    }

    /// The key the store is queried with for this record.
    ///
    /// Claims have no natural key of their own; they are deduplicated through
    /// their parent instead and return `None`.
    pub fn lookup_key(&self) -> Option<LookupKey> {
        match self {
            Record::Customer(c) => Some(LookupKey::CustomerCode(c.code.clone())),
            Record::Role(r) => Some(LookupKey::RoleName(r.normalized_name.clone())),
            Record::User(u) => Some(match &u.id {
                Some(id) => LookupKey::UserId(id.clone()),
                None => LookupKey::UserName(u.normalized_user_name.clone()),
            }),
            Record::RoleClaim(_) | Record::UserClaim(_) => None,
            Record::UserLogin(l) => Some(LookupKey::Login {
                login_provider: l.login_provider.clone(),
                provider_key: l.provider_key.clone(),
            }),
            Record::UserToken(t) => Some(LookupKey::Token {
                user_id: t.user_id.clone(),
                login_provider: t.login_provider.clone(),
                name: t.name.clone(),
            }),
            Record::ExtEmployee(e) => Some(LookupKey::Employee {
                employee_id: e.employee_id.clone(),
                position_id: e.position_id.clone(),
            }),
        }
    }

    /// Every key that identifies this record. Users are reachable both by id
    /// and by normalized user name.
    pub fn identity_keys(&self) -> Vec<LookupKey> {
        match self {
            Record::User(u) => {
                let mut keys = vec![LookupKey::UserName(u.normalized_user_name.clone())];
                if let Some(id) = &u.id {
                    keys.push(LookupKey::UserId(id.clone()));
                }
                keys
            }
            other => other.lookup_key().into_iter().collect(),
        }
    }

    pub fn matches(&self, key: &LookupKey) -> bool {
        self.identity_keys().iter().any(|candidate| candidate == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: Option<&str>, name: &str) -> User {
        User {
            id: id.map(str::to_string),
            user_name: name.to_string(),
            normalized_user_name: name.to_uppercase(),
            email: None,
            normalized_email: None,
            phone_number: None,
            email_confirmed: None,
            password_hash: None,
            security_stamp: None,
            concurrency_stamp: None,
            role_ids: Vec::new(),
            password: None,
        }
    }

    #[test]
    fn users_look_up_by_id_when_present() {
        let with_id = Record::User(user(Some("u-1"), "alice"));
        assert_eq!(with_id.lookup_key(), Some(LookupKey::UserId("u-1".into())));
        assert!(with_id.matches(&LookupKey::UserName("ALICE".into())));

        let without_id = Record::User(user(None, "bob"));
        assert_eq!(without_id.lookup_key(), Some(LookupKey::UserName("BOB".into())));
        assert!(!without_id.matches(&LookupKey::UserId("u-1".into())));
    }

    #[test]
    fn claims_have_no_lookup_key() {
        let claim = Record::RoleClaim(RoleClaim {
            id: None,
            role_id: "r-1".into(),
            claim_type: "perm".into(),
            claim_value: None,
        });
        assert_eq!(claim.lookup_key(), None);
        assert_eq!(claim.kind(), EntityKind::RoleClaim);
    }
}
