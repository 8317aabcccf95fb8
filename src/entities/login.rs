use crate::entities::{assign, kind_mismatch, nothing_to_prepare};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, Record, ReferenceTarget, UserLogin};

const COLUMNS: &[Column] = &[
    Column::required("LoginProvider").max(128),
    Column::required("ProviderKey").max(128),
    Column::optional("ProviderDisplayName").max(256),
    Column::required("UserId").max(450),
];

/// External logins keyed by `(LoginProvider, ProviderKey)`.
pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "aspnetuserlogin",
    aliases: &["userlogin", "userlogins"],
    kind: EntityKind::UserLogin,
    columns: COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::Upsert,
    loads_roles: false,
    build,
    merge,
    prepare: nothing_to_prepare,
};

fn build(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    let user_id = row.require("UserId")?;
    Ok(Candidate::new(Record::UserLogin(UserLogin {
        login_provider: row.require("LoginProvider")?,
        provider_key: row.require("ProviderKey")?,
        provider_display_name: row.text("ProviderDisplayName"),
        user_id: user_id.clone(),
    }))
    .referencing(ReferenceTarget::User, user_id))
}

fn merge(current: &mut Record, incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::UserLogin(current), Record::UserLogin(incoming)) = (current, incoming) else {
        return Err(kind_mismatch(EntityKind::UserLogin, found));
    };
    let mut changed = assign(
        &mut current.provider_display_name,
        incoming.provider_display_name,
    );
    changed |= assign(&mut current.user_id, incoming.user_id);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordService;
    use std::sync::Arc;

    fn login(display: Option<&str>, user_id: &str) -> Record {
        Record::UserLogin(UserLogin {
            login_provider: "Google".into(),
            provider_key: "g-1".into(),
            provider_display_name: display.map(str::to_string),
            user_id: user_id.into(),
        })
    }

    #[test]
    fn merge_moves_login_to_new_owner() {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let mut current = login(Some("Google"), "u1");
        assert!(!merge(&mut current, login(Some("Google"), "u1"), &mut ctx).unwrap());
        assert!(merge(&mut current, login(None, "u2"), &mut ctx).unwrap());
        assert_eq!(current, login(None, "u2"));
    }
}
