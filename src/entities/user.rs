//! Users: looked up by `Id` when the CSV supplies one, otherwise by
//! upper-cased user name. Plaintext passwords are hashed on the way in and a
//! delimited `Roles` column is resolved against the role directory loaded at
//! the start of the run.

use crate::entities::{assign, assign_some, kind_mismatch};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow, split_list};
use crate::models::{EntityKind, Record, User};

const COLUMNS: &[Column] = &[
    Column::optional("Id").max(450),
    Column::required("UserName").max(256),
    Column::optional("Email").max(256),
    Column::optional("PhoneNumber").max(256),
    Column::optional("EmailConfirmed"),
    Column::optional("Roles"),
    Column::optional("Password"),
];

pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "user",
    aliases: &["users", "aspnetuser"],
    kind: EntityKind::User,
    columns: COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::Upsert,
    loads_roles: true,
    build,
    merge,
    prepare,
};

fn build(row: &ValidRow, ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    let user_name = row.require("UserName")?;
    let email = row.text("Email");
    let role_ids = resolve_roles(row.get("Roles"), ctx);

    Ok(Candidate::new(Record::User(User {
        id: row.text("Id"),
        normalized_user_name: user_name.to_uppercase(),
        user_name,
        normalized_email: email.as_deref().map(str::to_uppercase),
        email,
        phone_number: row.text("PhoneNumber"),
        email_confirmed: row.flag("EmailConfirmed"),
        password_hash: None,
        security_stamp: None,
        concurrency_stamp: None,
        role_ids,
        password: row.text("Password"),
    })))
}

/// Map role names to ids. Unknown names are reported and dropped; they never
/// fail the row.
fn resolve_roles(raw: Option<&str>, ctx: &mut RunContext) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for name in raw.map(split_list).unwrap_or_default() {
        let found = ctx.role_id(&name.to_uppercase()).map(str::to_string);
        match found {
            Some(id) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            None => ctx.warn(format!("role not found (skipped): {name}")),
        }
    }
    ids
}

fn prepare(record: &mut Record, ctx: &mut RunContext) -> ImportResult<()> {
    if let Record::User(user) = record {
        if let Some(secret) = user.password.take() {
            user.password_hash = Some(ctx.hasher().hash(&secret)?);
        }
    }
    Ok(())
}

fn merge(current: &mut Record, incoming: Record, ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::User(current), Record::User(incoming)) = (current, incoming) else {
        return Err(kind_mismatch(EntityKind::User, found));
    };

    let mut changed = assign(&mut current.user_name, incoming.user_name);
    changed |= assign(&mut current.normalized_user_name, incoming.normalized_user_name);
    changed |= assign_some(&mut current.email, incoming.email);
    changed |= assign_some(&mut current.normalized_email, incoming.normalized_email);
    changed |= assign_some(&mut current.phone_number, incoming.phone_number);
    changed |= assign_some(&mut current.email_confirmed, incoming.email_confirmed);

    if let Some(secret) = incoming.password {
        let still_valid = match current.password_hash.as_deref() {
            Some(stored) => ctx.hasher().verify(&secret, stored)?,
            None => false,
        };
        if !still_valid {
            current.password_hash = Some(ctx.hasher().hash(&secret)?);
            current.security_stamp = None;
            changed = true;
        }
    }

    for role_id in incoming.role_ids {
        if !current.role_ids.contains(&role_id) {
            current.role_ids.push(role_id);
            changed = true;
        }
    }

    if changed {
        current.concurrency_stamp = None;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordService;
    use crate::import::source::ImportRow;
    use crate::import::validate::RowValidator;
    use std::sync::Arc;

    fn context() -> RunContext {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        ctx.load_roles(vec![
            ("ADMIN".into(), "role-admin".into()),
            ("OPS".into(), "role-ops".into()),
        ]);
        ctx
    }

    fn build_user(row: ImportRow, ctx: &mut RunContext) -> User {
        let valid = RowValidator::new(COLUMNS).validate(&row).expect("valid");
        match build(&valid, ctx).expect("candidate").record {
            Record::User(user) => user,
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn resolves_known_roles_and_warns_on_missing() {
        let mut ctx = context();
        let user = build_user(
            ImportRow::new(2)
                .with("UserName", "alice")
                .with("Roles", "Admin;Missing|admin"),
            &mut ctx,
        );
        assert_eq!(user.normalized_user_name, "ALICE");
        assert_eq!(user.role_ids, vec!["role-admin".to_string()]);
        assert_eq!(
            ctx.into_warnings(),
            vec!["role not found (skipped): Missing".to_string()]
        );
    }

    #[test]
    fn prepare_hashes_the_plaintext() {
        let mut ctx = context();
        let user = build_user(
            ImportRow::new(2)
                .with("UserName", "bob")
                .with("Password", "s3cret")
                .with("EmailConfirmed", "yes"),
            &mut ctx,
        );
        assert_eq!(user.email_confirmed, Some(true));

        let mut record = Record::User(user);
        prepare(&mut record, &mut ctx).unwrap();
        let Record::User(user) = record else { panic!("user") };
        assert!(user.password.is_none());
        let hash = user.password_hash.expect("hashed");
        assert!(ctx.hasher().verify("s3cret", &hash).unwrap());
    }

    #[test]
    fn unchanged_password_keeps_hash_and_stamps() {
        let mut ctx = context();
        let hash = ctx.hasher().hash("s3cret").unwrap();
        let mut stored = build_user(ImportRow::new(1).with("UserName", "carol"), &mut ctx);
        stored.id = Some("u-1".into());
        stored.password_hash = Some(hash.clone());
        stored.security_stamp = Some("sec".into());
        stored.concurrency_stamp = Some("con".into());
        let mut current = Record::User(stored);

        let incoming = build_user(
            ImportRow::new(2)
                .with("UserName", "carol")
                .with("Password", "s3cret"),
            &mut ctx,
        );
        assert!(!merge(&mut current, Record::User(incoming), &mut ctx).unwrap());

        let incoming = build_user(
            ImportRow::new(3)
                .with("UserName", "carol")
                .with("Password", "changed")
                .with("Roles", "Ops"),
            &mut ctx,
        );
        assert!(merge(&mut current, Record::User(incoming), &mut ctx).unwrap());
        let Record::User(updated) = current else { panic!("user") };
        assert_ne!(updated.password_hash.as_deref(), Some(hash.as_str()));
        assert_eq!(updated.security_stamp, None);
        assert_eq!(updated.concurrency_stamp, None);
        assert_eq!(updated.role_ids, vec!["role-ops".to_string()]);
    }
}
