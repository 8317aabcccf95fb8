use crate::entities::{assign, assign_some, kind_mismatch, nothing_to_prepare};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{Customer, EntityKind, Record};

const COLUMNS: &[Column] = &[
    Column::required("Code").max(50),
    Column::required("Name").max(200),
    Column::optional("Email").max(200),
];

/// Customers keyed by their unique `Code`.
pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "customer",
    aliases: &["customers"],
    kind: EntityKind::Customer,
    columns: COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::Upsert,
    loads_roles: false,
    build,
    merge,
    prepare: nothing_to_prepare,
};

fn build(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    Ok(Candidate::new(Record::Customer(Customer {
        id: None,
        code: row.require("Code")?,
        name: row.require("Name")?,
        email: row.text("Email"),
    })))
}

fn merge(current: &mut Record, incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::Customer(current), Record::Customer(incoming)) = (current, incoming) else {
        return Err(kind_mismatch(EntityKind::Customer, found));
    };
    let mut changed = assign(&mut current.name, incoming.name);
    changed |= assign_some(&mut current.email, incoming.email);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordService;
    use std::sync::Arc;

    fn customer(name: &str, email: Option<&str>) -> Record {
        Record::Customer(Customer {
            id: Some(7),
            code: "C1".into(),
            name: name.into(),
            email: email.map(str::to_string),
        })
    }

    #[test]
    fn merge_keeps_email_when_incoming_is_blank() {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let mut current = customer("Acme", Some("ops@acme.io"));
        let changed = merge(&mut current, customer("Acme Ltd", None), &mut ctx).unwrap();
        assert!(changed);
        assert_eq!(current, customer("Acme Ltd", Some("ops@acme.io")));

        let changed = merge(&mut current, customer("Acme Ltd", None), &mut ctx).unwrap();
        assert!(!changed);
    }
}
