use crate::entities::{assign, assign_some, kind_mismatch, nothing_to_prepare};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, Record, Role};

const COLUMNS: &[Column] = &[
    Column::required("Name").max(256),
    Column::optional("Id").max(450),
    Column::optional("ConcurrencyStamp"),
];

/// Roles keyed by upper-cased name. `Id` and `ConcurrencyStamp` columns are
/// honoured on insert; missing ones are generated at flush.
pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "role",
    aliases: &["roles", "aspnetrole"],
    kind: EntityKind::Role,
    columns: COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::Upsert,
    loads_roles: false,
    build,
    merge,
    prepare: nothing_to_prepare,
};

pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn build(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    let name = row.require("Name")?;
    Ok(Candidate::new(Record::Role(Role {
        id: row.text("Id"),
        normalized_name: normalize_name(&name),
        name,
        concurrency_stamp: row.text("ConcurrencyStamp"),
    })))
}

fn merge(current: &mut Record, incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::Role(current), Record::Role(incoming)) = (current, incoming) else {
        return Err(kind_mismatch(EntityKind::Role, found));
    };
    let mut changed = assign(&mut current.name, incoming.name);
    changed |= assign(&mut current.normalized_name, incoming.normalized_name);
    if incoming.concurrency_stamp.is_some() {
        changed |= assign_some(&mut current.concurrency_stamp, incoming.concurrency_stamp);
    } else if changed {
        current.concurrency_stamp = None;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordService;
    use std::sync::Arc;

    fn role(name: &str, stamp: Option<&str>) -> Record {
        Record::Role(Role {
            id: Some("r1".into()),
            name: name.into(),
            normalized_name: normalize_name(name),
            concurrency_stamp: stamp.map(str::to_string),
        })
    }

    #[test]
    fn renaming_regenerates_the_stamp() {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let mut current = role("admin", Some("old"));
        assert!(merge(&mut current, role("Admin", None), &mut ctx).unwrap());
        let Record::Role(updated) = &current else { panic!("role") };
        assert_eq!(updated.name, "Admin");
        assert_eq!(updated.concurrency_stamp, None);
    }

    #[test]
    fn same_name_without_stamp_is_unchanged() {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let mut current = role("Admin", Some("old"));
        assert!(!merge(&mut current, role("Admin", None), &mut ctx).unwrap());
        assert!(merge(&mut current, role("Admin", Some("new")), &mut ctx).unwrap());
    }
}
