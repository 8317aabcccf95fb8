use crate::entities::{assign, kind_mismatch, nothing_to_prepare};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, Record, ReferenceTarget, UserToken};

const COLUMNS: &[Column] = &[
    Column::required("UserId").max(450),
    Column::required("LoginProvider").max(128),
    Column::required("Name").max(128),
    Column::optional("Value"),
];

/// User tokens keyed by `(UserId, LoginProvider, Name)`. Only `Value` is
/// ever updated, and only when it differs.
pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "aspnetusertoken",
    aliases: &["usertoken", "usertokens"],
    kind: EntityKind::UserToken,
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
    Ok(Candidate::new(Record::UserToken(UserToken {
        user_id: user_id.clone(),
        login_provider: row.require("LoginProvider")?,
        name: row.require("Name")?,
        value: row.text("Value"),
    }))
    .referencing(ReferenceTarget::User, user_id))
}

fn merge(current: &mut Record, incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::UserToken(current), Record::UserToken(incoming)) = (current, incoming) else {
        return Err(kind_mismatch(EntityKind::UserToken, found));
    };
    Ok(assign(&mut current.value, incoming.value))
}
