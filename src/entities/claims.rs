//! Role and user claims. Both are append-only: a claim whose
//! `ClaimType|ClaimValue` pair already exists for the same parent is counted
//! as a duplicate and never written twice.

use crate::entities::{append_only, nothing_to_prepare};
use crate::import::cache::composite_key;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, Record, ReferenceTarget, RoleClaim, UserClaim};

const ROLE_CLAIM_COLUMNS: &[Column] = &[
    Column::required("RoleId").max(450),
    Column::required("ClaimType"),
    Column::optional("ClaimValue"),
];

const USER_CLAIM_COLUMNS: &[Column] = &[
    Column::required("UserId").max(450),
    Column::required("ClaimType"),
    Column::optional("ClaimValue"),
];

pub const ROLE_CLAIM_STRATEGY: EntityStrategy = EntityStrategy {
    name: "roleclaim",
    aliases: &["roleclaims", "aspnetroleclaim"],
    kind: EntityKind::RoleClaim,
    columns: ROLE_CLAIM_COLUMNS,
    reject: RejectCounter::Invalid,
    policy: UpsertPolicy::AppendUnique,
    loads_roles: false,
    build: build_role_claim,
    merge: append_only,
    prepare: nothing_to_prepare,
};

pub const USER_CLAIM_STRATEGY: EntityStrategy = EntityStrategy {
    name: "aspnetuserclaim",
    aliases: &["userclaim", "userclaims"],
    kind: EntityKind::UserClaim,
    columns: USER_CLAIM_COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::AppendUnique,
    loads_roles: false,
    build: build_user_claim,
    merge: append_only,
    prepare: nothing_to_prepare,
};

fn claim_key(claim_type: &str, claim_value: Option<&str>) -> String {
    composite_key(&[claim_type, claim_value.unwrap_or_default()])
}

fn build_role_claim(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    let role_id = row.require("RoleId")?;
    let claim_type = row.require("ClaimType")?;
    let claim_value = row.text("ClaimValue");
    let key = claim_key(&claim_type, claim_value.as_deref());

    Ok(Candidate::new(Record::RoleClaim(RoleClaim {
        id: None,
        role_id: role_id.clone(),
        claim_type,
        claim_value,
    }))
    .referencing(ReferenceTarget::Role, role_id.clone())
    .claiming(role_id, key))
}

fn build_user_claim(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    let user_id = row.require("UserId")?;
    let claim_type = row.require("ClaimType")?;
    let claim_value = row.text("ClaimValue");
    let key = claim_key(&claim_type, claim_value.as_deref());

    Ok(Candidate::new(Record::UserClaim(UserClaim {
        id: None,
        user_id: user_id.clone(),
        claim_type,
        claim_value,
    }))
    .referencing(ReferenceTarget::User, user_id.clone())
    .claiming(user_id, key))
}
