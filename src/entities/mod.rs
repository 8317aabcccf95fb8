//! Strategy table for the supported entities.
//!
//! Each entity module contributes one [`EntityStrategy`]: its CSV columns,
//! the counter rejected rows are charged to, how records are keyed, and how
//! an incoming record is merged into an existing one.

pub mod claims;
pub mod customer;
pub mod employee;
pub mod login;
pub mod role;
pub mod token;
pub mod user;

use crate::error::{ImportError, ImportResult};
use crate::import::strategy::{EntityStrategy, RunContext};
use crate::models::{EntityKind, Record};

pub static STRATEGIES: &[EntityStrategy] = &[
    customer::STRATEGY,
    user::STRATEGY,
    role::STRATEGY,
    claims::ROLE_CLAIM_STRATEGY,
    claims::USER_CLAIM_STRATEGY,
    login::STRATEGY,
    token::STRATEGY,
    employee::STRATEGY,
];

pub fn lookup(name: &str) -> Option<&'static EntityStrategy> {
    STRATEGIES.iter().find(|strategy| strategy.answers_to(name))
}

/// Replace `slot` when `value` differs.
pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Replace `slot` only with a present, different value.
pub(crate) fn assign_some<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) if slot.as_ref() != Some(&value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}

pub(crate) fn kind_mismatch(expected: EntityKind, found: EntityKind) -> ImportError {
    ImportError::Store(format!("expected a {expected:?} record, got {found:?}"))
}

pub(crate) fn append_only(current: &mut Record, _incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    Err(ImportError::Store(format!(
        "{:?} records are never updated",
        current.kind()
    )))
}

pub(crate) fn nothing_to_prepare(_record: &mut Record, _ctx: &mut RunContext) -> ImportResult<()> {
    Ok(())
}
