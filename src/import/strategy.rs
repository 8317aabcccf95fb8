//! Per-entity strategy values consumed by the generic pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::CredentialHasher;
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, Record, ReferenceTarget};

/// How accepted rows are reconciled with stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Insert unless the composite key is already claimed; never update.
    AppendUnique,
    /// Look the record up by key; merge into it when found, insert otherwise.
    Upsert,
}

/// Builds a candidate record from a validated row.
pub type BuildFn = fn(&ValidRow, &mut RunContext) -> Result<Candidate, Rejection>;
/// Merges an incoming record into the current one and reports whether any
/// stored field changed.
pub type MergeFn = fn(&mut Record, Record, &mut RunContext) -> ImportResult<bool>;
/// Final touches on a record about to be inserted.
pub type PrepareFn = fn(&mut Record, &mut RunContext) -> ImportResult<()>;

pub struct EntityStrategy {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: EntityKind,
    pub columns: &'static [Column],
    pub reject: RejectCounter,
    pub policy: UpsertPolicy,
    /// Load the role directory before the first row.
    pub loads_roles: bool,
    pub build: BuildFn,
    pub merge: MergeFn,
    pub prepare: PrepareFn,
}

impl EntityStrategy {
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        std::iter::once(self.name)
            .chain(self.aliases.iter().copied())
            .any(|candidate| candidate.eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Debug for EntityStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStrategy")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish()
    }
}

/// A foreign key the row depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: ReferenceTarget,
    pub key: String,
}

/// A composite key claimed under a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimKey {
    pub parent: String,
    pub key: String,
}

/// A record ready for upsert resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub record: Record,
    pub reference: Option<Reference>,
    pub claim: Option<ClaimKey>,
}

impl Candidate {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            reference: None,
            claim: None,
        }
    }

    pub fn referencing(mut self, target: ReferenceTarget, key: impl Into<String>) -> Self {
        self.reference = Some(Reference {
            target,
            key: key.into(),
        });
        self
    }

    pub fn claiming(mut self, parent: impl Into<String>, key: String) -> Self {
        self.claim = Some(ClaimKey {
            parent: parent.into(),
            key,
        });
        self
    }
}

/// State shared by the strategy functions for the duration of one run.
pub struct RunContext {
    hasher: Arc<dyn CredentialHasher>,
    roles: HashMap<String, String>,
    warnings: Vec<String>,
}

impl RunContext {
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            hasher,
            roles: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Install `(normalized_name, id)` pairs as the role directory.
    pub fn load_roles(&mut self, roles: Vec<(String, String)>) {
        self.roles = roles
            .into_iter()
            .map(|(name, id)| (name.to_uppercase(), id))
            .collect();
    }

    pub fn role_id(&self, normalized_name: &str) -> Option<&str> {
        self.roles.get(normalized_name).map(String::as_str)
    }

    pub fn hasher(&self) -> &dyn CredentialHasher {
        self.hasher.as_ref()
    }

    /// Log a reference warning and keep it for the run report.
    pub fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}
