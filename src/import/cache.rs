//! Per-run memo tables in front of the store.
//!
//! Both caches live for exactly one run and are never invalidated while it
//! lasts: a reference found missing stays missing even if another process
//! inserts it later, and a claimed composite key stays claimed.

use std::collections::{HashMap, HashSet};

use crate::error::ImportResult;
use crate::models::{EntityKind, ReferenceTarget};
use crate::store::EntityStore;

const KEY_SEPARATOR: &str = "|";

/// Join identity fields into a composite key. Comparison is ordinal.
pub fn composite_key(parts: &[&str]) -> String {
    parts.join(KEY_SEPARATOR)
}

/// Memoized foreign-key verdicts.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    verdicts: HashMap<(ReferenceTarget, String), bool>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, target: ReferenceTarget, key: &str) -> Option<bool> {
        self.verdicts.get(&(target, key.to_string())).copied()
    }

    /// Whether `key` exists in `target`, asking the store at most once per key.
    pub async fn is_valid<S: EntityStore>(
        &mut self,
        store: &mut S,
        target: ReferenceTarget,
        key: &str,
    ) -> ImportResult<bool> {
        if let Some(verdict) = self.cached(target, key) {
            return Ok(verdict);
        }
        let verdict = store.exists(target, key).await?;
        log::trace!("reference {:?} '{}' exists={}", target, key, verdict);
        self.verdicts.insert((target, key.to_string()), verdict);
        Ok(verdict)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// Composite keys already claimed per parent, seeded from the store on first
/// access and grown as rows are accepted.
#[derive(Debug)]
pub struct DuplicateKeyIndex {
    kind: EntityKind,
    claimed: HashMap<String, HashSet<String>>,
}

impl DuplicateKeyIndex {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            claimed: HashMap::new(),
        }
    }

    /// Keys claimed under `parent`, loading the stored ones on first access.
    pub async fn load_or_fetch<S: EntityStore>(
        &mut self,
        store: &mut S,
        parent: &str,
    ) -> ImportResult<&mut HashSet<String>> {
        if !self.claimed.contains_key(parent) {
            let stored = store.load_claim_keys(self.kind, parent).await?;
            let keys: HashSet<String> = stored
                .iter()
                .filter_map(|(claim_type, claim_value)| {
                    let claim_type = claim_type.trim();
                    if claim_type.is_empty() {
                        return None;
                    }
                    let claim_value = claim_value.as_deref().map(str::trim).unwrap_or_default();
                    Some(composite_key(&[claim_type, claim_value]))
                })
                .collect();
            log::trace!("loaded {} existing keys for '{}'", keys.len(), parent);
            self.claimed.insert(parent.to_string(), keys);
        }
        Ok(self.claimed.entry(parent.to_string()).or_default())
    }

    /// Claim `key` under `parent`. Returns `false` when it was already taken.
    pub async fn claim<S: EntityStore>(
        &mut self,
        store: &mut S,
        parent: &str,
        key: String,
    ) -> ImportResult<bool> {
        let keys = self.load_or_fetch(store, parent).await?;
        Ok(keys.insert(key))
    }
}
