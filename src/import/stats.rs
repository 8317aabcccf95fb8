//! Import statistics tracking.
//!
//! Counters are incremented as rows are decided and are never rolled back:
//! when a flush fails the counters describe what was attempted, not what is
//! durable.

use std::fmt;

/// Which counter an entity charges rejected rows to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCounter {
    Invalid,
    Skipped,
}

/// Counters for a single import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Rows handed out by the source
    pub read: usize,
    /// Records written as new rows
    pub inserted: usize,
    /// Records whose stored fields changed
    pub updated: usize,
    /// Rows dropped without being written
    pub skipped: usize,
    /// Rows failing validation or reference checks
    pub invalid: usize,
    /// Rows whose key was already claimed
    pub duplicates: usize,
}

impl RunCounters {
    pub fn reject(&mut self, counter: RejectCounter) {
        match counter {
            RejectCounter::Invalid => self.invalid += 1,
            RejectCounter::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for RunCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={}, inserted={}, updated={}, skipped={}, invalid={}, duplicates={}",
            self.read, self.inserted, self.updated, self.skipped, self.invalid, self.duplicates
        )
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub entity: &'static str,
    pub counters: RunCounters,
    /// Reference warnings raised while building rows
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_counter() {
        let counters = RunCounters {
            read: 5,
            inserted: 2,
            updated: 1,
            skipped: 1,
            invalid: 1,
            duplicates: 0,
        };
        assert_eq!(
            counters.to_string(),
            "read=5, inserted=2, updated=1, skipped=1, invalid=1, duplicates=0"
        );
    }

    #[test]
    fn reject_charges_the_configured_counter() {
        let mut counters = RunCounters::default();
        counters.reject(RejectCounter::Invalid);
        counters.reject(RejectCounter::Skipped);
        counters.reject(RejectCounter::Skipped);
        assert_eq!((counters.invalid, counters.skipped), (1, 2));
    }
}
