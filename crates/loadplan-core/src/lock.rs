//! Lock modes requested for a load and acquired on loaded instances.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lock level, ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// No lock; the instance is only checked for presence.
    #[default]
    None,
    /// Data read from the database in this transaction.
    Read,
    Optimistic,
    OptimisticForceIncrement,
    /// SELECT ... FOR SHARE
    PessimisticRead,
    /// SELECT ... FOR UPDATE
    PessimisticWrite,
    PessimisticForceIncrement,
}

impl LockMode {
    /// Whether `self` is stronger than `other`.
    pub fn greater_than(self, other: LockMode) -> bool {
        self > other
    }

    /// Whether this mode needs a row lock on the database side.
    pub const fn is_pessimistic(self) -> bool {
        matches!(
            self,
            LockMode::PessimisticRead
                | LockMode::PessimisticWrite
                | LockMode::PessimisticForceIncrement
        )
    }

    /// Mode recorded on an instance freshly read from a row.
    ///
    /// `None` means "no explicit lock" for a load, but the row was still read
    /// in this transaction.
    pub const fn acquired(self) -> LockMode {
        match self {
            LockMode::None => LockMode::Read,
            other => other,
        }
    }
}

/// Lock options for one load: a default mode plus per-alias overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    pub lock_mode: LockMode,
    /// Overrides keyed by SQL table alias.
    pub alias_lock_modes: BTreeMap<String, LockMode>,
    /// Lock wait timeout; `None` waits forever.
    pub timeout_millis: Option<u64>,
}

impl LockOptions {
    pub fn new(lock_mode: LockMode) -> Self {
        Self {
            lock_mode,
            ..Self::default()
        }
    }

    /// Set an override for one table alias.
    #[must_use]
    pub fn alias_lock_mode(mut self, alias: impl Into<String>, mode: LockMode) -> Self {
        self.alias_lock_modes.insert(alias.into(), mode);
        self
    }

    #[must_use]
    pub fn timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = Some(millis);
        self
    }

    /// Effective mode for a table alias.
    pub fn effective_lock_mode(&self, alias: &str) -> LockMode {
        self.alias_lock_modes
            .get(alias)
            .copied()
            .unwrap_or(self.lock_mode)
    }

    /// Strongest mode named anywhere in these options.
    pub fn strongest(&self) -> LockMode {
        self.alias_lock_modes
            .values()
            .copied()
            .fold(self.lock_mode, LockMode::max)
    }
}
