//! SQL dialect collaborator: placeholders and lock syntax.

use crate::lock::{LockMode, LockOptions};
use serde::{Deserialize, Serialize};

/// SQL dialect used to render bind placeholders and lock clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Plain `?` placeholders, `for update` suffix locking
    #[default]
    Generic,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders, no row locks)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
    /// SQL Server (uses table hints instead of a `for update` suffix)
    SqlServer,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Generic | Dialect::Mysql => "?".to_string(),
            Dialect::SqlServer => format!("@P{index}"),
        }
    }

    /// Render a lock hint into the FROM fragment of a locked table.
    ///
    /// Dialects that lock with a trailing clause return the fragment as is.
    pub fn append_lock_hint(self, mode: LockMode, table_fragment: &str) -> String {
        match self {
            Dialect::SqlServer if mode.is_pessimistic() => {
                let hint = if mode == LockMode::PessimisticRead {
                    "with (holdlock, rowlock)"
                } else {
                    "with (updlock, rowlock)"
                };
                format!("{table_fragment} {hint}")
            }
            _ => table_fragment.to_string(),
        }
    }

    /// Trailing lock clause for the statement, if this dialect uses one.
    pub fn for_update_string(self, options: &LockOptions) -> Option<String> {
        let mode = options.strongest();
        if !mode.is_pessimistic() {
            return None;
        }
        let clause = match (self, mode) {
            (Dialect::Sqlite | Dialect::SqlServer, _) => return None,
            (Dialect::Postgres, LockMode::PessimisticRead) => " for share",
            (Dialect::Mysql, LockMode::PessimisticRead) => " lock in share mode",
            _ => " for update",
        };
        let mut clause = clause.to_string();
        if options.timeout_millis == Some(0) && matches!(self, Dialect::Postgres) {
            clause.push_str(" nowait");
        }
        Some(clause)
    }
}
