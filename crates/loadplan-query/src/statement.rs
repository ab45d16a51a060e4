//! SELECT statement accumulator.

use loadplan_core::{Dialect, LockMode, LockOptions};

/// Accumulates SQL fragments for one SELECT and renders them at the end.
///
/// No parsing happens here: fragments are joined with the punctuation of
/// their clause (commas for SELECT and ORDER BY, spaces for FROM, `AND` for
/// WHERE) in the order they were appended. The first FROM fragment is the
/// root table; dialect lock hints are applied to it when the statement is
/// rendered.
#[derive(Debug, Clone, Default)]
pub struct SelectStatementBuilder {
    dialect: Dialect,
    comment: Option<String>,
    select: Vec<String>,
    from: Vec<String>,
    outer_joins_after_from: String,
    outer_joins_after_where: String,
    restrictions: Vec<String>,
    order_by: Vec<String>,
    lock_options: Option<LockOptions>,
}

impl SelectStatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn append_select_clause_fragment(&mut self, fragment: &str) {
        push_trimmed(&mut self.select, fragment);
    }

    pub fn append_from_clause_fragment(&mut self, fragment: &str) {
        push_trimmed(&mut self.from, fragment);
    }

    /// Join text rendered after the FROM fragments, plus any conditions the
    /// joins need in the WHERE clause.
    pub fn set_outer_joins(&mut self, after_from: &str, after_where: &str) {
        self.outer_joins_after_from = after_from.trim().to_string();
        self.outer_joins_after_where = after_where.trim().to_string();
    }

    pub fn append_restrictions(&mut self, restrictions: &str) {
        push_trimmed(&mut self.restrictions, restrictions);
    }

    pub fn append_order_by_fragment(&mut self, fragment: &str) {
        push_trimmed(&mut self.order_by, fragment);
    }

    pub fn set_lock_options(&mut self, options: LockOptions) {
        self.lock_options = Some(options);
    }

    pub fn set_lock_mode(&mut self, mode: LockMode) {
        self.lock_options = Some(LockOptions::new(mode));
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        let comment = comment.into();
        self.comment = if comment.trim().is_empty() {
            None
        } else {
            Some(comment)
        };
    }

    pub fn to_statement_string(&self) -> String {
        let mut sql = String::with_capacity(256);

        if let Some(comment) = &self.comment {
            // A "*/" inside the comment would end it early
            sql.push_str(&format!("/* {} */ ", comment.replace("*/", "* /")));
        }

        sql.push_str("SELECT ");
        sql.push_str(&self.select.join(", "));

        if !self.from.is_empty() {
            sql.push_str(" FROM ");
            let mut from = self.from.clone();
            if let (Some(options), Some(root)) = (&self.lock_options, from.first_mut()) {
                *root = self.dialect.append_lock_hint(options.strongest(), root);
            }
            sql.push_str(&from.join(" "));
        }
        if !self.outer_joins_after_from.is_empty() {
            sql.push(' ');
            sql.push_str(&self.outer_joins_after_from);
        }

        let mut where_parts: Vec<&str> = Vec::new();
        if !self.outer_joins_after_where.is_empty() {
            where_parts.push(&self.outer_joins_after_where);
        }
        where_parts.extend(self.restrictions.iter().map(String::as_str));
        if !where_parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_parts.join(" AND "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(suffix) = self
            .lock_options
            .as_ref()
            .and_then(|o| self.dialect.for_update_string(o))
        {
            sql.push_str(&suffix);
        }

        sql
    }
}

fn push_trimmed(target: &mut Vec<String>, fragment: &str) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        target.push(fragment.to_string());
    }
}
