//! JOIN clause types and the join-fragment accumulator.

use serde::{Deserialize, Serialize};

/// Types of SQL joins a load plan can declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }

    pub const fn is_outer(&self) -> bool {
        matches!(self, JoinType::Left)
    }
}

/// Accumulates ANSI join fragments for one FROM clause.
///
/// The FROM part holds `JOIN table alias ON ...` items in the order they
/// are added; the WHERE part holds conditions a persister needs outside the
/// ON clause (subclass tables and the like).
#[derive(Debug, Clone, Default)]
pub struct JoinFragment {
    from: Vec<String>,
    conditions: Vec<String>,
}

impl JoinFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `JOIN <table_fragment> ON lhs.c1 = rhs.c1 AND ...`.
    ///
    /// `on_extra` is appended to the ON clause when non-empty.
    #[allow(clippy::too_many_arguments)]
    pub fn add_join(
        &mut self,
        join_type: JoinType,
        table_fragment: &str,
        lhs_alias: &str,
        lhs_columns: &[String],
        rhs_alias: &str,
        rhs_columns: &[String],
        on_extra: &[String],
    ) {
        let mut on: Vec<String> = lhs_columns
            .iter()
            .zip(rhs_columns)
            .map(|(l, r)| format!("{}.{} = {}.{}", lhs_alias, l, rhs_alias, r))
            .collect();
        on.extend(on_extra.iter().filter(|s| !s.trim().is_empty()).cloned());

        self.from.push(format!(
            "{} {} ON {}",
            join_type.as_str(),
            table_fragment,
            on.join(" AND ")
        ));
    }

    /// Raw FROM text such as a persister's subclass join fragment.
    pub fn add_from_fragment(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if !fragment.is_empty() {
            self.from.push(fragment.to_string());
        }
    }

    pub fn add_condition(&mut self, condition: &str) {
        let condition = condition.trim();
        if !condition.is_empty() {
            self.conditions.push(condition.to_string());
        }
    }

    pub fn to_from_fragment_string(&self) -> String {
        self.from.join(" ")
    }

    pub fn to_where_fragment_string(&self) -> String {
        self.conditions.join(" AND ")
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty() && self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_type_as_str() {
        assert_eq!(JoinType::Inner.as_str(), "INNER JOIN");
        assert_eq!(JoinType::Left.as_str(), "LEFT JOIN");
        assert!(JoinType::Left.is_outer());
        assert!(!JoinType::Inner.is_outer());
    }

    #[test]
    fn test_composite_join_condition() {
        let mut fragment = JoinFragment::new();
        fragment.add_join(
            JoinType::Left,
            "line_items lineitems1_",
            "order0_",
            &["id".to_string(), "region".to_string()],
            "lineitems1_",
            &["order_id".to_string(), "order_region".to_string()],
            &["lineitems1_.deleted = 0".to_string(), String::new()],
        );
        assert_eq!(
            fragment.to_from_fragment_string(),
            "LEFT JOIN line_items lineitems1_ ON order0_.id = lineitems1_.order_id \
             AND order0_.region = lineitems1_.order_region AND lineitems1_.deleted = 0"
        );
        assert!(fragment.to_where_fragment_string().is_empty());
    }

    #[test]
    fn test_conditions_and_raw_fragments() {
        let mut fragment = JoinFragment::new();
        assert!(fragment.is_empty());
        fragment.add_from_fragment("  ");
        fragment.add_condition("a.x = b.x");
        fragment.add_condition("a.y = b.y");
        assert_eq!(fragment.to_where_fragment_string(), "a.x = b.x AND a.y = b.y");
        assert!(fragment.to_from_fragment_string().is_empty());
    }
}
