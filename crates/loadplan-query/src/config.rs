//! Parameters a load query is compiled with.

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{Dialect, Error, LockOptions, QueryInfluencers, Result};
use serde::{Deserialize, Serialize};

/// Options for compiling one [`LoadQueryDetails`](crate::LoadQueryDetails).
///
/// # Example
///
/// ```ignore
/// let params = QueryBuildingParameters::new()
///     .batch_size(10)
///     .dialect(Dialect::Postgres)
///     .comments_enabled(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryBuildingParameters {
    /// Number of keys the statement restricts on. 1 means plain equality.
    pub batch_size: usize,
    pub lock_options: Option<LockOptions>,
    pub query_influencers: QueryInfluencers,
    pub dialect: Dialect,
    /// Prefix the statement with a `/* load <name> */` comment.
    pub comments_enabled: bool,
}

impl Default for QueryBuildingParameters {
    fn default() -> Self {
        Self {
            batch_size: 1,
            lock_options: None,
            query_influencers: QueryInfluencers::default(),
            dialect: Dialect::default(),
            comments_enabled: false,
        }
    }
}

impl QueryBuildingParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse parameters from JSON. Missing fields take their defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::mapping(
                MappingErrorKind::InvalidConfiguration,
                format!("invalid query building parameters: {e}"),
            )
        })
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub fn lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = Some(options);
        self
    }

    #[must_use]
    pub fn query_influencers(mut self, influencers: QueryInfluencers) -> Self {
        self.query_influencers = influencers;
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn comments_enabled(mut self, value: bool) -> Self {
        self.comments_enabled = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadplan_core::LockMode;

    #[test]
    fn test_defaults() {
        let params = QueryBuildingParameters::new();
        assert_eq!(params.batch_size, 1);
        assert_eq!(params.dialect, Dialect::Generic);
        assert!(params.lock_options.is_none());
        assert!(!params.comments_enabled);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let params = QueryBuildingParameters::from_json(
            r#"{"batch_size": 4, "dialect": "postgres",
                "lock_options": {"lock_mode": "pessimistic_write"},
                "query_influencers": {"enabled_filters": ["active"]}}"#,
        )
        .unwrap();
        assert_eq!(params.batch_size, 4);
        assert_eq!(params.dialect, Dialect::Postgres);
        assert_eq!(
            params.lock_options.map(|o| o.lock_mode),
            Some(LockMode::PessimisticWrite)
        );
        assert!(params.query_influencers.is_enabled("active"));
        assert!(!params.comments_enabled);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = QueryBuildingParameters::from_json("{\"batch_size\": \"many\"}").unwrap_err();
        assert_eq!(
            err.mapping_kind(),
            Some(MappingErrorKind::InvalidConfiguration)
        );
    }
}
