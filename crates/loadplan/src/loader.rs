//! Loader front-end combining a metamodel, compile parameters and a session.
//!
//! A [`Loader`] compiles load plans into [`LoadQueryDetails`] with its
//! configured parameters and reads result sets into its own identity map.
//!
//! # Example
//!
//! ```rust,ignore
//! use loadplan::prelude::*;
//!
//! let mut loader = Loader::builder(metamodel)
//!     .parameters(QueryBuildingParameters::new().dialect(Dialect::Postgres))
//!     .build();
//!
//! let mut plan = loader.plan();
//! let order = plan.entity_return("Order")?;
//! plan.entity_fetch(order, "customer", FetchStrategy::inner_join())?;
//! let details = loader.compile_entity_load(plan.build()?)?;
//!
//! // execute details.sql_statement() with details.bind_values(&keys)?
//! let outcome = loader.read(&details, &mut rows, &ProcessingOptions::new())?;
//! ```

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{Error, Metamodel, Result, ResultSet};
use loadplan_query::{LoadPlan, LoadPlanBuilder, LoadQueryDetails, QueryBuildingParameters};
use loadplan_session::{IdentityMap, ProcessingOptions, ProcessingOutcome, ResultSetProcessor};

/// Compiles load plans and reads their results into one session.
#[derive(Debug)]
pub struct Loader {
    metamodel: Metamodel,
    parameters: QueryBuildingParameters,
    session: IdentityMap,
}

impl Loader {
    /// A loader with default parameters and an empty session.
    pub fn new(metamodel: Metamodel) -> Self {
        LoaderBuilder::new(metamodel).build()
    }

    #[must_use]
    pub fn builder(metamodel: Metamodel) -> LoaderBuilder {
        LoaderBuilder::new(metamodel)
    }

    pub fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    pub fn parameters(&self) -> &QueryBuildingParameters {
        &self.parameters
    }

    pub fn session(&self) -> &IdentityMap {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut IdentityMap {
        &mut self.session
    }

    /// Consume the loader and return its session.
    pub fn into_session(self) -> IdentityMap {
        self.session
    }

    /// Start a load plan against this loader's metamodel.
    pub fn plan(&self) -> LoadPlanBuilder<'_> {
        LoadPlanBuilder::new(&self.metamodel)
    }

    #[allow(clippy::result_large_err)]
    pub fn compile_entity_load(&self, plan: LoadPlan) -> Result<LoadQueryDetails> {
        LoadQueryDetails::for_entity(plan, &self.parameters)
    }

    #[allow(clippy::result_large_err)]
    pub fn compile_collection_load(&self, plan: LoadPlan) -> Result<LoadQueryDetails> {
        LoadQueryDetails::for_collection(plan, &self.parameters)
    }

    /// Read a result set produced by executing `details`.
    #[allow(clippy::result_large_err)]
    pub fn read(
        &mut self,
        details: &LoadQueryDetails,
        rows: &mut dyn ResultSet,
        options: &ProcessingOptions,
    ) -> Result<ProcessingOutcome> {
        ResultSetProcessor::new(details, &self.metamodel).extract_results(
            rows,
            &mut self.session,
            options,
        )
    }
}

/// Builder for [`Loader`].
#[derive(Debug)]
pub struct LoaderBuilder {
    metamodel: Metamodel,
    parameters: QueryBuildingParameters,
    session: Option<IdentityMap>,
}

impl LoaderBuilder {
    #[must_use]
    pub fn new(metamodel: Metamodel) -> Self {
        Self {
            metamodel,
            parameters: QueryBuildingParameters::default(),
            session: None,
        }
    }

    /// Parameters every load query of this loader is compiled with.
    #[must_use]
    pub fn parameters(mut self, parameters: QueryBuildingParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Parameters from a JSON configuration value, e.g. one section of an
    /// application config file.
    #[allow(clippy::result_large_err)]
    pub fn config(mut self, config: serde_json::Value) -> Result<Self> {
        self.parameters = serde_json::from_value(config).map_err(|e| {
            Error::mapping(
                MappingErrorKind::InvalidConfiguration,
                format!("invalid loader configuration: {e}"),
            )
        })?;
        Ok(self)
    }

    /// Continue an existing session instead of starting an empty one.
    #[must_use]
    pub fn session(mut self, session: IdentityMap) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Loader {
        tracing::debug!(
            batch_size = self.parameters.batch_size,
            dialect = ?self.parameters.dialect,
            "built loader"
        );
        Loader {
            metamodel: self.metamodel,
            parameters: self.parameters,
            session: self.session.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadplan_core::{Dialect, EntityMapping};

    fn metamodel() -> Metamodel {
        let mut model = Metamodel::new();
        model
            .add_entity(EntityMapping::new("Customer", "customers").id("id").property("name", "name"))
            .unwrap();
        model
    }

    #[test]
    fn test_builder_from_json_config() {
        let loader = Loader::builder(metamodel())
            .config(serde_json::json!({ "batch_size": 4, "dialect": "postgres" }))
            .unwrap()
            .build();
        assert_eq!(loader.parameters().batch_size, 4);
        assert_eq!(loader.parameters().dialect, Dialect::Postgres);
        assert!(loader.session().is_empty());
    }

    #[test]
    fn test_invalid_config_is_configuration_error() {
        let err = Loader::builder(metamodel())
            .config(serde_json::json!({ "batch_size": "many" }))
            .unwrap_err();
        assert_eq!(
            err.mapping_kind(),
            Some(MappingErrorKind::InvalidConfiguration)
        );
    }

    #[test]
    fn test_compiles_with_loader_parameters() {
        let loader = Loader::builder(metamodel())
            .parameters(QueryBuildingParameters::new().batch_size(3))
            .build();
        let mut plan = loader.plan();
        plan.entity_return("Customer").unwrap();
        let details = loader.compile_entity_load(plan.build().unwrap()).unwrap();
        assert!(details.sql_statement().ends_with("customer0_.id IN (?, ?, ?)"));
    }
}
