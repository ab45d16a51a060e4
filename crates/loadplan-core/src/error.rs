//! Error types for load-plan compilation and result-set processing.

use std::fmt;

use crate::value::Value;

/// The primary error type for all loadplan operations.
#[derive(Debug)]
pub enum Error {
    /// Static mapping/configuration defects detected while compiling a load
    Mapping(MappingError),
    /// A column value that could not be converted to the requested type
    Type(TypeError),
    /// Errors raised while walking a result set
    ResultSet(ResultSetError),
    /// A discriminator value that maps to no known subclass
    WrongClass {
        entity_name: String,
        discriminator: Value,
    },
    /// Version mismatch while upgrading the lock of a managed instance
    StaleState {
        entity_name: String,
        identifier: Vec<Value>,
    },
    /// Anything else, carried as text
    Custom(String),
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// Entity name or collection role not known to the metamodel
    UnknownPersister,
    /// Property not declared on the owning persister
    UnknownProperty,
    /// Key, identifier or join columns are missing or mismatched
    MissingColumns,
    /// A `{alias}` fragment template could not be parsed
    InvalidFragment,
    /// A QuerySpace UID was looked up before its aliases were generated
    UnregisteredQuerySpace,
    /// The load plan graph violates a structural invariant
    InvalidLoadPlan,
    /// The root return reader was assigned more than once
    DuplicateRootReader,
    /// Batch size or bind keys do not fit the compiled statement
    InvalidBatch,
    /// Query-building parameters could not be parsed
    InvalidConfiguration,
}

#[derive(Debug)]
pub struct TypeError {
    /// Target type name
    pub expected: &'static str,
    /// SQL type name of the value actually read
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ResultSetError {
    pub kind: ResultSetErrorKind,
    /// Label of the offending column, when one is known
    pub column: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetErrorKind {
    /// The expected column label is absent from the row
    MissingColumn,
    /// The root return row carried no identifier
    MissingIdentifier,
    /// The cursor has no current row
    NoCurrentRow,
    /// Failure reported by the underlying driver
    Driver,
}

impl MappingError {
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ResultSetError {
    pub fn missing_column(column: &str) -> Self {
        Self {
            kind: ResultSetErrorKind::MissingColumn,
            column: Some(column.to_string()),
            message: format!("column '{}' not present in result set", column),
            source: None,
        }
    }

    pub fn driver(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ResultSetErrorKind::Driver,
            column: None,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl Error {
    /// Shorthand for building a mapping error.
    pub fn mapping(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError::new(kind, message))
    }

    /// Is this a static mapping/configuration defect?
    pub fn is_mapping_error(&self) -> bool {
        matches!(self, Error::Mapping(_))
    }

    /// Get the mapping error kind, if this is a mapping error.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(m) => Some(m.kind),
            _ => None,
        }
    }

    /// Get the result-set error kind, if this came from row reading.
    pub fn result_set_kind(&self) -> Option<ResultSetErrorKind> {
        match self {
            Error::ResultSet(r) => Some(r.kind),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expected)?;
        f.write_str(" required")?;
        if let Some(label) = &self.column {
            write!(f, " by column '{label}'")?;
        }
        write!(f, " but the row held {}", self.actual)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Type(e) => write!(f, "Conversion failed: {e}"),
            Error::ResultSet(e) => write!(f, "Result set error: {}", e.message),
            Error::WrongClass {
                entity_name,
                discriminator,
            } => write!(
                f,
                "Discriminator {discriminator:?} does not identify a subclass of {entity_name}"
            ),
            Error::StaleState {
                entity_name,
                identifier,
            } => write!(
                f,
                "Row was updated or deleted by another transaction: {entity_name} {identifier:?}"
            ),
            Error::Custom(text) => f.write_str(text),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let Error::ResultSet(inner) = self else {
            return None;
        };
        match &inner.source {
            Some(cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for ResultSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ResultSetError> for Error {
    fn from(err: ResultSetError) -> Self {
        Error::ResultSet(err)
    }
}

/// Result type alias for loadplan operations.
pub type Result<T> = std::result::Result<T, Error>;
