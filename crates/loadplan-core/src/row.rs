//! Result-set rows and the cursor abstraction readers pull them from.

use crate::Result;
use crate::error::{Error, ResultSetError, ResultSetErrorKind, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Labels of a result set, shared by all of its rows.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    labels: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(labels: Vec<String>) -> Self {
        let positions = labels
            .iter()
            .enumerate()
            .map(|(position, label)| (label.clone(), position))
            .collect();
        Self { labels, positions }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// A single physical row of a result set.
///
/// Readers address columns by the alias-qualified label generated for the
/// statement (`id_0_`, `name_1_`, ...).
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// A standalone row with its own labels.
    pub fn new(labels: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(labels)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    /// Value under `label`. A label the row does not carry means the
    /// statement and the reader plan disagree.
    #[allow(clippy::result_large_err)]
    pub fn column(&self, label: &str) -> Result<&Value> {
        self.columns
            .position(label)
            .and_then(|position| self.values.get(position))
            .ok_or_else(|| Error::ResultSet(ResultSetError::missing_column(label)))
    }

    /// Values of several labels, in order.
    #[allow(clippy::result_large_err)]
    pub fn columns(&self, labels: &[String]) -> Result<Vec<Value>> {
        labels
            .iter()
            .map(|label| self.column(label).cloned())
            .collect()
    }

    /// Typed value under `label`; conversion errors name the label.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, label: &str) -> Result<T> {
        T::from_value(self.column(label)?).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(label.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }
}

/// Typed extraction of a column value, see [`Row::get_named`].
pub trait FromValue: Sized {
    /// Fails with [`Error::Type`] when the value has an incompatible type.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_error("i64", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = value.as_i64().ok_or_else(|| type_error("i32", value))?;
        i32::try_from(wide).map_err(|_| type_error("i32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_error("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error("String", value))
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// A forward-only cursor over physical rows.
///
/// Rows must be consumed in cursor order; collection readers rely on rows
/// for one owner key arriving contiguously.
pub trait ResultSet {
    /// Move to the next row. Returns `false` once the cursor is exhausted.
    #[allow(clippy::result_large_err)]
    fn advance(&mut self) -> Result<bool>;

    /// The row the cursor is positioned on.
    fn current(&self) -> Option<&Row>;

    /// The current row, or a `NoCurrentRow` error.
    #[allow(clippy::result_large_err)]
    fn current_row(&self) -> Result<&Row> {
        self.current().ok_or_else(|| {
            Error::ResultSet(ResultSetError {
                kind: ResultSetErrorKind::NoCurrentRow,
                column: None,
                message: "result set is not positioned on a row".to_string(),
                source: None,
            })
        })
    }
}

/// In-memory result set over pre-built rows.
#[derive(Debug, Clone)]
pub struct VecResultSet {
    rows: Vec<Row>,
    position: Option<usize>,
}

impl VecResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            position: None,
        }
    }

    /// Build rows sharing one set of column labels.
    pub fn from_values(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        let rows = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values))
            .collect();
        Self::new(rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ResultSet for VecResultSet {
    fn advance(&mut self) -> Result<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    fn current(&self) -> Option<&Row> {
        self.position.and_then(|p| self.rows.get(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== Row access ====

    #[test]
    fn test_row_named_access() {
        let row = Row::new(
            vec!["id_0_".to_string(), "name_0_".to_string()],
            vec![Value::BigInt(1), Value::Text("Ada".to_string())],
        );
        assert_eq!(row.get_named::<i64>("id_0_").unwrap(), 1);
        assert_eq!(row.get_named::<String>("name_0_").unwrap(), "Ada");
        assert_eq!(row.get_named::<Option<i64>>("id_0_").unwrap(), Some(1));
    }

    #[test]
    fn test_missing_label_is_result_set_error() {
        let row = Row::new(vec!["id_0_".to_string()], vec![Value::Int(1)]);
        let err = row.column("nope").unwrap_err();
        assert_eq!(err.result_set_kind(), Some(ResultSetErrorKind::MissingColumn));
    }

    #[test]
    fn test_type_error_names_column() {
        let row = Row::new(vec!["id_0_".to_string()], vec![Value::Text("x".into())]);
        match row.get_named::<i64>("id_0_").unwrap_err() {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("id_0_")),
            other => panic!("unexpected error: {other}"),
        }
    }

    // ==== Cursor ====

    #[test]
    fn test_vec_result_set_walks_in_order() {
        let mut rs = VecResultSet::from_values(
            vec!["id_0_".to_string()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert!(rs.current().is_none());
        assert!(rs.current_row().is_err());

        assert!(rs.advance().unwrap());
        assert_eq!(rs.current().unwrap().get(0), Some(&Value::Int(1)));
        assert!(rs.advance().unwrap());
        assert_eq!(rs.current().unwrap().get(0), Some(&Value::Int(2)));
        assert!(!rs.advance().unwrap());
        assert!(rs.current().is_none());
        assert!(!rs.advance().unwrap());
    }
}
