//! Bound statement parameters and owned result rows.
//!
//! Parameters are always bound through SQLite's binding API; they are never
//! spliced into the SQL text. Keeping them as owned [`Value`]s lets errors
//! report exactly what was bound.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use escolar_common::{
    CourseId, EnrollmentId, Error, ModuleId, PeriodId, Result, SubjectId, UserId, UserRole,
};
use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::Statement;

/// Conversion into an SQLite value for binding.
pub trait IntoSqlValue {
    fn into_sql_value(self) -> Value;
}

impl IntoSqlValue for Value {
    fn into_sql_value(self) -> Value {
        self
    }
}

impl IntoSqlValue for &str {
    fn into_sql_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoSqlValue for String {
    fn into_sql_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoSqlValue for &String {
    fn into_sql_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoSqlValue for bool {
    fn into_sql_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoSqlValue for f64 {
    fn into_sql_value(self) -> Value {
        Value::Real(self)
    }
}

impl IntoSqlValue for Vec<u8> {
    fn into_sql_value(self) -> Value {
        Value::Blob(self)
    }
}

impl IntoSqlValue for DateTime<Utc> {
    fn into_sql_value(self) -> Value {
        Value::Text(self.to_rfc3339())
    }
}

impl IntoSqlValue for UserRole {
    fn into_sql_value(self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

impl<T: IntoSqlValue> IntoSqlValue for Option<T> {
    fn into_sql_value(self) -> Value {
        match self {
            Some(v) => v.into_sql_value(),
            None => Value::Null,
        }
    }
}

macro_rules! integer_values {
    ($($t:ty),*) => {
        $(impl IntoSqlValue for $t {
            fn into_sql_value(self) -> Value {
                Value::Integer(i64::from(self))
            }
        })*
    };
}

integer_values!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! id_values {
    ($($t:ty),*) => {
        $(impl IntoSqlValue for $t {
            fn into_sql_value(self) -> Value {
                Value::Text(self.to_string())
            }
        })*
    };
}

id_values!(UserId, CourseId, SubjectId, ModuleId, PeriodId, EnrollmentId);

/// Parameters for a prepared statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SqlParams {
    /// The statement takes no parameters.
    #[default]
    None,
    /// `?` / `?N` placeholders, bound in order.
    Positional(Vec<Value>),
    /// `:name` / `@name` / `$name` placeholders; names include the prefix.
    Named(Vec<(String, Value)>),
}

impl SqlParams {
    pub fn none() -> Self {
        Self::None
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: IntoSqlValue,
    {
        Self::Positional(values.into_iter().map(IntoSqlValue::into_sql_value).collect())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoSqlValue,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_sql_value()))
                .collect(),
        )
    }

    /// Append a positional value.
    ///
    /// Panics in debug builds when mixed with named parameters.
    pub fn bind<V: IntoSqlValue>(self, value: V) -> Self {
        match self {
            Self::None => Self::Positional(vec![value.into_sql_value()]),
            Self::Positional(mut values) => {
                values.push(value.into_sql_value());
                Self::Positional(values)
            }
            Self::Named(pairs) => {
                debug_assert!(false, "cannot mix positional and named parameters");
                Self::Named(pairs)
            }
        }
    }

    /// Append a named value.
    pub fn bind_named<K: Into<String>, V: IntoSqlValue>(self, name: K, value: V) -> Self {
        match self {
            Self::None => Self::Named(vec![(name.into(), value.into_sql_value())]),
            Self::Named(mut pairs) => {
                pairs.push((name.into(), value.into_sql_value()));
                Self::Named(pairs)
            }
            Self::Positional(values) => {
                debug_assert!(false, "cannot mix positional and named parameters");
                Self::Positional(values)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind every parameter to `stmt`, checking the placeholder count.
    pub(crate) fn bind_to(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
        let expected = stmt.parameter_count();
        if self.len() != expected {
            return Err(rusqlite::Error::InvalidParameterCount(self.len(), expected));
        }

        match self {
            Self::None => {}
            Self::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
            }
            Self::Named(pairs) => {
                for (name, value) in pairs {
                    let index = stmt
                        .parameter_index(name)?
                        .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<Value>> for SqlParams {
    fn from(values: Vec<Value>) -> Self {
        if values.is_empty() {
            Self::None
        } else {
            Self::Positional(values)
        }
    }
}

fn render_value(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("NULL"),
        Value::Integer(i) => write!(f, "{i}"),
        Value::Real(r) => write!(f, "{r}"),
        Value::Text(s) if s.chars().count() > 64 => {
            let head: String = s.chars().take(64).collect();
            write!(f, "'{head}...'")
        }
        Value::Text(s) => write!(f, "'{s}'"),
        Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
    }
}

/// Renders parameters for error context. Named parameters whose name
/// mentions a password are redacted.
impl fmt::Display for SqlParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("[]"),
            Self::Positional(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    render_value(value, f)?;
                }
                f.write_str("]")
            }
            Self::Named(pairs) => {
                f.write_str("{")?;
                for (i, (name, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: ")?;
                    if name.to_ascii_lowercase().contains("password") {
                        f.write_str("<redacted>")?;
                    } else {
                        render_value(value, f)?;
                    }
                }
                f.write_str("}")
            }
        }
    }
}

/// Build [`SqlParams`] from a list of values or `"name" => value` pairs.
///
/// ```
/// use escolar_db::{sql_params, SqlParams};
///
/// let p = sql_params!["ana@example.org", 3];
/// assert_eq!(p.len(), 2);
///
/// let p = sql_params![":email" => "ana@example.org"];
/// assert!(matches!(p, SqlParams::Named(_)));
///
/// assert!(sql_params![].is_empty());
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        $crate::SqlParams::None
    };
    ($($name:literal => $value:expr),+ $(,)?) => {
        $crate::SqlParams::Named(vec![
            $((::std::string::String::from($name), $crate::IntoSqlValue::into_sql_value($value))),+
        ])
    };
    ($($value:expr),+ $(,)?) => {
        $crate::SqlParams::Positional(vec![
            $($crate::IntoSqlValue::into_sql_value($value)),+
        ])
    };
}

/// A fully materialized result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Read a rusqlite row into an owned one.
    pub(crate) fn from_sqlite(columns: &Arc<[String]>, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(Value::from(row.get_ref(i)?));
        }
        Ok(Self::new(Arc::clone(columns), values))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column, if the column exists.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Typed value of a column by name.
    pub fn get<T: FromSql>(&self, column: &str) -> Result<T> {
        let value = self
            .value(column)
            .ok_or_else(|| Error::database(format!("No such column in result: {column}")))?;
        T::column_result(ValueRef::from(value))
            .map_err(|e| Error::database(format!("Invalid value for column '{column}': {e}")))
    }

    /// Typed value of a column by position.
    pub fn get_index<T: FromSql>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::database(format!("Column index out of range: {index}")))?;
        T::column_result(ValueRef::from(value))
            .map_err(|e| Error::database(format!("Invalid value for column {index}: {e}")))
    }

    /// JSON object view, used by the CLI for display.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| {
                let json = match value {
                    Value::Null => serde_json::Value::Null,
                    Value::Integer(i) => serde_json::Value::from(*i),
                    Value::Real(r) => serde_json::Value::from(*r),
                    Value::Text(s) => serde_json::Value::from(s.as_str()),
                    Value::Blob(b) => serde_json::Value::from(format!("<blob {} bytes>", b.len())),
                };
                (column.clone(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_positional() {
        let params = sql_params!["a", 1, true, None::<String>];
        assert_eq!(
            params,
            SqlParams::Positional(vec![
                Value::Text("a".into()),
                Value::Integer(1),
                Value::Integer(1),
                Value::Null,
            ])
        );
    }

    #[test]
    fn test_macro_named() {
        let params = sql_params![":id" => 7, ":name" => "x"];
        assert_eq!(params.len(), 2);
        assert!(matches!(params, SqlParams::Named(_)));
    }

    #[test]
    fn test_builder_bind() {
        let params = SqlParams::none().bind("a").bind(2u32);
        assert_eq!(
            params,
            SqlParams::Positional(vec![Value::Text("a".into()), Value::Integer(2)])
        );
    }

    #[test]
    fn test_display_redacts_passwords() {
        let params = sql_params![":email" => "a@b.org", ":password_hash" => "$2b$04$secret"];
        let text = params.to_string();
        assert!(text.contains("'a@b.org'"));
        assert!(text.contains("<redacted>"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_bind_checks_parameter_count() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT ?1 + ?2").unwrap();
        let err = sql_params![1].bind_to(&mut stmt).unwrap_err();
        assert!(matches!(err, rusqlite::Error::InvalidParameterCount(1, 2)));
    }

    #[test]
    fn test_bind_rejects_unknown_name() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT :a").unwrap();
        let err = sql_params![":b" => 1].bind_to(&mut stmt).unwrap_err();
        assert!(matches!(err, rusqlite::Error::InvalidParameterName(_)));
    }

    #[test]
    fn test_row_accessors() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(columns, vec![Value::Integer(3), Value::Text("Rut".into())]);

        assert_eq!(row.get::<i64>("id").unwrap(), 3);
        assert_eq!(row.get::<String>("name").unwrap(), "Rut");
        assert_eq!(row.get_index::<String>(1).unwrap(), "Rut");
        assert!(row.get::<i64>("missing").is_err());
        assert!(row.get::<i64>("name").is_err());
        assert_eq!(row.to_json(), serde_json::json!({"id": 3, "name": "Rut"}));
    }
}
