//! Translation between domain models and schema-bound records.
//!
//! Domain models are plain `serde` types. Their serialized field names are the
//! column names; any renaming belongs on the model via `#[serde(rename)]`.

use std::fmt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use super::{Record, RepoError, Result, Value};

/// Domain → Record. The model must serialize to a JSON object.
pub fn to_record<M: Serialize + ?Sized>(model: &M) -> Result<Record> {
    match serde_json::to_value(model)? {
        JsonValue::Object(fields) => json_object_to_record(&fields),
        other => Err(RepoError::Validation(format!(
            "Expected an object-shaped model, got {}",
            json_kind(&other)
        ))),
    }
}

/// Record → Domain.
pub fn from_record<M: DeserializeOwned>(record: &Record) -> Result<M> {
    let fields: Map<String, JsonValue> = record
        .iter()
        .map(|(column, value)| (column.clone(), value.to_json()))
        .collect();
    Ok(serde_json::from_value(JsonValue::Object(fields))?)
}

pub(crate) fn json_object_to_record(fields: &Map<String, JsonValue>) -> Result<Record> {
    fields
        .iter()
        .map(|(column, value)| Ok((column.clone(), Value::from_json(value)?)))
        .collect()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Primary-key values, parallel to the entity's ordered key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extracts the key columns from a record; every key column must be present.
    pub fn from_record(columns: &[String], record: &Record) -> Result<Self> {
        columns
            .iter()
            .map(|column| {
                record.get(column).cloned().ok_or_else(|| {
                    RepoError::Validation(format!("Missing primary key column '{}'", column))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Pairs the values with their columns, checking the arity first.
    pub fn zip<'a>(&'a self, columns: &'a [String]) -> Result<impl Iterator<Item = (&'a String, &'a Value)>> {
        if columns.len() != self.0.len() {
            return Err(RepoError::Validation(format!(
                "Primary key expects {} value(s), got {}",
                columns.len(),
                self.0.len()
            )));
        }
        Ok(columns.iter().zip(self.0.iter()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Value::to_literal).collect();
        write!(f, "({})", parts.join(", "))
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self(vec![Value::Integer(value)])
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(vec![Value::Text(value)])
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Self(vec![a.into(), b.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        title: String,
        archived: Option<bool>,
    }

    #[test]
    fn test_model_record_translation() {
        let note = Note { id: 3, title: "hello".into(), archived: None };
        let record = to_record(&note).unwrap();
        assert_eq!(record.get("archived"), Some(&Value::Null));

        let back: Note = from_record(&record).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_scalar_model_is_rejected() {
        assert!(matches!(to_record(&5), Err(RepoError::Validation(_))));
    }

    #[test]
    fn test_key_from_record_requires_every_column() {
        let record = to_record(&Note { id: 1, title: "a".into(), archived: None }).unwrap();
        let columns = vec!["id".to_string(), "tenant_id".to_string()];
        assert!(Key::from_record(&columns, &record).is_err());
        assert_eq!(Key::from_record(&columns[..1], &record).unwrap(), Key::from(1_i64));
    }

    #[test]
    fn test_key_arity_check() {
        let key = Key::from((1, "acme"));
        let columns = vec!["id".to_string()];
        assert!(key.zip(&columns).is_err());
        assert_eq!(key.to_string(), "(1, 'acme')");
    }
}
