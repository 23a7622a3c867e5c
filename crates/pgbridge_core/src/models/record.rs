//! Row records: ordered column name to value mappings.

use super::value::SqlValue;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One row of insert/update input or one row of tabular output.
///
/// Columns keep the order in which they were added; that order becomes the
/// column order of generated statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    fields: Vec<(String, SqlValue)>,
}

impl RowRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a column value (builder style).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Add or replace a column value, returning the previous one.
    ///
    /// A replaced column keeps its original position.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Option<SqlValue> {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((column, value));
                None
            }
        }
    }

    /// Get the value of a column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    /// Check whether a column is present.
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// Iterate over `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check whether both records carry exactly the same set of columns.
    pub fn same_columns(&self, other: &RowRecord) -> bool {
        self.len() == other.len() && self.columns().all(|c| other.contains(c))
    }
}

impl<K, V> FromIterator<(K, V)> for RowRecord
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RowRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for RowRecord {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Build a `RowRecord` from `column => value` pairs.
///
/// ```
/// use pgbridge_core::record;
///
/// let row = record! { "username" => "john_doe", "active" => true };
/// assert_eq!(row.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::models::RowRecord::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {
        $crate::models::RowRecord::new()$(.with($column, $value))+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_is_kept() {
        let record = RowRecord::new().with("b", 1).with("a", 2).with("c", 3);
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut record = RowRecord::new().with("a", 1).with("b", 2);
        let previous = record.insert("a", 10);
        assert_eq!(previous, Some(SqlValue::Int(1)));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&SqlValue::Int(10)));
    }

    #[test]
    fn test_same_columns_ignores_order() {
        let a = RowRecord::new().with("x", 1).with("y", 2);
        let b = RowRecord::new().with("y", 3).with("x", 4);
        let c = RowRecord::new().with("x", 1).with("z", 2);
        let d = RowRecord::new().with("x", 1);
        assert!(a.same_columns(&b));
        assert!(!a.same_columns(&c));
        assert!(!a.same_columns(&d));
    }

    #[test]
    fn test_record_macro_and_from_iter() {
        let from_macro = crate::record! { "name" => "Laptop", "price" => 999.99 };
        let from_iter: RowRecord =
            vec![("name", SqlValue::from("Laptop")), ("price", SqlValue::from(999.99))]
                .into_iter()
                .collect();
        assert_eq!(from_macro, from_iter);
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let record = crate::record! { "z" => 1, "a" => SqlValue::Null };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"z":1,"a":null}"#);
    }
}
