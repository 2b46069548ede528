//! Result rows.
//!
//! A `Record` is one decoded row: column names paired with values, in
//! statement order. A `RowCursor` is the forward-only sequence of records a
//! query produced; it is moved into the mapper and consumed exactly once.

use crate::models::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Look up a column by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// The first column's value, if any.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    /// Take ownership of the first column's value.
    pub fn into_first(self) -> Option<Value> {
        self.columns.into_iter().next().map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Forward-only, single-pass sequence of records.
#[derive(Debug)]
pub struct RowCursor {
    rows: std::vec::IntoIter<Record>,
}

impl RowCursor {
    pub fn new(rows: Vec<Record>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for RowCursor {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
