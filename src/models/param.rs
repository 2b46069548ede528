//! Named command parameters.

use crate::models::value::{ToValue, Value};
use serde::{Deserialize, Serialize};

/// A named parameter. Placeholders in command text reference it as `@name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: Value,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl ToValue) -> Self {
        Self {
            name: name.into(),
            value: value.to_value(),
        }
    }

    /// Create an explicit NULL parameter.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
        }
    }
}

/// Ordered list of named parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterList(Vec<Param>);

impl ParameterList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a parameter (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        self.push(Param::new(name, value));
        self
    }

    /// Append a parameter. Duplicate names are rejected later by the binder.
    pub fn push(&mut self, param: Param) {
        self.0.push(param);
    }

    /// Replace the value of an existing parameter (case-insensitive) or append it.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.0.iter_mut().find(|p| p.name.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.value = value,
            None => self.0.push(Param {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Look up a parameter value by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Param>> for ParameterList {
    fn from(params: Vec<Param>) -> Self {
        Self(params)
    }
}

impl FromIterator<Param> for ParameterList {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ParameterList {
    type Item = Param;
    type IntoIter = std::vec::IntoIter<Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParameterList {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
