//! Positional argument list handed to procedures.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Fault;

/// Ordered positional arguments from a request's `params` array.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Vec<Value>);

impl Params {
    /// Wrap a list of values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no arguments were passed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the argument at `index`, failing if absent or mistyped.
    pub fn required<T: DeserializeOwned>(&self, index: usize) -> Result<T, Fault> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| Fault::new(format!("missing argument {index}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Fault::new(format!("invalid argument {index}: {e}")))
    }

    /// Deserialize the argument at `index`; absent or `null` yields `None`.
    pub fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, Fault> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.required(index).map(Some),
        }
    }

    /// Iterate over the raw arguments.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Take the underlying values.
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
