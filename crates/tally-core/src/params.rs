// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scalar parameter bags attached to events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single parameter value. Only scalars travel on the wire; nested data
/// must be serialized by the caller (see [`ParamValue::json`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
	Null,
	Bool(bool),
	Number(f64),
	String(String),
}

impl ParamValue {
	/// Serializes any value to a JSON string parameter.
	pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
		serde_json::to_string(value).map(ParamValue::String)
	}

	/// Renders the value as a single wire field.
	///
	/// Integral numbers are rendered without a fractional part, null becomes
	/// an empty string.
	pub fn to_wire_string(&self) -> String {
		match self {
			ParamValue::Null => String::new(),
			ParamValue::Bool(b) => b.to_string(),
			ParamValue::Number(n) => n.to_string(),
			ParamValue::String(s) => s.clone(),
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			ParamValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			ParamValue::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			ParamValue::Bool(b) => Some(*b),
			_ => None,
		}
	}
}

impl From<&str> for ParamValue {
	fn from(s: &str) -> Self {
		ParamValue::String(s.to_string())
	}
}

impl From<String> for ParamValue {
	fn from(s: String) -> Self {
		ParamValue::String(s)
	}
}

impl From<bool> for ParamValue {
	fn from(b: bool) -> Self {
		ParamValue::Bool(b)
	}
}

impl From<f64> for ParamValue {
	fn from(n: f64) -> Self {
		if n.is_finite() {
			ParamValue::Number(n)
		} else {
			ParamValue::Null
		}
	}
}

macro_rules! impl_from_integer {
	($($t:ty),*) => {
		$(
			impl From<$t> for ParamValue {
				fn from(n: $t) -> Self {
					ParamValue::Number(n as f64)
				}
			}
		)*
	};
}

impl_from_integer!(i32, i64, u32, u64, usize);

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(ParamValue::Null)
	}
}

impl From<Value> for ParamValue {
	/// Scalars map directly; arrays and objects are stringified.
	fn from(value: Value) -> Self {
		match value {
			Value::Null => ParamValue::Null,
			Value::Bool(b) => ParamValue::Bool(b),
			Value::Number(n) => n.as_f64().map(ParamValue::from).unwrap_or(ParamValue::Null),
			Value::String(s) => ParamValue::String(s),
			nested @ (Value::Array(_) | Value::Object(_)) => ParamValue::String(nested.to_string()),
		}
	}
}

/// A builder for event parameters.
///
/// # Example
///
/// ```
/// use tally_core::Params;
///
/// let params = Params::new()
///     .insert("button_id", "checkout")
///     .insert("page", "/cart")
///     .insert("price", 99.99)
///     .insert("is_premium", true);
/// assert_eq!(params.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
	inner: BTreeMap<String, ParamValue>,
}

impl Params {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a key-value pair (builder style).
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<ParamValue>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Inserts a key-value pair in place.
	pub fn set<K, V>(&mut self, key: K, value: V)
	where
		K: Into<String>,
		V: Into<ParamValue>,
	{
		self.inner.insert(key.into(), value.into());
	}

	/// Merges another bag into this one; values from `other` win.
	pub fn merge(mut self, other: Params) -> Self {
		self.inner.extend(other.inner);
		self
	}

	pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
		self.inner.remove(key)
	}

	pub fn get(&self, key: &str) -> Option<&ParamValue> {
		self.inner.get(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.inner.contains_key(key)
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
		self.inner.iter()
	}
}

impl IntoIterator for Params {
	type Item = (String, ParamValue);
	type IntoIter = std::collections::btree_map::IntoIter<String, ParamValue>;

	fn into_iter(self) -> Self::IntoIter {
		self.inner.into_iter()
	}
}

impl FromIterator<(String, ParamValue)> for Params {
	fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
		Self {
			inner: iter.into_iter().collect(),
		}
	}
}

impl From<Value> for Params {
	/// Objects become bags (nested members stringified); anything else is empty.
	fn from(value: Value) -> Self {
		match value {
			Value::Object(map) => map.into_iter().map(|(k, v)| (k, v.into())).collect(),
			_ => Self::new(),
		}
	}
}
