#![forbid(unsafe_code)]

//! Dynamic values stored in properties.
//!
//! A [`Value`] is what a property holds and what flows through bindings.
//! Scalars compare by value, while objects, lists and maps compare by
//! reference, so replacing a list with an equal-looking copy still counts as
//! a new value unless a list-aware comparator says otherwise.
//!
//! # Invariants
//!
//! 1. `Null` satisfies every [`ValueType`].
//! 2. [`Value::strict_eq`] is reflexive for every value except `NaN`.
//! 3. [`has_change`] never reports `NaN -> NaN` as a change.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::object::{Class, Object};

/// A value held by a property.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// Reference to an object in the graph.
    Object(Object),
    /// Ordered sequence, shared by reference.
    List(Rc<[Value]>),
    /// String-keyed dictionary, shared by reference.
    Map(Rc<BTreeMap<String, Value>>),
}

impl Value {
    /// Build a list value from any iterator of values.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect::<Vec<_>>().into())
    }

    /// Build a map value from `(key, value)` pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is a number holding `NaN`.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Number(n) if n.is_nan())
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Strict identity: scalars by value (`NaN` is never equal to itself),
    /// objects, lists and maps by reference.
    #[must_use]
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Name of the variant, used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "Boolean",
            Self::Number(_) => "Number",
            Self::Str(_) => "String",
            Self::Object(_) => "Object",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
        }
    }
}

/// Default change detection: strict inequality, except that two `NaN`s are
/// considered unchanged.
#[must_use]
pub fn has_change(old: &Value, new: &Value) -> bool {
    !old.strict_eq(new) && (!old.is_nan() || !new.is_nan())
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Self::Object(v)
    }
}

impl From<&Object> for Value {
    fn from(v: &Object) -> Self {
        Self::Object(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// ValueType
// ---------------------------------------------------------------------------

/// Declared type of a property value (or of the items of a container).
#[derive(Clone, Debug, Default)]
pub enum ValueType {
    /// Untyped (`*`).
    #[default]
    Any,
    Bool,
    Number,
    Str,
    /// Any object, or only instances of the given class and its subclasses.
    Object(Option<Class>),
    List,
    Map,
}

impl ValueType {
    /// Whether `value` satisfies this type. `Null` always does.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Any, _) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Number, Value::Number(_))
            | (Self::Str, Value::Str(_))
            | (Self::List, Value::List(_))
            | (Self::Map, Value::Map(_))
            | (Self::Object(None), Value::Object(_)) => true,
            (Self::Object(Some(class)), Value::Object(obj)) => obj.class().is_subclass_of(class),
            _ => false,
        }
    }

    /// Null-safe zero value: `NaN` for numbers, `false` for booleans, the
    /// empty string for strings, `Null` otherwise.
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Number => Value::Number(f64::NAN),
            Self::Bool => Value::Bool(false),
            Self::Str => Value::Str("".into()),
            _ => Value::Null,
        }
    }

    /// Human-readable type name.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Any => "*".to_owned(),
            Self::Bool => "Boolean".to_owned(),
            Self::Number => "Number".to_owned(),
            Self::Str => "String".to_owned(),
            Self::Object(None) => "Object".to_owned(),
            Self::Object(Some(class)) => class.name().to_owned(),
            Self::List => "List".to_owned(),
            Self::Map => "Map".to_owned(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
