#![forbid(unsafe_code)]

//! Property kinds: how a value is type-checked, compared and scanned for
//! observable sub-values.

use smallvec::SmallVec;

use crate::object::Object;
use crate::property::Comparator;
use crate::value::{Value, ValueType, has_change};

/// Shape of the values a property holds.
#[derive(Clone, Debug, Default)]
pub enum PropertyKind {
    /// A single value of the declared type.
    #[default]
    Plain,
    /// An ordered sequence whose items have `item_type`.
    List { item_type: ValueType },
    /// A string-keyed map whose values have `item_type`.
    Map { item_type: ValueType },
    /// One of a fixed set of values.
    Enumeration { values: Vec<Value> },
}

impl PropertyKind {
    /// Kind-specific part of the type check. `value_type` has already
    /// accepted `value` and `value` is not `Null`.
    pub(crate) fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Plain, _) => true,
            (Self::List { item_type }, Value::List(items)) => {
                items.iter().all(|item| item_type.accepts(item))
            }
            (Self::Map { item_type }, Value::Map(entries)) => {
                entries.values().all(|item| item_type.accepts(item))
            }
            (Self::Enumeration { values }, value) => values.iter().any(|v| v.strict_eq(value)),
            _ => false,
        }
    }

    pub(crate) fn type_name(&self, value_type: &ValueType) -> String {
        match self {
            Self::Plain | Self::Enumeration { .. } => value_type.name(),
            Self::List { item_type } => format!("List<{item_type}>"),
            Self::Map { item_type } => format!("Map<{item_type}>"),
        }
    }

    /// Observable objects contained in `value` that should be forwarded
    /// from. Values that are (or are contained in) `default` are skipped.
    pub(crate) fn dependencies(&self, value: &Value, default: &Value) -> SmallVec<[Object; 1]> {
        let observable = |item: &Value| match item {
            Value::Object(obj) if obj.is_observable() => Some(obj.clone()),
            _ => None,
        };

        match (self, value) {
            (Self::Plain, value) if !value.strict_eq(default) => {
                observable(value).into_iter().collect()
            }
            (Self::List { .. }, Value::List(items)) => {
                let defaults = default.as_list().unwrap_or_default();
                items
                    .iter()
                    .filter(|item| !defaults.iter().any(|d| d.strict_eq(item)))
                    .filter_map(observable)
                    .collect()
            }
            (Self::Map { .. }, Value::Map(entries)) => {
                let defaults: SmallVec<[&Value; 4]> = default
                    .as_map()
                    .map(|m| m.values().collect())
                    .unwrap_or_default();
                entries
                    .values()
                    .filter(|item| !defaults.iter().any(|d| d.strict_eq(item)))
                    .filter_map(observable)
                    .collect()
            }
            _ => SmallVec::new(),
        }
    }

    /// Change detection used when no whole-value comparator is installed.
    pub(crate) fn has_change(
        &self,
        target: &Object,
        old: &Value,
        new: &Value,
        item_comparator: Option<&Comparator>,
    ) -> bool {
        let item_changed = |a: &Value, b: &Value| match item_comparator {
            Some(cmp) => cmp(target, a, b),
            None => has_change(a, b),
        };

        match self {
            Self::Plain | Self::Enumeration { .. } => has_change(old, new),
            Self::List { .. } => {
                if old.strict_eq(new) {
                    return false;
                }
                match (old.as_list(), new.as_list()) {
                    (Some(a), Some(b)) => {
                        a.len() != b.len() || a.iter().zip(b).any(|(x, y)| item_changed(x, y))
                    }
                    _ => true,
                }
            }
            Self::Map { .. } => {
                if old.strict_eq(new) {
                    return false;
                }
                match (old.as_map(), new.as_map()) {
                    (Some(a), Some(b)) => {
                        a.iter().any(|(k, x)| b.get(k).is_none_or(|y| item_changed(x, y)))
                            || b.keys().any(|k| !a.contains_key(k))
                    }
                    _ => true,
                }
            }
        }
    }
}
