#![forbid(unsafe_code)]

//! Property descriptors and per-instance property storage.
//!
//! A [`Property`] is an immutable descriptor shared by every instance of the
//! classes that declare it. Values live in per-(object, property) contexts
//! kept in a weakly-keyed store, so objects never carry hidden state fields
//! and the store never keeps an object alive.
//!
//! # Read path
//!
//! `on_read` hook, then the getter override (type-checked) or the stored
//! value (or the default when nothing was stored), then the read filter
//! (type-checked when it returns a different value), then `Null` is
//! normalized to the zero value.
//!
//! # Write path
//!
//! `Null` is normalized to the zero value, then the write filter
//! (type-checked when it returns a different value), then the internal
//! write: a re-entrant write of the same (object, property) is a no-op; the
//! setter runs, the value is stored and, for observable properties, change
//! notification and dependency forwarding follow. Observable properties only
//! write when the change comparator reports a change. `on_write` runs last.
//!
//! # Invariants
//!
//! 1. With a getter installed, the context store is never touched.
//! 2. `read_only(true)` keeps any write key, `read_only(false)` clears it,
//!    `read_only_with_key(k)` sets both.
//! 3. The default value satisfies the declared type.

pub(crate) mod context;
mod kind;
pub(crate) mod notifier;

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use context::context_count;
pub use kind::PropertyKind;

use crate::error::{PropertyError, Result, TypeOrigin};
use crate::event::{EventData, EventKey};
use crate::object::Object;
use crate::value::{Value, ValueType};
use context::{PropertyContext, WritingGuard};
use notifier::ChangeNotifier;

/// Getter override: computes the value instead of reading storage.
pub type Getter = Rc<dyn Fn(&Object) -> Value>;
/// Setter override or pre-write hook.
pub type Setter = Rc<dyn Fn(&Object, &Value)>;
/// Read or write filter.
pub type Filter = Rc<dyn Fn(&Object, &Value) -> Value>;
/// Side-effect hook run before reads or after writes.
pub type Hook = Rc<dyn Fn(&Object)>;
/// Change predicate: `true` when `old -> new` is a change.
pub type Comparator = Rc<dyn Fn(&Object, &Value, &Value) -> bool>;
/// Callback invoked ahead of ordinary listeners of a property's changed event.
pub type ChangedHook = Rc<dyn Fn(&Object, &Rc<EventData>) -> Result<()>>;

/// Stable identity of a [`Property`] descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u64);

/// Opaque capability token gating internal reads and writes.
///
/// Every key created with [`AccessKey::new`] is distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessKey(u64);

impl AccessKey {
    #[must_use]
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for AccessKey {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// Shared handle to an immutable property descriptor.
#[derive(Clone)]
pub struct Property(Rc<PropertyInner>);

struct PropertyInner {
    id: PropertyId,
    name: String,
    value_type: ValueType,
    kind: PropertyKind,
    null_value: Value,
    default_value: Value,
    read_only: bool,
    internal_read_key: Option<AccessKey>,
    internal_write_key: Option<AccessKey>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    read_filter: Option<Filter>,
    write_filter: Option<Filter>,
    on_read: Option<Hook>,
    on_write: Option<Hook>,
    notifier: Option<ChangeNotifier>,
}

impl Property {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name.into())
    }

    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.0.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.0.value_type
    }

    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.0.kind
    }

    /// Value substituted for `Null` on reads and writes.
    #[must_use]
    pub fn null_value(&self) -> &Value {
        &self.0.null_value
    }

    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.0.default_value
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.0.read_only
    }

    #[must_use]
    pub fn allows_internal_read(&self) -> bool {
        self.0.internal_read_key.is_some()
    }

    #[must_use]
    pub fn allows_internal_write(&self) -> bool {
        self.0.internal_write_key.is_some()
    }

    #[must_use]
    pub fn can_read_internal(&self, key: &AccessKey) -> bool {
        self.0.internal_read_key.as_ref() == Some(key)
    }

    #[must_use]
    pub fn can_write_internal(&self, key: &AccessKey) -> bool {
        self.0.internal_write_key.as_ref() == Some(key)
    }

    /// Whether writes fire a changed event.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.0.notifier.is_some()
    }

    /// The changed event fired on targets of this property.
    #[must_use]
    pub fn changed_event(&self) -> EventKey {
        EventKey::PropertyChanged(self.clone())
    }

    #[must_use]
    pub fn type_name(&self) -> String {
        self.0.kind.type_name(&self.0.value_type)
    }

    #[must_use]
    pub fn is_valid_type(&self, value: &Value) -> bool {
        value.is_null() || (self.0.value_type.accepts(value) && self.0.kind.accepts(value))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Property) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Destroy `target`'s context for this property, releasing any
    /// dependency listeners. The next read returns the default.
    pub fn release(&self, target: &Object) {
        context::release(target, self);
    }

    pub(crate) fn on_changed_hook(&self) -> Option<ChangedHook> {
        self.0.notifier.as_ref().and_then(|n| n.on_changed.clone())
    }

    pub(crate) fn type_error(&self, origin: TypeOrigin) -> PropertyError {
        PropertyError::Type {
            property: self.0.name.clone(),
            expected: self.type_name(),
            origin,
        }
    }

    fn filtered(&self, original: Value, filtered: Value, origin: TypeOrigin) -> Result<Value> {
        if filtered.strict_eq(&original) {
            return Ok(original);
        }
        if !self.is_valid_type(&filtered) {
            return Err(self.type_error(origin));
        }
        Ok(filtered)
    }

    // -- storage algorithms --------------------------------------------------

    pub(crate) fn get(&self, target: &Object) -> Result<Value> {
        if let Some(on_read) = &self.0.on_read {
            on_read(target);
        }

        let mut value = self.get_internal(target)?;
        if let Some(filter) = &self.0.read_filter {
            let filtered = filter(target, &value);
            value = self.filtered(value, filtered, TypeOrigin::ReadFilter)?;
        }

        if value.is_null() {
            value = self.0.null_value.clone();
        }
        Ok(value)
    }

    pub(crate) fn set(&self, target: &Object, value: Value) -> Result<()> {
        let mut value = if value.is_null() {
            self.0.null_value.clone()
        } else {
            value
        };

        if let Some(filter) = &self.0.write_filter {
            let filtered = filter(target, &value);
            value = self.filtered(value, filtered, TypeOrigin::WriteFilter)?;
        }

        if !self.set_internal(target, value)? {
            return Ok(());
        }

        if let Some(on_write) = &self.0.on_write {
            on_write(target);
        }
        Ok(())
    }

    pub(crate) fn get_internal(&self, target: &Object) -> Result<Value> {
        if let Some(getter) = &self.0.getter {
            let value = getter(target);
            if !self.is_valid_type(&value) {
                return Err(self.type_error(TypeOrigin::Getter));
            }
            return Ok(value);
        }

        match context::lookup(target, self) {
            Some(context) => Ok(context.value.borrow().clone()),
            None => Ok(self.0.default_value.clone()),
        }
    }

    /// Returns `false` when the write was skipped because one was already in
    /// progress for this (target, property).
    pub(crate) fn set_internal(&self, target: &Object, value: Value) -> Result<bool> {
        if self.0.getter.is_some() {
            if let Some(setter) = &self.0.setter {
                setter(target, &value);
            }
            return Ok(true);
        }

        let context = context::lookup_or_create(target, self);
        let Some(_writing) = WritingGuard::enter(&context) else {
            tracing::trace!(property = %self.0.name, "re-entrant write ignored");
            return Ok(false);
        };

        if self.needs_write(target, &context, &value) {
            if let Some(setter) = &self.0.setter {
                setter(target, &value);
            }
            self.write_value(target, &context, value);
        }
        Ok(true)
    }

    pub(crate) fn setup_context(&self, target: &Object) -> PropertyContext {
        PropertyContext::new(target, self.0.default_value.clone())
    }

    pub(crate) fn teardown_context(&self, context: &PropertyContext) {
        if self.is_observable() {
            notifier::teardown_dependencies(context);
            context.forwarding.borrow_mut().clear();
        }
        let value = context.value.replace(Value::Null);
        drop(value);
    }

    fn needs_write(&self, target: &Object, context: &PropertyContext, value: &Value) -> bool {
        let Some(notifier) = &self.0.notifier else {
            return true;
        };
        let old = context.value.borrow().clone();
        match &notifier.change_comparator {
            Some(cmp) => cmp(target, &old, value),
            None => self.0.kind.has_change(
                target,
                &old,
                value,
                notifier.item_change_comparator.as_ref(),
            ),
        }
    }

    fn write_value(&self, target: &Object, context: &Rc<PropertyContext>, value: Value) {
        if !self.is_observable() {
            context.value.replace(value);
            tracing::trace!(property = %self.0.name, "property written");
            return;
        }

        notifier::teardown_dependencies(context);
        let old = context.value.replace(value.clone());

        let dependencies = self.0.kind.dependencies(&value, &self.0.default_value);
        tracing::trace!(
            property = %self.0.name,
            dependencies = dependencies.len(),
            "observable property written"
        );
        notifier::setup_dependencies(self, context, dependencies);

        notifier::notify_changed(self, target, old, value);
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.0.name)
            .field("type", &self.type_name())
            .field("read_only", &self.0.read_only)
            .field("observable", &self.is_observable())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Property`]. Descriptors are immutable once built.
pub struct PropertyBuilder {
    name: String,
    value_type: ValueType,
    kind: PropertyKind,
    default_value: Value,
    read_only: bool,
    internal_read_key: Option<AccessKey>,
    internal_write_key: Option<AccessKey>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    read_filter: Option<Filter>,
    write_filter: Option<Filter>,
    on_read: Option<Hook>,
    on_write: Option<Hook>,
    notifier: Option<ChangeNotifier>,
}

impl PropertyBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            value_type: ValueType::Any,
            kind: PropertyKind::Plain,
            default_value: Value::Null,
            read_only: false,
            internal_read_key: None,
            internal_write_key: None,
            getter: None,
            setter: None,
            read_filter: None,
            write_filter: None,
            on_read: None,
            on_write: None,
            notifier: None,
        }
    }

    #[must_use]
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// List-valued property whose items have `item_type`.
    #[must_use]
    pub fn list(mut self, item_type: ValueType) -> Self {
        self.value_type = ValueType::List;
        self.kind = PropertyKind::List { item_type };
        self
    }

    /// Map-valued property whose values have `item_type`.
    #[must_use]
    pub fn map(mut self, item_type: ValueType) -> Self {
        self.value_type = ValueType::Map;
        self.kind = PropertyKind::Map { item_type };
        self
    }

    /// Property restricted to `values`. Without an explicit default, the
    /// first value is the default and the zero value.
    #[must_use]
    pub fn enumeration(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.kind = PropertyKind::Enumeration {
            values: values.into_iter().collect(),
        };
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    /// `true` marks the property read-only; `false` also revokes internal
    /// write access.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        if !read_only {
            self.internal_write_key = None;
        }
        self
    }

    /// Read-only for the public, writable by holders of `key`.
    #[must_use]
    pub fn read_only_with_key(mut self, key: AccessKey) -> Self {
        self.read_only = true;
        self.internal_write_key = Some(key);
        self
    }

    #[must_use]
    pub fn allow_internal_read(mut self, key: AccessKey) -> Self {
        self.internal_read_key = Some(key);
        self
    }

    #[must_use]
    pub fn allow_internal_write(mut self, key: AccessKey) -> Self {
        self.internal_write_key = Some(key);
        self
    }

    #[must_use]
    pub fn allow_internal_access(self, key: AccessKey) -> Self {
        self.allow_internal_read(key).allow_internal_write(key)
    }

    /// Compute the value instead of storing it. Storage is bypassed entirely.
    #[must_use]
    pub fn getter(mut self, getter: impl Fn(&Object) -> Value + 'static) -> Self {
        self.getter = Some(Rc::new(getter));
        self
    }

    /// Runs before each store (or instead of it, with a getter).
    #[must_use]
    pub fn setter(mut self, setter: impl Fn(&Object, &Value) + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    #[must_use]
    pub fn read_filter(mut self, filter: impl Fn(&Object, &Value) -> Value + 'static) -> Self {
        self.read_filter = Some(Rc::new(filter));
        self
    }

    #[must_use]
    pub fn write_filter(mut self, filter: impl Fn(&Object, &Value) -> Value + 'static) -> Self {
        self.write_filter = Some(Rc::new(filter));
        self
    }

    #[must_use]
    pub fn on_read(mut self, hook: impl Fn(&Object) + 'static) -> Self {
        self.on_read = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_write(mut self, hook: impl Fn(&Object) + 'static) -> Self {
        self.on_write = Some(Rc::new(hook));
        self
    }

    /// Fire a changed event on every effective write and forward changes of
    /// observable values held by the property.
    #[must_use]
    pub fn observable(mut self) -> Self {
        self.notifier.get_or_insert_with(ChangeNotifier::default);
        self
    }

    /// Replace the default change detection. Implies [`observable`](Self::observable).
    #[must_use]
    pub fn change_comparator(
        mut self,
        cmp: impl Fn(&Object, &Value, &Value) -> bool + 'static,
    ) -> Self {
        self.notifier
            .get_or_insert_with(ChangeNotifier::default)
            .change_comparator = Some(Rc::new(cmp));
        self
    }

    /// Element comparison for list and map kinds. Implies
    /// [`observable`](Self::observable).
    #[must_use]
    pub fn item_change_comparator(
        mut self,
        cmp: impl Fn(&Object, &Value, &Value) -> bool + 'static,
    ) -> Self {
        self.notifier
            .get_or_insert_with(ChangeNotifier::default)
            .item_change_comparator = Some(Rc::new(cmp));
        self
    }

    /// Hook run before ordinary listeners whenever the changed event fires,
    /// forwarded changes included. Implies [`observable`](Self::observable).
    #[must_use]
    pub fn on_changed(
        mut self,
        hook: impl Fn(&Object, &Rc<EventData>) -> Result<()> + 'static,
    ) -> Self {
        self.notifier
            .get_or_insert_with(ChangeNotifier::default)
            .on_changed = Some(Rc::new(hook));
        self
    }

    pub fn build(self) -> Result<Property> {
        if self.name.is_empty() {
            return Err(PropertyError::InvalidArgument(
                "property name must be non-empty".into(),
            ));
        }

        let null_value = match &self.kind {
            PropertyKind::Enumeration { values } => match values.first() {
                Some(first) => first.clone(),
                None => {
                    return Err(PropertyError::InvalidArgument(format!(
                        "enumeration property \"{}\" must declare at least one value",
                        self.name
                    )));
                }
            },
            _ => self.value_type.zero_value(),
        };
        let default_value = if self.default_value.is_null() {
            null_value.clone()
        } else {
            self.default_value
        };

        static NEXT: AtomicU64 = AtomicU64::new(1);
        let property = Property(Rc::new(PropertyInner {
            id: PropertyId(NEXT.fetch_add(1, Ordering::Relaxed)),
            name: self.name,
            value_type: self.value_type,
            kind: self.kind,
            null_value,
            default_value,
            read_only: self.read_only,
            internal_read_key: self.internal_read_key,
            internal_write_key: self.internal_write_key,
            getter: self.getter,
            setter: self.setter,
            read_filter: self.read_filter,
            write_filter: self.write_filter,
            on_read: self.on_read,
            on_write: self.on_write,
            notifier: self.notifier,
        }));

        if !property.is_valid_type(property.default_value()) {
            return Err(property.type_error(TypeOrigin::DefaultValue));
        }
        Ok(property)
    }
}

impl fmt::Debug for PropertyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBuilder")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("observable", &self.notifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::event::Priority;
    use crate::object::Class;

    fn target_with(properties: &[&Property]) -> Object {
        let class = properties
            .iter()
            .fold(Class::builder("Target"), |b, p| b.property(p))
            .build();
        Object::new(&class)
    }

    fn count_changes(target: &Object, property: &Property) -> (Rc<Cell<usize>>, crate::event::ListenerGuard) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let guard = target.listen(property.changed_event(), Priority::DEFAULT, move |_| {
            c.set(c.get() + 1);
            Ok(())
        });
        (count, guard)
    }

    #[test]
    fn unset_property_reads_default() {
        let p = Property::builder("size")
            .value_type(ValueType::Number)
            .default_value(12)
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        assert_eq!(obj.get(&p).unwrap().as_number(), Some(12.0));
    }

    #[test]
    fn null_normalizes_to_zero_value() {
        let n = Property::builder("n").value_type(ValueType::Number).build().unwrap();
        let s = Property::builder("s").value_type(ValueType::Str).build().unwrap();
        let b = Property::builder("b").value_type(ValueType::Bool).build().unwrap();
        let obj = target_with(&[&n, &s, &b]);
        obj.set(&n, Value::Null).unwrap();
        obj.set(&s, Value::Null).unwrap();
        obj.set(&b, Value::Null).unwrap();
        assert!(obj.get(&n).unwrap().is_nan());
        assert_eq!(obj.get(&s).unwrap().as_str(), Some(""));
        assert_eq!(obj.get(&b).unwrap().as_bool(), Some(false));
    }

    #[test]
    fn default_must_match_type() {
        let err = Property::builder("n")
            .value_type(ValueType::Number)
            .default_value("nope")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PropertyError::Type {
                origin: TypeOrigin::DefaultValue,
                ..
            }
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(
            Property::builder("").build(),
            Err(PropertyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let n = Property::builder("n").value_type(ValueType::Number).build().unwrap();
        let obj = target_with(&[&n]);
        assert!(matches!(
            obj.set(&n, "text"),
            Err(PropertyError::Type {
                origin: TypeOrigin::Value,
                ..
            })
        ));
    }

    #[test]
    fn read_only_requires_write_key() {
        let key = AccessKey::new();
        let p = Property::builder("id")
            .value_type(ValueType::Number)
            .read_only_with_key(key)
            .build()
            .unwrap();
        let obj = target_with(&[&p]);

        assert!(matches!(obj.set(&p, 1), Err(PropertyError::ReadOnly { .. })));
        assert!(matches!(
            obj.set_internal(&p, 1, &AccessKey::new()),
            Err(PropertyError::ReadOnly { .. })
        ));
        obj.set_internal(&p, 7, &key).unwrap();
        assert_eq!(obj.get(&p).unwrap().as_number(), Some(7.0));
    }

    #[test]
    fn read_only_toggle_derives_write_key() {
        let key = AccessKey::new();
        let cleared = Property::builder("a")
            .read_only_with_key(key)
            .read_only(false)
            .build()
            .unwrap();
        assert!(!cleared.is_read_only());
        assert!(!cleared.allows_internal_write());

        let kept = Property::builder("b")
            .allow_internal_write(key)
            .read_only(true)
            .build()
            .unwrap();
        assert!(kept.is_read_only());
        assert!(kept.can_write_internal(&key));
    }

    #[test]
    fn internal_read_requires_read_key() {
        let key = AccessKey::new();
        let p = Property::builder("secret")
            .default_value("s")
            .read_filter(|_, _| Value::from("masked"))
            .allow_internal_access(key)
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        assert_eq!(obj.get(&p).unwrap().as_str(), Some("masked"));
        assert_eq!(obj.get_internal(&p, &key).unwrap().as_str(), Some("s"));
        assert!(matches!(
            obj.get_internal(&p, &AccessKey::new()),
            Err(PropertyError::AccessDenied { .. })
        ));
    }

    #[test]
    fn write_filter_result_is_type_checked() {
        let clamp = Property::builder("clamped")
            .value_type(ValueType::Number)
            .write_filter(|_, v| Value::from(v.as_number().unwrap_or(0.0).clamp(0.0, 10.0)))
            .build()
            .unwrap();
        let broken = Property::builder("broken")
            .value_type(ValueType::Number)
            .write_filter(|_, _| Value::from("oops"))
            .build()
            .unwrap();
        let obj = target_with(&[&clamp, &broken]);

        obj.set(&clamp, 42).unwrap();
        assert_eq!(obj.get(&clamp).unwrap().as_number(), Some(10.0));
        assert!(matches!(
            obj.set(&broken, 1),
            Err(PropertyError::Type {
                origin: TypeOrigin::WriteFilter,
                ..
            })
        ));
    }

    #[test]
    fn getter_bypasses_storage() {
        let before = context_count();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let p = Property::builder("computed")
            .value_type(ValueType::Number)
            .getter(|_| Value::from(99))
            .setter(move |_, v| sink.borrow_mut().push(v.clone()))
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        obj.set(&p, 1).unwrap();
        assert_eq!(obj.get(&p).unwrap().as_number(), Some(99.0));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(context_count(), before);
    }

    #[test]
    fn getter_result_is_type_checked() {
        let p = Property::builder("bad")
            .value_type(ValueType::Number)
            .getter(|_| Value::from(true))
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        assert!(matches!(
            obj.get(&p),
            Err(PropertyError::Type {
                origin: TypeOrigin::Getter,
                ..
            })
        ));
    }

    #[test]
    fn hooks_run_around_access() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        let p = Property::builder("p")
            .on_read(move |_| l1.borrow_mut().push("read"))
            .setter(move |_, _| l2.borrow_mut().push("setter"))
            .on_write(move |_| l3.borrow_mut().push("write"))
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        obj.set(&p, 1).unwrap();
        obj.get(&p).unwrap();
        assert_eq!(*log.borrow(), vec!["setter", "write", "read"]);
    }

    #[test]
    fn observable_fires_only_on_change() {
        let p = Property::builder("n")
            .value_type(ValueType::Number)
            .observable()
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        let (count, _guard) = count_changes(&obj, &p);

        obj.set(&p, 1).unwrap();
        obj.set(&p, 1).unwrap();
        obj.set(&p, f64::NAN).unwrap();
        obj.set(&p, f64::NAN).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn change_comparator_replaces_default() {
        let p = Property::builder("n")
            .value_type(ValueType::Number)
            .change_comparator(|_, old, new| {
                (old.as_number().unwrap_or(0.0) - new.as_number().unwrap_or(0.0)).abs() >= 1.0
            })
            .default_value(0)
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        let (count, _guard) = count_changes(&obj, &p);
        obj.set(&p, 0.5).unwrap();
        assert_eq!(count.get(), 0);
        assert_eq!(obj.get(&p).unwrap().as_number(), Some(0.0));
        obj.set(&p, 2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn reentrant_write_is_ignored() {
        let p = Property::builder("n")
            .value_type(ValueType::Number)
            .observable()
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        let inner = obj.clone();
        let prop = p.clone();
        let _guard = obj.listen(p.changed_event(), Priority::DEFAULT, move |_| {
            inner.set(&prop, 1000)
        });
        obj.set(&p, 1).unwrap();
        assert_eq!(obj.get(&p).unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn on_changed_runs_before_listeners_and_can_stop_them() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let hook_log = Rc::clone(&order);
        let p = Property::builder("n")
            .on_changed(move |_, data| {
                hook_log.borrow_mut().push("hook");
                if data.change().and_then(|c| c.new_value.as_number()) == Some(2.0) {
                    data.stop_immediate_propagation();
                }
                Ok(())
            })
            .build()
            .unwrap();
        let obj = target_with(&[&p]);
        let listener_log = Rc::clone(&order);
        let _guard = obj.listen(p.changed_event(), Priority::DEFAULT, move |_| {
            listener_log.borrow_mut().push("listener");
            Ok(())
        });

        obj.set(&p, 1).unwrap();
        obj.set(&p, 2).unwrap();
        assert_eq!(*order.borrow(), vec!["hook", "listener", "hook"]);
    }

    #[test]
    fn failing_listener_does_not_block_siblings() {
        let p = Property::builder("n").observable().build().unwrap();
        let obj = target_with(&[&p]);
        let _failing = obj.listen(p.changed_event(), Priority(-1), |_| {
            Err(PropertyError::InvalidArgument("boom".into()))
        });
        let (count, _guard) = count_changes(&obj, &p);
        obj.set(&p, 1).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn property_event_cascades_to_generic_changed() {
        let p = Property::builder("n").observable().build().unwrap();
        let obj = target_with(&[&p]);
        let generic = Rc::new(Cell::new(0));
        let g = Rc::clone(&generic);
        let _guard = obj.listen(EventKey::Changed, Priority::DEFAULT, move |_| {
            g.set(g.get() + 1);
            Ok(())
        });
        obj.set(&p, 1).unwrap();
        assert_eq!(generic.get(), 1);
    }

    #[test]
    fn enumeration_defaults_to_first_value() {
        let align = Property::builder("align")
            .value_type(ValueType::Str)
            .enumeration(["left", "center", "right"].map(Value::from))
            .observable()
            .build()
            .unwrap();
        let obj = target_with(&[&align]);
        assert_eq!(obj.get(&align).unwrap().as_str(), Some("left"));
        obj.set(&align, "right").unwrap();
        assert!(matches!(obj.set(&align, "up"), Err(PropertyError::Type { .. })));
        obj.set(&align, Value::Null).unwrap();
        assert_eq!(obj.get(&align).unwrap().as_str(), Some("left"));
    }

    #[test]
    fn empty_enumeration_is_rejected() {
        assert!(matches!(
            Property::builder("e").enumeration(Vec::new()).build(),
            Err(PropertyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn list_kind_forwards_from_each_item() {
        let label = Property::builder("label").observable().build().unwrap();
        let item_class = Class::builder("Item").property(&label).build();
        let items = Property::builder("items")
            .list(ValueType::Object(Some(item_class.clone())))
            .observable()
            .build()
            .unwrap();
        let obj = target_with(&[&items]);
        let a = Object::new(&item_class);
        let b = Object::new(&item_class);
        obj.set(&items, Value::list([Value::from(&a), Value::from(&b)]))
            .unwrap();
        let (count, _guard) = count_changes(&obj, &items);

        a.set(&label, "a").unwrap();
        b.set(&label, "b").unwrap();
        assert_eq!(count.get(), 2);

        obj.set(&items, Value::list([Value::from(&b)])).unwrap();
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 1);
    }

    #[test]
    fn list_kind_rejects_wrong_items() {
        let items = Property::builder("items")
            .list(ValueType::Number)
            .build()
            .unwrap();
        let obj = target_with(&[&items]);
        assert!(obj.set(&items, Value::list([Value::from("x")])).is_err());
        assert_eq!(items.type_name(), "List<Number>");
    }

    #[test]
    fn release_tears_down_dependencies() {
        let label = Property::builder("label").observable().build().unwrap();
        let node_class = Class::builder("Node").property(&label).build();
        let child = Property::builder("child").observable().build().unwrap();
        let obj = target_with(&[&child]);
        let node = Object::new(&node_class);
        obj.set(&child, &node).unwrap();
        assert_eq!(node.listener_count(), 1);
        child.release(&obj);
        assert_eq!(node.listener_count(), 0);
        assert!(obj.get(&child).unwrap().is_null());
    }
}
