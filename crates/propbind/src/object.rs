#![forbid(unsafe_code)]

//! Classes, instances and path steps.
//!
//! A [`Class`] owns the property descriptors declared on it and optionally
//! derives from a base class. An [`Object`] is a cheap, clonable handle to an
//! instance: it carries a stable identity, its class and its listener
//! registry. Per-instance property state never lives on the object itself;
//! it is kept in the weakly-keyed context store (see
//! [`property`](crate::property)).
//!
//! # Name resolution
//!
//! `resolve` looks a name up on the object's class, then walks the base
//! chain. A hit found on a base class is cached on the queried class, so the
//! walk happens once per (class, name).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::{PropertyError, Result, TypeOrigin};
use crate::event::{self, EventData, EventKey, Handler, ListenerGuard, ListenerRegistry, Priority};
use crate::property::{AccessKey, Property, context};
use crate::value::Value;

/// Stable identity of an [`Object`] for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Class
// ---------------------------------------------------------------------------

/// A named type declaring a set of properties.
#[derive(Clone)]
pub struct Class(Rc<ClassInner>);

struct ClassInner {
    name: String,
    base: Option<Class>,
    observable: bool,
    properties: Vec<Property>,
    resolved: RefCell<FxHashMap<String, Property>>,
}

impl Class {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            base: None,
            observable: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn base(&self) -> Option<&Class> {
        self.0.base.as_ref()
    }

    /// Whether instances expose the generic [`EventKey::Changed`] event and
    /// can therefore be tracked as dependencies.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.0.observable
    }

    /// Properties declared directly on this class.
    #[must_use]
    pub fn own_properties(&self) -> &[Property] {
        &self.0.properties
    }

    /// Whether this class is `other` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.ptr_eq(other) {
                return true;
            }
            current = class.base();
        }
        false
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Look up a property by name on this class or its bases.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Property> {
        if let Some(property) = self.0.resolved.borrow().get(name) {
            return Some(property.clone());
        }

        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(property) = class.0.properties.iter().find(|p| p.name() == name) {
                let property = property.clone();
                self.0
                    .resolved
                    .borrow_mut()
                    .insert(name.to_owned(), property.clone());
                return Some(property);
            }
            current = class.base();
        }
        None
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.0.name)
            .field("base", &self.0.base.as_ref().map(Class::name))
            .field("properties", &self.0.properties.len())
            .finish()
    }
}

/// Builder for [`Class`].
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    base: Option<Class>,
    observable: Option<bool>,
    properties: Vec<Property>,
}

impl ClassBuilder {
    /// Derive from `base`. Observability is inherited unless overridden.
    #[must_use]
    pub fn extends(mut self, base: &Class) -> Self {
        self.base = Some(base.clone());
        self
    }

    /// Override whether instances are observable (default: `true`).
    #[must_use]
    pub fn observable(mut self, observable: bool) -> Self {
        self.observable = Some(observable);
        self
    }

    /// Declare a property. A later declaration with the same name wins.
    #[must_use]
    pub fn property(mut self, property: &Property) -> Self {
        self.properties.retain(|p| p.name() != property.name());
        self.properties.push(property.clone());
        self
    }

    #[must_use]
    pub fn build(self) -> Class {
        let observable = self
            .observable
            .unwrap_or_else(|| self.base.as_ref().is_none_or(Class::is_observable));
        Class(Rc::new(ClassInner {
            name: self.name,
            base: self.base,
            observable,
            properties: self.properties,
            resolved: RefCell::new(FxHashMap::default()),
        }))
    }
}

// ---------------------------------------------------------------------------
// PathStep
// ---------------------------------------------------------------------------

/// One step of a property path: a name resolved lazily against whatever
/// object sits at that point of the path, or an already resolved descriptor.
#[derive(Clone, Debug)]
pub enum PathStep {
    Name(String),
    Property(Property),
}

impl PathStep {
    /// The step's property name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Property(property) => property.name(),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for PathStep {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for PathStep {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&Property> for PathStep {
    fn from(property: &Property) -> Self {
        Self::Property(property.clone())
    }
}

impl From<Property> for PathStep {
    fn from(property: Property) -> Self {
        Self::Property(property)
    }
}

impl From<&PathStep> for PathStep {
    fn from(step: &PathStep) -> Self {
        step.clone()
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// Handle to an instance of a [`Class`].
///
/// Cloning the handle shares the instance. Equality is identity.
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

pub(crate) struct ObjectInner {
    id: ObjectId,
    class: Class,
    listeners: ListenerRegistry,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        context::release_target(self.id);
    }
}

/// Non-owning handle to an [`Object`].
#[derive(Clone, Default)]
pub(crate) struct WeakObject(Weak<ObjectInner>);

impl WeakObject {
    pub(crate) fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }
}

impl Object {
    /// Create a new instance of `class`.
    #[must_use]
    pub fn new(class: &Class) -> Self {
        Self(Rc::new(ObjectInner {
            id: ObjectId::next(),
            class: class.clone(),
            listeners: ListenerRegistry::default(),
        }))
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    #[must_use]
    pub fn class(&self) -> &Class {
        &self.0.class
    }

    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.0.class.is_observable()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.0.listeners
    }

    /// Resolve a path step on this object.
    ///
    /// Descriptors resolve to themselves. Names are looked up on the class
    /// chain; an unknown name is an error in strict mode and `None`
    /// otherwise.
    pub fn resolve(&self, step: &PathStep, strict: bool) -> Result<Option<Property>> {
        match step {
            PathStep::Property(property) => Ok(Some(property.clone())),
            PathStep::Name(name) => match self.0.class.resolve(name) {
                Some(property) => Ok(Some(property)),
                None if strict => Err(PropertyError::UnknownProperty { name: name.clone() }),
                None => Ok(None),
            },
        }
    }

    /// Non-strict resolution.
    #[must_use]
    pub fn find_property(&self, step: impl Into<PathStep>) -> Option<Property> {
        self.resolve(&step.into(), false).ok().flatten()
    }

    /// Strict resolution.
    pub fn property(&self, step: impl Into<PathStep>) -> Result<Property> {
        let step = step.into();
        self.resolve(&step, true)?
            .ok_or_else(|| PropertyError::UnknownProperty {
                name: step.name().to_owned(),
            })
    }

    /// Read a property through its public contract.
    pub fn get(&self, step: impl Into<PathStep>) -> Result<Value> {
        self.property(step)?.get(self)
    }

    /// Read a property's stored value, bypassing hooks and read filters.
    pub fn get_internal(&self, step: impl Into<PathStep>, key: &AccessKey) -> Result<Value> {
        let property = self.property(step)?;
        if !property.can_read_internal(key) {
            return Err(PropertyError::AccessDenied {
                property: property.name().to_owned(),
            });
        }
        property.get_internal(self)
    }

    /// Write a property through its public contract.
    pub fn set(&self, step: impl Into<PathStep>, value: impl Into<Value>) -> Result<()> {
        let property = self.property(step)?;
        if property.is_read_only() {
            return Err(PropertyError::ReadOnly {
                property: property.name().to_owned(),
            });
        }
        let value = value.into();
        check_type(&property, &value)?;
        property.set(self, value)
    }

    /// Write a property's stored value with a write capability, bypassing
    /// the read-only flag and the write filter.
    pub fn set_internal(
        &self,
        step: impl Into<PathStep>,
        value: impl Into<Value>,
        key: &AccessKey,
    ) -> Result<()> {
        let property = self.property(step)?;
        if !property.can_write_internal(key) {
            return Err(PropertyError::ReadOnly {
                property: property.name().to_owned(),
            });
        }
        let value = value.into();
        check_type(&property, &value)?;
        property.set_internal(self, value).map(|_| ())
    }

    /// Register a listener for `event` on this object.
    pub fn listen(
        &self,
        event: EventKey,
        priority: Priority,
        handler: impl Fn(&Rc<EventData>) -> Result<()> + 'static,
    ) -> ListenerGuard {
        let handler: Handler = Rc::new(handler);
        let entry = self.0.listeners.add(event, priority, handler);
        ListenerGuard::new(self.downgrade(), entry)
    }

    /// Fire `event` on this object, then its cascade parents.
    pub fn fire(&self, event: EventKey, data: &Rc<EventData>) {
        event::fire(self, event, data);
    }

    /// Total number of listeners registered on this object.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.0.listeners.len()
    }

    /// Number of listeners registered for one event on this object.
    #[must_use]
    pub fn listener_count_for(&self, event: &EventKey) -> usize {
        self.0.listeners.count_for(event)
    }
}

fn check_type(property: &Property, value: &Value) -> Result<()> {
    if property.is_valid_type(value) {
        Ok(())
    } else {
        Err(property.type_error(TypeOrigin::Value))
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.0.class.name())
            .field("id", &self.0.id.0)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn number(name: &str) -> Property {
        Property::builder(name)
            .value_type(ValueType::Number)
            .observable()
            .build()
            .expect("valid property")
    }

    #[test]
    fn resolve_walks_base_chain_and_caches() {
        let width = number("width");
        let base = Class::builder("Base").property(&width).build();
        let derived = Class::builder("Derived").extends(&base).build();

        assert!(derived.0.resolved.borrow().get("width").is_none());
        let found = derived.resolve("width").expect("inherited property");
        assert!(found.ptr_eq(&width));
        assert!(derived.0.resolved.borrow().get("width").is_some());
        assert!(derived.resolve("height").is_none());
    }

    #[test]
    fn strict_resolution_reports_unknown_names() {
        let class = Class::builder("Empty").build();
        let obj = Object::new(&class);
        let err = obj.property("nope").unwrap_err();
        assert_eq!(
            err,
            PropertyError::UnknownProperty {
                name: "nope".into()
            }
        );
        assert!(obj.find_property("nope").is_none());
        assert!(obj.resolve(&PathStep::from("nope"), false).unwrap().is_none());
    }

    #[test]
    fn descriptor_steps_resolve_to_themselves() {
        let width = number("width");
        let class = Class::builder("Empty").build();
        let obj = Object::new(&class);
        let found = obj.resolve(&PathStep::from(&width), true).unwrap();
        assert!(found.expect("descriptor").ptr_eq(&width));
    }

    #[test]
    fn observability_is_inherited() {
        let plain = Class::builder("Plain").observable(false).build();
        let derived = Class::builder("Derived").extends(&plain).build();
        let overridden = Class::builder("Loud").extends(&plain).observable(true).build();
        assert!(!derived.is_observable());
        assert!(overridden.is_observable());
        assert!(Class::builder("Root").build().is_observable());
    }

    #[test]
    fn later_declaration_replaces_earlier() {
        let a = number("x");
        let b = number("x");
        let class = Class::builder("C").property(&a).property(&b).build();
        assert_eq!(class.own_properties().len(), 1);
        assert!(class.resolve("x").unwrap().ptr_eq(&b));
    }

    #[test]
    fn ids_are_unique() {
        let class = Class::builder("C").build();
        let a = Object::new(&class);
        let b = Object::new(&class);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn listener_guard_removes_exactly_once() {
        let class = Class::builder("C").build();
        let obj = Object::new(&class);
        let guard = obj.listen(EventKey::Changed, Priority::DEFAULT, |_| Ok(()));
        assert_eq!(obj.listener_count(), 1);
        assert!(guard.is_active());
        guard.release();
        assert_eq!(obj.listener_count(), 0);
    }
}
