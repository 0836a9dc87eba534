#![forbid(unsafe_code)]

//! Dynamic path bindings between object properties.
//!
//! A [`Binding`] keeps a target property derived from the value reachable
//! through a path of properties starting at a source object. Every step of
//! the path is watched: when an intermediate value is replaced, the rest of
//! the path is resolved again against the new object.
//!
//! # Usage
//!
//! ```ignore
//! let binding = Binding::new(&window, ["document", "title"])?;
//! binding.assign_to(&label, "text")?;
//!
//! window.set("document", &other_document)?; // label follows the new document
//! ```
//!
//! # Two-Way Bindings
//!
//! With [`Binding::two_way`], changes of the target property are pushed back
//! to the last property of the path (through the reverse converter, if any).
//! The shared [`SyncGuard`] ensures a change travels each direction once.
//!
//! # Invariants
//!
//! 1. The first path step resolves at construction; later steps resolve
//!    lazily against the value of the preceding step.
//! 2. A binding never targets its own source root.
//! 3. `unbind` removes exactly the listeners `bind` registered and is
//!    idempotent.
//! 4. Dropping a `Binding` unbinds it.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Empty path | `InvalidArgument` from `new` |
//! | Unknown first step or target name | `UnknownProperty` |
//! | Read-only target property | `InvalidArgument` from `assign_to` |
//! | Two-way with a non-observable target property | `InvalidArgument` |
//! | Null or unresolvable link mid-path | Target receives its default |
//! | Target rejects a synced value | Error from `bind`/`assign_to`; logged when triggered by an event |

mod chain;
mod scope;
pub mod sync;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{PropertyError, Result};
use crate::object::{Object, PathStep};
use crate::property::Property;
use crate::value::Value;
use chain::BindingChain;
pub use scope::BindingScope;
pub use sync::{Converted, Converter, SyncGuard, SyncMark};

/// The resolved far end of a binding, cloned out of the binding state for
/// the duration of one sync.
pub(crate) struct Endpoint {
    pub(crate) target: Object,
    pub(crate) target_property: Property,
    pub(crate) converter: Option<Converter>,
    pub(crate) reverse_converter: Option<Converter>,
}

pub(crate) struct BindingInner {
    source: Object,
    source_path: Vec<PathStep>,
    source_root: Property,
    guard: SyncGuard,
    state: RefCell<BindingState>,
}

#[derive(Default)]
struct BindingState {
    target: Option<(Object, Property)>,
    two_way: bool,
    converter: Option<Converter>,
    reverse_converter: Option<Converter>,
    chain: Option<Rc<BindingChain>>,
}

impl BindingInner {
    pub(crate) fn endpoint(&self) -> Option<Endpoint> {
        let state = self.state.borrow();
        let (target, target_property) = state.target.clone()?;
        Some(Endpoint {
            target,
            target_property,
            converter: state.converter.clone(),
            reverse_converter: state.reverse_converter.clone(),
        })
    }

    pub(crate) fn guard(&self) -> &SyncGuard {
        &self.guard
    }

    pub(crate) fn is_two_way(&self) -> bool {
        self.state.borrow().two_way
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// A standing rule keeping a target property derived from a source path.
///
/// Configuration methods take `&self` and return `&Self` so calls can be
/// chained.
pub struct Binding {
    inner: Rc<BindingInner>,
}

impl Binding {
    /// Create a binding to `path`, starting at `source`, using the
    /// thread's global [`SyncGuard`].
    pub fn new<I, S>(source: &Object, path: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<PathStep>,
    {
        Self::with_guard(source, path, SyncGuard::global())
    }

    /// Like [`Binding::new`], with an explicit guard.
    pub fn with_guard<I, S>(source: &Object, path: I, guard: SyncGuard) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<PathStep>,
    {
        let source_path: Vec<PathStep> = path.into_iter().map(Into::into).collect();
        let Some(first) = source_path.first() else {
            return Err(PropertyError::InvalidArgument(
                "binding source path must be non-empty".into(),
            ));
        };
        let source_root = source.property(first)?;

        Ok(Self {
            inner: Rc::new(BindingInner {
                source: source.clone(),
                source_path,
                source_root,
                guard,
                state: RefCell::new(BindingState::default()),
            }),
        })
    }

    // -- accessors -----------------------------------------------------------

    #[must_use]
    pub fn source(&self) -> &Object {
        &self.inner.source
    }

    #[must_use]
    pub fn source_path(&self) -> &[PathStep] {
        &self.inner.source_path
    }

    /// The path as currently resolved, with `None` for every trailing step
    /// that does not resolve right now. Empty steps are reported for an
    /// unbound binding.
    #[must_use]
    pub fn source_path_resolved(&self) -> Vec<Option<Property>> {
        let mut path = Vec::with_capacity(self.inner.source_path.len());
        let chain = self.inner.state.borrow().chain.clone();
        if let Some(chain) = chain {
            chain.get_path(&mut path);
        }
        path.resize(self.inner.source_path.len(), None);
        path
    }

    #[must_use]
    pub fn target(&self) -> Option<Object> {
        self.inner.state.borrow().target.as_ref().map(|(t, _)| t.clone())
    }

    #[must_use]
    pub fn target_property(&self) -> Option<Property> {
        self.inner.state.borrow().target.as_ref().map(|(_, p)| p.clone())
    }

    #[must_use]
    pub fn is_two_way(&self) -> bool {
        self.inner.is_two_way()
    }

    #[must_use]
    pub fn has_converter(&self) -> bool {
        self.inner.state.borrow().converter.is_some()
    }

    #[must_use]
    pub fn has_reverse_converter(&self) -> bool {
        self.inner.state.borrow().reverse_converter.is_some()
    }

    /// Whether a target has been assigned.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.inner.state.borrow().target.is_some()
    }

    /// Whether the binding is live.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.state.borrow().chain.is_some()
    }

    #[must_use]
    pub fn guard(&self) -> &SyncGuard {
        &self.inner.guard
    }

    // -- configuration -------------------------------------------------------

    /// Enable or disable pushing target changes back to the source.
    ///
    /// A live binding is rebound so the change takes effect immediately.
    pub fn two_way(&self, two_way: bool) -> Result<&Self> {
        if two_way == self.is_two_way() {
            return Ok(self);
        }
        if two_way {
            if let Some(property) = self.target_property() {
                check_two_way_target(&property)?;
            }
        }

        let was_bound = self.is_bound();
        if was_bound {
            self.unbind();
        }
        self.inner.state.borrow_mut().two_way = two_way;
        if was_bound {
            self.bind()?;
        }
        Ok(self)
    }

    /// Convert source values before they are written to the target.
    ///
    /// A live binding re-syncs immediately.
    pub fn converter(&self, convert: impl Fn(Option<Value>) -> Converted + 'static) -> Result<&Self> {
        self.set_converter(Some(Rc::new(convert)))
    }

    pub fn clear_converter(&self) -> Result<&Self> {
        if !self.has_converter() {
            return Ok(self);
        }
        self.set_converter(None)
    }

    /// Convert target values before they are pushed back to the source.
    /// Takes effect on the next push.
    pub fn reverse_converter(&self, convert: impl Fn(Option<Value>) -> Converted + 'static) -> &Self {
        let previous = self
            .inner
            .state
            .borrow_mut()
            .reverse_converter
            .replace(Rc::new(convert));
        drop(previous);
        self
    }

    pub fn clear_reverse_converter(&self) -> &Self {
        let previous = self.inner.state.borrow_mut().reverse_converter.take();
        drop(previous);
        self
    }

    fn set_converter(&self, converter: Option<Converter>) -> Result<&Self> {
        let previous = std::mem::replace(&mut self.inner.state.borrow_mut().converter, converter);
        drop(previous);

        let chain = self.inner.state.borrow().chain.clone();
        if let Some(chain) = chain {
            chain.sync()?;
        }
        Ok(self)
    }

    // -- lifecycle -----------------------------------------------------------

    /// Assign the target and bind.
    ///
    /// Any previous target is cleared first. Fails without registering any
    /// listener if the target is invalid.
    pub fn assign_to(&self, target: &Object, property: impl Into<PathStep>) -> Result<&Self> {
        let step = property.into();
        let Some(target_property) = target.find_property(&step) else {
            return Err(PropertyError::UnknownProperty {
                name: step.name().to_owned(),
            });
        };

        if target_property.is_read_only() {
            return Err(PropertyError::InvalidArgument(format!(
                "binding target property \"{}\" must not be read-only",
                target_property.name()
            )));
        }
        if self.is_two_way() {
            check_two_way_target(&target_property)?;
        }
        if target.ptr_eq(&self.inner.source) && target_property.ptr_eq(&self.inner.source_root) {
            return Err(PropertyError::SelfBinding {
                property: target_property.name().to_owned(),
            });
        }

        self.clear();
        self.inner.state.borrow_mut().target = Some((target.clone(), target_property));
        self.bind()
    }

    /// Unbind and forget the target.
    pub fn clear(&self) -> &Self {
        if !self.is_assigned() {
            return self;
        }
        self.unbind();
        let previous = self.inner.state.borrow_mut().target.take();
        drop(previous);
        self
    }

    /// Resolve the path and start tracking it. No-op when unassigned or
    /// already bound.
    pub fn bind(&self) -> Result<&Self> {
        if !self.is_assigned() || self.is_bound() {
            return Ok(self);
        }

        let chain = BindingChain::new(
            &self.inner,
            self.inner.source.clone(),
            self.inner.source_root.clone(),
            self.inner.source_path[1..].to_vec(),
        );
        self.inner.state.borrow_mut().chain = Some(Rc::clone(&chain));
        tracing::trace!(
            root = %self.inner.source_root.name(),
            steps = self.inner.source_path.len(),
            "binding bound"
        );
        BindingChain::bind(&chain)?;
        Ok(self)
    }

    /// Stop tracking, releasing every listener. The target keeps its value.
    pub fn unbind(&self) -> &Self {
        let chain = self.inner.state.borrow_mut().chain.take();
        if let Some(chain) = chain {
            chain.unbind();
            tracing::trace!(root = %self.inner.source_root.name(), "binding unbound");
        }
        self
    }
}

fn check_two_way_target(property: &Property) -> Result<()> {
    if property.is_observable() {
        return Ok(());
    }
    Err(PropertyError::InvalidArgument(format!(
        "two-way binding target property \"{}\" must be observable",
        property.name()
    )))
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<&str> = self.inner.source_path.iter().map(PathStep::name).collect();
        f.debug_struct("Binding")
            .field("source", &self.inner.source.id())
            .field("path", &path)
            .field("target", &self.target().map(|t| t.id()))
            .field("target_property", &self.target_property().map(|p| p.name().to_owned()))
            .field("two_way", &self.is_two_way())
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Class;
    use crate::value::ValueType;

    struct Model {
        class: Class,
        text: Property,
        other: Property,
        child: Property,
    }

    fn model() -> Model {
        let text = Property::builder("text")
            .value_type(ValueType::Str)
            .observable()
            .build()
            .unwrap();
        let other = Property::builder("other")
            .value_type(ValueType::Str)
            .default_value("fallback")
            .observable()
            .build()
            .unwrap();
        let child = Property::builder("child")
            .value_type(ValueType::Object(None))
            .observable()
            .build()
            .unwrap();
        let class = Class::builder("Model")
            .property(&text)
            .property(&other)
            .property(&child)
            .build();
        Model {
            class,
            text,
            other,
            child,
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        let m = model();
        let obj = Object::new(&m.class);
        assert!(matches!(
            Binding::new(&obj, Vec::<&str>::new()),
            Err(PropertyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_root_is_rejected() {
        let m = model();
        let obj = Object::new(&m.class);
        assert!(matches!(
            Binding::new(&obj, ["missing"]),
            Err(PropertyError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn unresolved_later_steps_are_accepted() {
        let m = model();
        let obj = Object::new(&m.class);
        let binding = Binding::new(&obj, ["child", "nowhere", "deeper"]).unwrap();
        assert_eq!(binding.source_path().len(), 3);
        assert!(!binding.is_assigned());
    }

    #[test]
    fn lifecycle_flags() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        assert!(!binding.is_bound());

        binding.assign_to(&dst, "other").unwrap();
        assert!(binding.is_assigned());
        assert!(binding.is_bound());
        assert!(binding.target().is_some_and(|t| t.ptr_eq(&dst)));

        binding.unbind();
        assert!(binding.is_assigned());
        assert!(!binding.is_bound());

        binding.bind().unwrap();
        assert!(binding.is_bound());

        binding.clear();
        assert!(!binding.is_assigned());
        assert!(!binding.is_bound());
        assert!(binding.target_property().is_none());
    }

    #[test]
    fn read_only_target_is_rejected() {
        let locked = Property::builder("locked").read_only(true).build().unwrap();
        let m = model();
        let class = Class::builder("Locked").extends(&m.class).property(&locked).build();
        let (src, dst) = (Object::new(&m.class), Object::new(&class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        assert!(matches!(
            binding.assign_to(&dst, "locked"),
            Err(PropertyError::InvalidArgument(_))
        ));
        assert_eq!(dst.listener_count(), 0);
        assert_eq!(src.listener_count(), 0);
    }

    #[test]
    fn two_way_requires_observable_target() {
        let plain = Property::builder("plain").build().unwrap();
        let m = model();
        let class = Class::builder("Plain").extends(&m.class).property(&plain).build();
        let (src, dst) = (Object::new(&m.class), Object::new(&class));

        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.assign_to(&dst, "plain").unwrap();
        assert!(matches!(
            binding.two_way(true),
            Err(PropertyError::InvalidArgument(_))
        ));
        assert!(!binding.is_two_way());

        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.two_way(true).unwrap();
        assert!(matches!(
            binding.assign_to(&dst, "plain"),
            Err(PropertyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn toggling_two_way_rebinds() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.assign_to(&dst, "other").unwrap();
        assert_eq!(dst.listener_count(), 0);

        binding.two_way(true).unwrap();
        assert!(binding.is_bound());
        assert_eq!(dst.listener_count(), 1);

        dst.set(&m.other, "back").unwrap();
        assert_eq!(src.get(&m.text).unwrap().as_str(), Some("back"));

        binding.two_way(false).unwrap();
        assert_eq!(dst.listener_count(), 0);
    }

    #[test]
    fn converter_change_resyncs_live_binding() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        src.set(&m.text, "hi").unwrap();
        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.assign_to(&dst, "other").unwrap();
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("hi"));

        binding
            .converter(|v| match v.as_ref().and_then(Value::as_str) {
                Some(s) => Value::from(s.to_uppercase()).into(),
                None => Converted::Default,
            })
            .unwrap();
        assert!(binding.has_converter());
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("HI"));

        binding.clear_converter().unwrap();
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn reverse_converter_applies_to_pushback() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.two_way(true).unwrap();
        binding.reverse_converter(|v| {
            let text = v.as_ref().and_then(Value::as_str).unwrap_or_default();
            Value::from(format!("<{text}>")).into()
        });
        binding.assign_to(&dst, "other").unwrap();
        assert!(binding.has_reverse_converter());

        dst.set(&m.other, "x").unwrap();
        assert_eq!(src.get(&m.text).unwrap().as_str(), Some("<x>"));
        // the forward sync back into the target is suppressed
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("x"));

        binding.clear_reverse_converter();
        dst.set(&m.other, "y").unwrap();
        assert_eq!(src.get(&m.text).unwrap().as_str(), Some("y"));
    }

    #[test]
    fn drop_unbinds() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.assign_to(&dst, "other").unwrap();
        assert_eq!(src.listener_count(), 1);
        drop(binding);
        assert_eq!(src.listener_count(), 0);
        src.set(&m.text, "after").unwrap();
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some(""));
    }

    #[test]
    fn reassignment_moves_target() {
        let m = model();
        let src = Object::new(&m.class);
        let (first, second) = (Object::new(&m.class), Object::new(&m.class));
        let binding = Binding::new(&src, ["text"]).unwrap();
        binding.assign_to(&first, "other").unwrap();
        binding.assign_to(&second, "other").unwrap();
        assert_eq!(src.listener_count(), 1);

        src.set(&m.text, "moved").unwrap();
        assert_eq!(first.get(&m.other).unwrap().as_str(), Some(""));
        assert_eq!(second.get(&m.other).unwrap().as_str(), Some("moved"));
    }

    #[test]
    fn step_leading_back_to_target_syncs_default() {
        let m = model();
        let root = Object::new(&m.class);
        let dst = Object::new(&m.class);
        dst.set(&m.other, "stale").unwrap();
        root.set(&m.child, &dst).unwrap();

        let binding = Binding::new(&root, ["child", "other"]).unwrap();
        binding.assign_to(&dst, "other").unwrap();
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("fallback"));
        let resolved = binding.source_path_resolved();
        assert!(resolved[0].as_ref().is_some_and(|p| p.ptr_eq(&m.child)));
        assert!(resolved[1].is_none());
    }

    #[test]
    fn isolated_guard_is_used() {
        let m = model();
        let (src, dst) = (Object::new(&m.class), Object::new(&m.class));
        let guard = SyncGuard::new();
        let binding = Binding::with_guard(&src, ["text"], guard.clone()).unwrap();
        assert!(binding.guard().ptr_eq(&guard));

        let _held = guard.mark(&dst, &m.other);
        binding.assign_to(&dst, "other").unwrap();
        src.set(&m.text, "blocked").unwrap();
        assert_eq!(dst.get(&m.other).unwrap().as_str(), Some("fallback"));
    }
}
