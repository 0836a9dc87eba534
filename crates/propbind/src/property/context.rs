#![forbid(unsafe_code)]

//! Per-(instance, property) state, kept outside the instance.
//!
//! The store is keyed by object identity and never holds a strong reference
//! to the object: when the last handle to an object is dropped, every context
//! of that object is torn down (dependency listeners released) and removed.
//!
//! # Invariants
//!
//! 1. At most one context exists per (object, property) pair.
//! 2. Contexts are created lazily on first write; reads of an unset property
//!    never create one.
//! 3. The store is never borrowed while user code (hooks, listeners, value
//!    destructors) runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::event::ListenerGuard;
use crate::object::{Object, ObjectId, WeakObject};
use crate::property::{Property, PropertyId};
use crate::value::Value;

/// Mutable cell holding one property's state for one object.
pub(crate) struct PropertyContext {
    target: WeakObject,
    pub(crate) value: RefCell<Value>,
    pub(crate) is_writing: Cell<bool>,
    /// Listeners on observable values currently forwarded from.
    pub(crate) dependencies: RefCell<SmallVec<[ListenerGuard; 1]>>,
    /// Identities of event data currently being forwarded.
    pub(crate) forwarding: RefCell<FxHashSet<usize>>,
}

impl PropertyContext {
    pub(crate) fn new(target: &Object, value: Value) -> Self {
        Self {
            target: target.downgrade(),
            value: RefCell::new(value),
            is_writing: Cell::new(false),
            dependencies: RefCell::new(SmallVec::new()),
            forwarding: RefCell::new(FxHashSet::default()),
        }
    }

    /// The owning object, if it is still alive.
    pub(crate) fn target(&self) -> Option<Object> {
        self.target.upgrade()
    }
}

/// Marks a context as mid-write until dropped.
pub(crate) struct WritingGuard<'a> {
    context: &'a PropertyContext,
}

impl<'a> WritingGuard<'a> {
    /// Returns `None` if a write is already in progress.
    pub(crate) fn enter(context: &'a PropertyContext) -> Option<Self> {
        if context.is_writing.replace(true) {
            return None;
        }
        Some(Self { context })
    }
}

impl Drop for WritingGuard<'_> {
    fn drop(&mut self) {
        self.context.is_writing.set(false);
    }
}

type Slot = FxHashMap<PropertyId, (Property, Rc<PropertyContext>)>;

#[derive(Default)]
struct ContextStore {
    slots: RefCell<FxHashMap<ObjectId, Slot>>,
}

thread_local! {
    static STORE: ContextStore = ContextStore::default();
}

pub(crate) fn lookup(target: &Object, property: &Property) -> Option<Rc<PropertyContext>> {
    STORE.with(|store| {
        store
            .slots
            .borrow()
            .get(&target.id())
            .and_then(|slot| slot.get(&property.id()))
            .map(|(_, context)| Rc::clone(context))
    })
}

pub(crate) fn lookup_or_create(target: &Object, property: &Property) -> Rc<PropertyContext> {
    if let Some(context) = lookup(target, property) {
        return context;
    }

    let context = Rc::new(property.setup_context(target));
    STORE.with(|store| {
        store
            .slots
            .borrow_mut()
            .entry(target.id())
            .or_default()
            .insert(property.id(), (property.clone(), Rc::clone(&context)));
    });
    context
}

/// Remove one context and run its teardown.
pub(crate) fn release(target: &Object, property: &Property) {
    let removed = STORE.with(|store| {
        let mut slots = store.slots.borrow_mut();
        let slot = slots.get_mut(&target.id())?;
        let removed = slot.remove(&property.id());
        if slot.is_empty() {
            slots.remove(&target.id());
        }
        removed
    });
    if let Some((property, context)) = removed {
        property.teardown_context(&context);
    }
}

/// Remove and tear down every context of a dropped object.
pub(crate) fn release_target(id: ObjectId) {
    // The store may already be gone during thread teardown.
    let slot = STORE
        .try_with(|store| store.slots.borrow_mut().remove(&id))
        .ok()
        .flatten();
    if let Some(slot) = slot {
        for (property, context) in slot.into_values() {
            property.teardown_context(&context);
        }
    }
}

/// Number of live contexts on this thread.
#[must_use]
pub fn context_count() -> usize {
    STORE.with(|store| store.slots.borrow().values().map(FxHashMap::len).sum())
}
