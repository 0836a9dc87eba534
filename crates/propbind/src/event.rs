#![forbid(unsafe_code)]

//! Minimal synchronous event dispatch used by observable properties.
//!
//! Every [`Object`] owns a listener registry. Listeners are registered per
//! [`EventKey`] with a [`Priority`] and are removed when their
//! [`ListenerGuard`] is dropped. A property's changed event cascades to the
//! generic [`EventKey::Changed`] event of the same object unless propagation
//! is stopped.
//!
//! # Invariants
//!
//! 1. Listeners run in ascending priority order; equal priorities run in
//!    registration order.
//! 2. A listener removed during a dispatch is not invoked later in that same
//!    dispatch.
//! 3. The first `fire` of an [`EventData`] records its origin (`target` and
//!    `event`); re-firing the same data from a nested handler keeps that
//!    origin. Only `current_target` and `current_event` follow the dispatch,
//!    and they are restored when it unwinds.
//! 4. Each [`ListenerGuard`] removes its listener exactly once.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Handler returns `Err` | Downstream sync failed | Logged via `tracing::error!`, siblings still run |
//! | `on_changed` hook returns `Err` | User hook failed | Logged, listeners still run |
//! | Source dropped before guard | Object lifetime ended | Guard drop is a no-op |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::object::{Object, WeakObject};
use crate::property::Property;
use crate::value::Value;

/// Dispatch order of a listener. Lower values run earlier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// Priority used by bindings and ordinary listeners.
    pub const DEFAULT: Self = Self(0);
    /// Runs after every other listener of the same event.
    pub const LOWEST: Self = Self(i32::MAX);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Identifies an event on an object.
#[derive(Clone)]
pub enum EventKey {
    /// Generic "something on this object changed" event.
    Changed,
    /// The changed event of one property. Cascades to [`EventKey::Changed`].
    PropertyChanged(Property),
}

impl EventKey {
    /// The event this one cascades to after its own listeners ran.
    #[must_use]
    pub fn parent(&self) -> Option<EventKey> {
        match self {
            Self::Changed => None,
            Self::PropertyChanged(_) => Some(Self::Changed),
        }
    }
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Changed, Self::Changed) => true,
            (Self::PropertyChanged(a), Self::PropertyChanged(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for EventKey {}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed => f.write_str("changed"),
            Self::PropertyChanged(p) => write!(f, "{}.changed", p.name()),
        }
    }
}

impl fmt::Debug for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKey({self})")
    }
}

/// Payload of a property changed event.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    pub property: Property,
    pub old_value: Value,
    pub new_value: Value,
}

/// Data passed to every listener of a dispatch.
///
/// Shared by reference: a forwarded change re-fires the very same
/// `EventData`, so listeners on the owner see the nested old/new values.
#[derive(Default)]
pub struct EventData {
    target: RefCell<Option<Object>>,
    event: RefCell<Option<EventKey>>,
    current_target: RefCell<Option<Object>>,
    current_event: RefCell<Option<EventKey>>,
    change: Option<PropertyChange>,
    propagation_stopped: Cell<bool>,
    immediate_propagation_stopped: Cell<bool>,
}

impl EventData {
    /// Event data without a payload.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Event data describing a property change.
    #[must_use]
    pub fn with_change(change: PropertyChange) -> Rc<Self> {
        Rc::new(Self {
            change: Some(change),
            ..Self::default()
        })
    }

    /// Object the event was originally fired on.
    #[must_use]
    pub fn target(&self) -> Option<Object> {
        self.target.borrow().clone()
    }

    /// Event originally fired.
    #[must_use]
    pub fn event(&self) -> Option<EventKey> {
        self.event.borrow().clone()
    }

    /// Object whose listeners are currently running.
    #[must_use]
    pub fn current_target(&self) -> Option<Object> {
        self.current_target.borrow().clone()
    }

    /// Event (possibly a cascade parent) whose listeners are currently running.
    #[must_use]
    pub fn current_event(&self) -> Option<EventKey> {
        self.current_event.borrow().clone()
    }

    #[must_use]
    pub fn change(&self) -> Option<&PropertyChange> {
        self.change.as_ref()
    }

    /// Whether the event originated on `target` as `event`.
    #[must_use]
    pub fn is_from(&self, target: &Object, event: &EventKey) -> bool {
        self.target.borrow().as_ref().is_some_and(|t| t.ptr_eq(target))
            && self.event.borrow().as_ref() == Some(event)
    }

    /// Prevent cascading to parent events and stop dependency forwarding.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Like [`stop_propagation`](Self::stop_propagation), and also skip the
    /// remaining listeners of the current event.
    pub fn stop_immediate_propagation(&self) {
        self.propagation_stopped.set(true);
        self.immediate_propagation_stopped.set(true);
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    #[must_use]
    pub fn is_immediate_propagation_stopped(&self) -> bool {
        self.immediate_propagation_stopped.get()
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("target", &self.target.borrow())
            .field("event", &self.event.borrow())
            .field("change", &self.change)
            .field("propagation_stopped", &self.propagation_stopped.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

/// Callback invoked for each dispatched event.
pub type Handler = Rc<dyn Fn(&Rc<EventData>) -> Result<()>>;

pub(crate) struct ListenerEntry {
    event: EventKey,
    priority: Priority,
    handler: Handler,
    active: Cell<bool>,
}

/// Per-object listener list, kept sorted by priority.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: RefCell<Vec<Rc<ListenerEntry>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, event: EventKey, priority: Priority, handler: Handler) -> Rc<ListenerEntry> {
        let entry = Rc::new(ListenerEntry {
            event,
            priority,
            handler,
            active: Cell::new(true),
        });
        let mut entries = self.entries.borrow_mut();
        let index = entries
            .iter()
            .position(|e| e.priority > priority)
            .unwrap_or(entries.len());
        entries.insert(index, Rc::clone(&entry));
        entry
    }

    fn remove(&self, entry: &Rc<ListenerEntry>) {
        self.entries.borrow_mut().retain(|e| !Rc::ptr_eq(e, entry));
    }

    fn snapshot(&self, event: &EventKey) -> SmallVec<[Rc<ListenerEntry>; 4]> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.event == *event)
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn count_for(&self, event: &EventKey) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.event == *event)
            .count()
    }
}

/// RAII handle for a registered listener.
///
/// Dropping the guard removes the listener from its source object.
#[must_use = "dropping the guard removes the listener"]
pub struct ListenerGuard {
    source: WeakObject,
    entry: Option<Rc<ListenerEntry>>,
}

impl ListenerGuard {
    pub(crate) fn new(source: WeakObject, entry: Rc<ListenerEntry>) -> Self {
        Self {
            source,
            entry: Some(entry),
        }
    }

    /// Remove the listener now.
    pub fn release(mut self) {
        self.detach();
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.entry.as_ref().is_some_and(|e| e.active.get())
    }

    fn detach(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.active.set(false);
            if let Some(source) = self.source.upgrade() {
                source.listeners().remove(&entry);
            }
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("event", &self.entry.as_ref().map(|e| e.event.clone()))
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub(crate) fn fire(target: &Object, event: EventKey, data: &Rc<EventData>) {
    // origin is recorded once; forwarded re-fires keep it
    if data.target.borrow().is_none() {
        data.target.replace(Some(target.clone()));
        data.event.replace(Some(event.clone()));
    }

    let mut current = Some(event);
    while let Some(event) = current {
        notify_listeners(target, &event, data);
        if data.is_propagation_stopped() {
            break;
        }
        current = event.parent();
    }
}

fn notify_listeners(target: &Object, event: &EventKey, data: &Rc<EventData>) {
    let previous_target = data.current_target.replace(Some(target.clone()));
    let previous_event = data.current_event.replace(Some(event.clone()));

    let mut skip_listeners = false;
    let hook = match event {
        EventKey::PropertyChanged(property) => property.on_changed_hook(),
        EventKey::Changed => None,
    };
    if let Some(hook) = hook {
        if let Err(err) = hook(target, data) {
            tracing::error!(event = %event, error = %err, "on_changed hook failed");
        }
        skip_listeners = data.is_immediate_propagation_stopped();
    }

    if !skip_listeners {
        for entry in target.listeners().snapshot(event) {
            if data.is_immediate_propagation_stopped() {
                break;
            }
            if !entry.active.get() {
                continue;
            }
            if let Err(err) = (entry.handler)(data) {
                tracing::error!(event = %event, error = %err, "event listener failed");
            }
        }
    }

    data.current_target.replace(previous_target);
    data.current_event.replace(previous_event);
}
