#![forbid(unsafe_code)]

//! Change notification and dependency forwarding for observable properties.
//!
//! After every write, the context's previous dependency listeners are torn
//! down and, if the new value contains observable objects, a forwarding
//! listener is registered on each of them at [`Priority::LOWEST`]. When a
//! nested object reports a change, the owner re-fires its own property
//! changed event with the nested [`EventData`], so a change deep inside a
//! value looks exactly like a direct write of that property.
//!
//! # Invariants
//!
//! 1. Dependencies are replaced wholesale: old listeners are released (in
//!    reverse registration order) before new ones are attached.
//! 2. A forwarding handler never re-forwards event data it is already
//!    forwarding, and does nothing while the owning context is mid-write.
//! 3. Stopped propagation is never forwarded.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::event::{EventData, EventKey, PropertyChange, Priority};
use crate::object::Object;
use crate::property::context::PropertyContext;
use crate::property::{ChangedHook, Comparator, Property};
use crate::value::Value;

/// Observable behavior attached to a property descriptor.
#[derive(Clone, Default)]
pub(crate) struct ChangeNotifier {
    pub(crate) change_comparator: Option<Comparator>,
    pub(crate) item_change_comparator: Option<Comparator>,
    pub(crate) on_changed: Option<ChangedHook>,
}

/// Release every forwarding listener of `context`.
pub(crate) fn teardown_dependencies(context: &PropertyContext) {
    let mut released = std::mem::take(&mut *context.dependencies.borrow_mut());
    while let Some(guard) = released.pop() {
        drop(guard);
    }
}

/// Forward changes of each object in `dependencies` as changes of
/// `property` on the context's owner.
pub(crate) fn setup_dependencies(
    property: &Property,
    context: &Rc<PropertyContext>,
    dependencies: SmallVec<[Object; 1]>,
) {
    if dependencies.is_empty() || !context.dependencies.borrow().is_empty() {
        return;
    }

    let guards: SmallVec<[_; 1]> = dependencies
        .iter()
        .map(|dependency| {
            let property = property.clone();
            let context = Rc::downgrade(context);
            dependency.listen(EventKey::Changed, Priority::LOWEST, move |data| {
                match context.upgrade() {
                    Some(context) => forward(&property, &context, data),
                    None => Ok(()),
                }
            })
        })
        .collect();
    *context.dependencies.borrow_mut() = guards;
}

fn forward(property: &Property, context: &PropertyContext, data: &Rc<EventData>) -> Result<()> {
    if context.is_writing.get() || data.is_propagation_stopped() {
        return Ok(());
    }
    let Some(owner) = context.target() else {
        return Ok(());
    };

    let key = Rc::as_ptr(data) as usize;
    if !context.forwarding.borrow_mut().insert(key) {
        return Ok(());
    }
    let _mark = ForwardingMark { context, key };

    tracing::trace!(property = %property.name(), "forwarding nested change");
    owner.fire(property.changed_event(), data);
    Ok(())
}

struct ForwardingMark<'a> {
    context: &'a PropertyContext,
    key: usize,
}

impl Drop for ForwardingMark<'_> {
    fn drop(&mut self) {
        self.context.forwarding.borrow_mut().remove(&self.key);
    }
}

/// Fire `property`'s changed event on `target`.
pub(crate) fn notify_changed(property: &Property, target: &Object, old_value: Value, new_value: Value) {
    let data = EventData::with_change(PropertyChange {
        property: property.clone(),
        old_value,
        new_value,
    });
    target.fire(property.changed_event(), &data);
}
