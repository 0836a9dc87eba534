#![forbid(unsafe_code)]

//! Observable properties and dynamic path bindings for single-threaded
//! object graphs.
//!
//! This crate provides the pieces needed to keep one object's property
//! derived from a value reachable through other objects:
//!
//! - [`Property`]: An immutable, shared property descriptor with typing,
//!   access control, filters, hooks and optional change notification.
//! - [`Class`] / [`Object`]: Minimal object model. Objects are cheap handles
//!   that act as property targets and event targets.
//! - [`ListenerGuard`]: RAII guard that removes an event listener on drop.
//! - [`Binding`]: Keeps a target property in sync with a multi-step source
//!   path, following identity changes of every intermediate object.
//! - [`BindingScope`]: Owns bindings and listeners for a logical scope.
//!
//! # Architecture
//!
//! Per-instance property values live in a thread-local context store keyed
//! by object identity. The store holds targets weakly; dropping the last
//! handle to an object tears down its contexts.
//!
//! Observable properties fire a changed event on every effective write. When
//! the stored value is itself an observable object (or a list/map of them),
//! the property forwards that object's changes as its own, so a change deep
//! inside a value is indistinguishable from a direct write.
//!
//! A binding resolves its path into a chain of nodes, one per step, each
//! listening to its own step. A node whose value changes discards the rest
//! of the chain and resolves it again. Synchronization is guarded by a
//! [`SyncGuard`] shared across bindings, which breaks feedback cycles.
//!
//! # Invariants
//!
//! 1. Writes that do not change the value (as judged by the property's
//!    comparator) fire no event.
//! 2. A write already in progress for an (object, property) pair turns a
//!    nested write of the same pair into a no-op.
//! 3. Listeners with lower [`Priority`] values run first; dependency
//!    forwarding runs after every other listener of the nested object.
//! 4. Every listener a binding registers is released exactly once.
//! 5. A null or unresolvable link mid-path syncs the target to its default.
//!
//! # Example
//!
//! ```
//! use propbind::{Binding, Class, Object, Property, ValueType};
//!
//! # fn main() -> propbind::Result<()> {
//! let name = Property::builder("name")
//!     .value_type(ValueType::Str)
//!     .observable()
//!     .build()?;
//! let person = Class::builder("Person").property(&name).build();
//!
//! let user = Property::builder("user")
//!     .value_type(ValueType::Object(Some(person.clone())))
//!     .observable()
//!     .build()?;
//! let session = Class::builder("Session").property(&user).build();
//!
//! let title = Property::builder("title")
//!     .value_type(ValueType::Str)
//!     .observable()
//!     .build()?;
//! let label = Class::builder("Label").property(&title).build();
//!
//! let alice = Object::new(&person);
//! alice.set(&name, "alice")?;
//! let current = Object::new(&session);
//! current.set(&user, &alice)?;
//!
//! let view = Object::new(&label);
//! let binding = Binding::new(&current, ["user", "name"])?;
//! binding.assign_to(&view, "title")?;
//! assert_eq!(view.get(&title)?.as_str(), Some("alice"));
//!
//! let bob = Object::new(&person);
//! bob.set(&name, "bob")?;
//! current.set(&user, &bob)?;
//! assert_eq!(view.get(&title)?.as_str(), Some("bob"));
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod error;
pub mod event;
pub mod object;
pub mod property;
pub mod value;

pub use binding::{Binding, BindingScope, Converted, Converter, SyncGuard, SyncMark};
pub use error::{PropertyError, Result, TypeOrigin};
pub use event::{EventData, EventKey, ListenerGuard, Priority, PropertyChange};
pub use object::{Class, ClassBuilder, Object, ObjectId, PathStep};
pub use property::{
    AccessKey, ChangedHook, Comparator, Filter, Getter, Hook, Property, PropertyBuilder,
    PropertyId, PropertyKind, Setter, context_count,
};
pub use value::{Value, ValueType, has_change};
