#![forbid(unsafe_code)]

//! One-directional value synchronization with cycle protection.
//!
//! A sync reads a source property, optionally converts the value and writes
//! it to a target property. Every sync marks the (property, object) pairs it
//! touches in a [`SyncGuard`]; a sync whose target is already marked returns
//! immediately. Because the guard is shared by every binding that uses it,
//! this breaks feedback cycles even between unrelated bindings that drive
//! the same property.
//!
//! # Invariants
//!
//! 1. A sync only removes the marks it added itself.
//! 2. Marks are removed in reverse order of addition on every exit path,
//!    errors included.
//! 3. Between two non-overlapping top-level syncs the guard is empty.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Target already syncing | No-op, `Ok(())` |
//! | Converter returns [`Converted::Void`] | Target untouched, `Ok(())` |
//! | Target rejects the value | Error returned, marks still cleared |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::object::{Object, ObjectId};
use crate::property::{Property, PropertyId};
use crate::value::Value;

/// Result of a value conversion.
#[derive(Clone, Debug)]
pub enum Converted {
    /// Write this value.
    Value(Value),
    /// Abort the sync, leaving the destination untouched.
    Void,
    /// Write the destination property's default value.
    Default,
}

impl From<Value> for Converted {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Value conversion applied during a sync.
///
/// The input is `None` when the path could not be resolved and the
/// destination is about to fall back to its default.
pub type Converter = Rc<dyn Fn(Option<Value>) -> Converted>;

type SyncKey = (PropertyId, ObjectId);

// ---------------------------------------------------------------------------
// SyncGuard
// ---------------------------------------------------------------------------

/// Set of (property, object) pairs currently being synchronized.
///
/// Cloning yields a handle to the same set. Bindings share
/// [`SyncGuard::global`] unless given their own guard.
#[derive(Clone, Default)]
pub struct SyncGuard {
    marks: Rc<RefCell<FxHashSet<SyncKey>>>,
}

thread_local! {
    static GLOBAL_GUARD: SyncGuard = SyncGuard::new();
}

impl SyncGuard {
    /// Create an isolated guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard shared by every binding on this thread.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_GUARD.with(Clone::clone)
    }

    #[must_use]
    pub fn is_syncing(&self, object: &Object, property: &Property) -> bool {
        self.marks.borrow().contains(&(property.id(), object.id()))
    }

    /// Mark `(property, object)` as syncing until the returned mark drops.
    ///
    /// Marking a pair that is already marked yields an inert mark, so the
    /// outer owner of the mark stays responsible for removing it.
    #[must_use]
    pub fn mark(&self, object: &Object, property: &Property) -> SyncMark {
        let key = (property.id(), object.id());
        let added = self.marks.borrow_mut().insert(key);
        SyncMark {
            guard: self.clone(),
            key: added.then_some(key),
        }
    }

    /// Number of marked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &SyncGuard) -> bool {
        Rc::ptr_eq(&self.marks, &other.marks)
    }
}

impl fmt::Debug for SyncGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncGuard")
            .field("marked", &self.len())
            .finish()
    }
}

/// RAII mark held for the duration of a sync.
#[must_use = "the mark is removed as soon as it is dropped"]
pub struct SyncMark {
    guard: SyncGuard,
    key: Option<SyncKey>,
}

impl SyncMark {
    /// Whether this mark added the pair (and will remove it on drop).
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for SyncMark {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.guard.marks.borrow_mut().remove(&key);
        }
    }
}

impl fmt::Debug for SyncMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMark")
            .field("owner", &self.is_owner())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Copy `source.source_property` into `target.target_property`.
pub(crate) fn sync(
    guard: &SyncGuard,
    target: &Object,
    target_property: &Property,
    source: &Object,
    source_property: &Property,
    converter: Option<&Converter>,
) -> Result<()> {
    if guard.is_syncing(target, target_property) {
        return Ok(());
    }

    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!(
        "property_sync",
        source = %source_property.name(),
        target = %target_property.name()
    )
    .entered();

    // Declaration order makes the target mark drop first.
    let _source_mark = guard.mark(source, source_property);
    let _target_mark = guard.mark(target, target_property);

    let value = source.get(source_property)?;
    let value = match converter {
        None => value,
        Some(convert) => match convert(Some(value)) {
            Converted::Value(value) => value,
            Converted::Void => return Ok(()),
            Converted::Default => target_property.default_value().clone(),
        },
    };

    target.set(target_property, value)
}

/// Write `target_property`'s default to `target`, giving the converter a
/// chance to substitute a value or abort.
pub(crate) fn sync_default(
    guard: &SyncGuard,
    target: &Object,
    target_property: &Property,
    converter: Option<&Converter>,
) -> Result<()> {
    if guard.is_syncing(target, target_property) {
        return Ok(());
    }

    let _target_mark = guard.mark(target, target_property);

    let converted = match converter {
        None => Converted::Default,
        Some(convert) => convert(None),
    };
    let value = match converted {
        Converted::Value(value) => value,
        Converted::Void => return Ok(()),
        Converted::Default => target_property.default_value().clone(),
    };

    tracing::trace!(target = %target_property.name(), "syncing default value");
    target.set(target_property, value)
}
