#![forbid(unsafe_code)]

//! Lifetime management for groups of bindings and listeners.

use std::fmt;
use std::rc::Rc;

use crate::binding::Binding;
use crate::error::Result;
use crate::event::{EventData, EventKey, ListenerGuard, Priority};
use crate::object::{Object, PathStep};

enum Held {
    Binding(Binding),
    Listener(ListenerGuard),
}

/// Collects bindings and listeners for a logical scope (e.g., a view).
///
/// When the scope is dropped, everything it holds is released, cleanly
/// disconnecting all bindings associated with that scope.
///
/// # Usage
///
/// ```ignore
/// let mut scope = BindingScope::new();
/// scope.bind(&model, ["user", "name"], &label, "text")?;
/// scope.listen(&model, EventKey::Changed, Priority::DEFAULT, |_| Ok(()));
/// // dropping `scope` unbinds and unlistens everything
/// ```
///
/// # Invariants
///
/// 1. Entries are released in reverse registration order on drop.
/// 2. After drop, no callback registered through this scope will fire.
/// 3. `clear()` releases all entries immediately (reusable scope).
/// 4. Binding count is always accurate.
pub struct BindingScope {
    held: Vec<Held>,
}

impl BindingScope {
    /// Create an empty binding scope.
    #[must_use]
    pub fn new() -> Self {
        Self { held: Vec::new() }
    }

    /// Take ownership of a binding until the scope is dropped or cleared.
    pub fn hold(&mut self, binding: Binding) -> &mut Self {
        self.held.push(Held::Binding(binding));
        self
    }

    /// Take ownership of a listener guard.
    pub fn hold_listener(&mut self, guard: ListenerGuard) -> &mut Self {
        self.held.push(Held::Listener(guard));
        self
    }

    /// Bind `target.target_property` to `path` starting at `source`, within
    /// this scope.
    pub fn bind<I, S>(
        &mut self,
        source: &Object,
        path: I,
        target: &Object,
        target_property: impl Into<PathStep>,
    ) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<PathStep>,
    {
        let binding = Binding::new(source, path)?;
        binding.assign_to(target, target_property)?;
        Ok(self.hold(binding))
    }

    /// Listen for `event` on `source` within this scope.
    pub fn listen(
        &mut self,
        source: &Object,
        event: EventKey,
        priority: Priority,
        handler: impl Fn(&Rc<EventData>) -> Result<()> + 'static,
    ) -> &mut Self {
        let guard = source.listen(event, priority, handler);
        self.hold_listener(guard)
    }

    /// Number of bindings held by this scope.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.held
            .iter()
            .filter(|h| matches!(h, Held::Binding(_)))
            .count()
    }

    /// Number of listeners held by this scope.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.held.len() - self.binding_count()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release everything immediately (scope becomes empty but reusable).
    pub fn clear(&mut self) {
        while let Some(held) = self.held.pop() {
            drop(held);
        }
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.binding_count())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
