#![forbid(unsafe_code)]

//! One resolved step of a binding path.
//!
//! A chain node holds the (source object, source property) pair of its step
//! and, unless it is the leaf, owns the node for the rest of the path. When
//! the step's value changes, the node discards its child and resolves the
//! remainder again against the new value, so a path keeps following whatever
//! objects currently sit on it.
//!
//! # Invariants
//!
//! 1. Every listener a node registers is released exactly once, by
//!    [`BindingChain::unbind`].
//! 2. A node only reacts to change events whose target and event are its own
//!    source and source property.
//! 3. Each resolution bumps the node's generation; a resolution that finds
//!    the generation moved on while it was reading abandons its result.
//! 4. An unresolvable step (null value, non-object value, unknown name or a
//!    step leading back to the target property) syncs the target to its
//!    default instead of failing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::binding::BindingInner;
use crate::binding::sync::{sync, sync_default};
use crate::error::Result;
use crate::event::{EventData, ListenerGuard, Priority};
use crate::object::{Object, PathStep};
use crate::property::Property;

pub(crate) struct BindingChain {
    binding: Weak<BindingInner>,
    source: Object,
    source_property: Property,
    sub_path: Vec<PathStep>,
    sub_chain: RefCell<Option<Rc<BindingChain>>>,
    generation: Cell<u64>,
    is_observable: bool,
    is_two_way: bool,
    source_listener: RefCell<Option<ListenerGuard>>,
    target_listener: RefCell<Option<ListenerGuard>>,
}

impl BindingChain {
    pub(crate) fn new(
        binding: &Rc<BindingInner>,
        source: Object,
        source_property: Property,
        sub_path: Vec<PathStep>,
    ) -> Rc<Self> {
        let is_observable = source.is_observable() && source_property.is_observable();
        let is_two_way =
            binding.is_two_way() && sub_path.is_empty() && !source_property.is_read_only();
        Rc::new(Self {
            binding: Rc::downgrade(binding),
            source,
            source_property,
            sub_path,
            sub_chain: RefCell::new(None),
            generation: Cell::new(0),
            is_observable,
            is_two_way,
            source_listener: RefCell::new(None),
            target_listener: RefCell::new(None),
        })
    }

    /// Register this node's listeners and sync the target.
    pub(crate) fn bind(this: &Rc<Self>) -> Result<()> {
        let Some(binding) = this.binding.upgrade() else {
            return Ok(());
        };
        let Some(endpoint) = binding.endpoint() else {
            return Ok(());
        };

        if this.is_observable {
            let chain = Rc::downgrade(this);
            let guard = this.source.listen(
                this.source_property.changed_event(),
                Priority::DEFAULT,
                move |data| match chain.upgrade() {
                    Some(chain) => Self::source_changed(&chain, data),
                    None => Ok(()),
                },
            );
            this.source_listener.replace(Some(guard));
        }

        if this.is_two_way {
            let chain = Rc::downgrade(this);
            let guard = endpoint.target.listen(
                endpoint.target_property.changed_event(),
                Priority::DEFAULT,
                move |data| match chain.upgrade() {
                    Some(chain) => chain.target_changed(data),
                    None => Ok(()),
                },
            );
            this.target_listener.replace(Some(guard));
        }

        Self::sync_target(this)
    }

    /// Release this node's listeners and its whole sub-chain.
    pub(crate) fn unbind(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        self.release_sub_chain();

        let target_listener = self.target_listener.borrow_mut().take();
        drop(target_listener);
        let source_listener = self.source_listener.borrow_mut().take();
        drop(source_listener);
    }

    /// Re-apply the current value (or default) to the target without
    /// resolving the path again.
    pub(crate) fn sync(&self) -> Result<()> {
        let sub_chain = self.sub_chain.borrow().clone();
        if let Some(sub_chain) = sub_chain {
            return sub_chain.sync();
        }

        let Some(binding) = self.binding.upgrade() else {
            return Ok(());
        };
        let Some(endpoint) = binding.endpoint() else {
            return Ok(());
        };

        if self.sub_path.is_empty() {
            sync(
                binding.guard(),
                &endpoint.target,
                &endpoint.target_property,
                &self.source,
                &self.source_property,
                endpoint.converter.as_ref(),
            )
        } else {
            sync_default(
                binding.guard(),
                &endpoint.target,
                &endpoint.target_property,
                endpoint.converter.as_ref(),
            )
        }
    }

    /// Append the resolved properties of this node and its descendants.
    pub(crate) fn get_path(&self, out: &mut Vec<Option<Property>>) {
        out.push(Some(self.source_property.clone()));
        let sub_chain = self.sub_chain.borrow().clone();
        if let Some(sub_chain) = sub_chain {
            sub_chain.get_path(out);
        }
    }

    // -- resolution ----------------------------------------------------------

    fn sync_target(this: &Rc<Self>) -> Result<()> {
        let Some(binding) = this.binding.upgrade() else {
            return Ok(());
        };
        let Some(endpoint) = binding.endpoint() else {
            return Ok(());
        };

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "binding_resolve",
            property = %this.source_property.name(),
            remaining = this.sub_path.len()
        )
        .entered();

        let Some(next_step) = this.sub_path.first() else {
            return sync(
                binding.guard(),
                &endpoint.target,
                &endpoint.target_property,
                &this.source,
                &this.source_property,
                endpoint.converter.as_ref(),
            );
        };

        let generation = this.generation.get().wrapping_add(1);
        this.generation.set(generation);

        this.release_sub_chain();

        let value = this.source.get(&this.source_property)?;
        if this.generation.get() != generation {
            tracing::trace!(
                property = %this.source_property.name(),
                "stale resolution abandoned"
            );
            return Ok(());
        }

        let resolved = value.as_object().and_then(|object| {
            let property = object.find_property(next_step)?;
            let loops_back =
                object.ptr_eq(&endpoint.target) && property.ptr_eq(&endpoint.target_property);
            (!loops_back).then(|| (object.clone(), property))
        });

        let Some((sub_source, sub_property)) = resolved else {
            tracing::debug!(
                step = %next_step,
                target = %endpoint.target_property.name(),
                "binding path unresolved, syncing default"
            );
            return sync_default(
                binding.guard(),
                &endpoint.target,
                &endpoint.target_property,
                endpoint.converter.as_ref(),
            );
        };

        tracing::trace!(
            property = %sub_property.name(),
            remaining = this.sub_path.len() - 1,
            "binding chain rebuilt"
        );
        let sub_chain = Self::new(
            &binding,
            sub_source,
            sub_property,
            this.sub_path[1..].to_vec(),
        );
        this.sub_chain.replace(Some(Rc::clone(&sub_chain)));
        Self::bind(&sub_chain)
    }

    fn sync_source(&self) -> Result<()> {
        let Some(binding) = self.binding.upgrade() else {
            return Ok(());
        };
        let Some(endpoint) = binding.endpoint() else {
            return Ok(());
        };
        sync(
            binding.guard(),
            &self.source,
            &self.source_property,
            &endpoint.target,
            &endpoint.target_property,
            endpoint.reverse_converter.as_ref(),
        )
    }

    fn release_sub_chain(&self) {
        let sub_chain = self.sub_chain.borrow_mut().take();
        if let Some(sub_chain) = sub_chain {
            sub_chain.unbind();
        }
    }

    // -- event handlers ------------------------------------------------------

    fn source_changed(this: &Rc<Self>, data: &Rc<EventData>) -> Result<()> {
        if !data.is_from(&this.source, &this.source_property.changed_event()) {
            return Ok(());
        }
        Self::sync_target(this)
    }

    fn target_changed(&self, data: &Rc<EventData>) -> Result<()> {
        let Some(endpoint) = self.binding.upgrade().and_then(|b| b.endpoint()) else {
            return Ok(());
        };
        if !data.is_from(&endpoint.target, &endpoint.target_property.changed_event()) {
            return Ok(());
        }
        self.sync_source()
    }
}

impl fmt::Debug for BindingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingChain")
            .field("source", &self.source.id())
            .field("property", &self.source_property.name())
            .field("remaining", &self.sub_path.len())
            .field("observable", &self.is_observable)
            .field("two_way", &self.is_two_way)
            .finish()
    }
}
