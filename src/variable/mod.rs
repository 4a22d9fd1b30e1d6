//! Variable nodes: named, typed bindings wrapping backend descriptors.
//!
//! A node's identity is the stable backend descriptor of its *original*
//! binding. Casting swaps the active binding to a shadow descriptor without
//! destroying the node, so client state keyed on the node (expansion,
//! formatting, watch membership) survives casts. Values are cached lazily,
//! see [`value`].

pub mod format;
pub mod value;

use crate::backend::{BackendError, DescriptorId, RawValue, VarDescriptor, VarOrigin};
use crate::dispatch::{EventListener, SubscriptionId};
use crate::error::Error;
use crate::event::{Event, EventSource};
use crate::muted_error;
use crate::session::state::Status;
use crate::session::SessionCtx;
use crate::variable::format::ValueFormat;
use crate::variable::value::{ArrayCache, CachedValue, PARTITION_SIZE};
use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Closed set of node flavors. Shared behavior lives on [`Variable`] itself,
/// the kind only tags provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Argument,
    Local,
    Global,
    Register,
    /// Ad hoc watch expression attached to a frame.
    Expression,
    /// Element materialized from an array partition.
    ArrayElement { index: u64 },
}

impl VariableKind {
    pub(crate) fn from_origin(origin: VarOrigin) -> Self {
        match origin {
            VarOrigin::Argument => VariableKind::Argument,
            VarOrigin::Local => VariableKind::Local,
            VarOrigin::Global => VariableKind::Global,
            VarOrigin::Register => VariableKind::Register,
        }
    }
}

/// Client-facing view of a cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueView {
    Scalar(String),
    Array { len: u64 },
    Composite { members: usize },
    /// The node is disabled, no fetch was performed.
    Disabled,
}

struct VarState {
    original: VarDescriptor,
    /// Active cast binding, if any. The original stays intact underneath.
    shadow: Option<VarDescriptor>,
    format: ValueFormat,
    enabled: bool,
    changed: bool,
    status: Status,
}

pub struct Variable {
    ctx: SessionCtx,
    kind: VariableKind,
    name: String,
    /// Structural path: enclosing frame function, enclosing variable names
    /// and this node's name. Key for persisted view preferences.
    path: String,
    state: Mutex<VarState>,
    cache: Mutex<CachedValue>,
    subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Variable {
    pub(crate) fn create(
        ctx: SessionCtx,
        kind: VariableKind,
        descriptor: VarDescriptor,
        parent_path: &str,
    ) -> Arc<Self> {
        let name = descriptor.name.clone();
        let path = format!("{parent_path}/{name}");
        let prefs = ctx.prefs.get(&path);

        let var = Arc::new(Variable {
            ctx,
            kind,
            name,
            path,
            state: Mutex::new(VarState {
                original: descriptor,
                shadow: None,
                format: prefs.format.unwrap_or_default(),
                enabled: true,
                changed: false,
                status: Status::ok(),
            }),
            cache: Mutex::new(CachedValue::NotComputed),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        // re-apply a persisted cast on top of the fresh descriptor
        if let Some(target) = prefs.cast_type.as_deref() {
            muted_error!(var.cast(target), "restore persisted cast:");
        }
        if let Some((start, length)) = prefs.array_range {
            muted_error!(
                var.cast_to_array(start, length),
                "restore persisted array cast:"
            );
        }

        let listener: Arc<dyn EventListener> = var.clone();
        let id = var.ctx.dispatcher.register(Arc::downgrade(&listener));
        *var.subscription.lock() = Some(id);
        var
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Type of the active binding (the cast type while a cast is in effect).
    pub fn type_name(&self) -> String {
        let state = self.state.lock();
        state
            .shadow
            .as_ref()
            .unwrap_or(&state.original)
            .type_name
            .clone()
    }

    /// Declared type, regardless of any active cast.
    pub fn declared_type(&self) -> String {
        self.state.lock().original.type_name.clone()
    }

    /// Stable identity of this node.
    pub fn descriptor_id(&self) -> DescriptorId {
        self.state.lock().original.id
    }

    fn active_id(&self) -> DescriptorId {
        let state = self.state.lock();
        state.shadow.as_ref().unwrap_or(&state.original).id
    }

    pub fn format(&self) -> ValueFormat {
        self.state.lock().format
    }

    pub fn set_format(&self, format: ValueFormat) {
        self.state.lock().format = format;
        let persisted = (format != ValueFormat::Natural).then_some(format);
        self.ctx.prefs.set_format(&self.path, persisted);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Disabled nodes never touch the backend.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    /// Set when the backend reported a change of this node's value since the
    /// previous suspend; cleared on the next resume.
    pub fn is_changed(&self) -> bool {
        self.state.lock().changed
    }

    pub fn status(&self) -> Status {
        self.state.lock().status.clone()
    }

    pub fn is_cast(&self) -> bool {
        self.state.lock().shadow.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Current value, recomputed if the cache was invalidated.
    pub fn value(&self) -> Result<ValueView, Error> {
        self.ensure_live()?;
        if !self.is_enabled() {
            return Ok(ValueView::Disabled);
        }
        let mut cache = self.cache.lock();
        if matches!(*cache, CachedValue::NotComputed) {
            self.fetch_into(&mut cache)?;
        }
        self.view_of(&cache)
    }

    /// Member nodes of a composite value.
    pub fn members(&self) -> Result<Vec<Arc<Variable>>, Error> {
        self.ensure_live()?;
        let mut cache = self.cache.lock();
        if matches!(*cache, CachedValue::NotComputed) {
            self.fetch_into(&mut cache)?;
        }
        match &*cache {
            CachedValue::Composite(members) => Ok(members.clone()),
            CachedValue::Failed(msg) => Err(Error::StaleValue(msg.clone())),
            _ => Err(Error::NotAnAggregate(self.name.clone())),
        }
    }

    /// Member node with the given name, if the composite has one.
    pub fn member(&self, name: &str) -> Result<Option<Arc<Variable>>, Error> {
        Ok(self.members()?.into_iter().find(|m| m.name() == name))
    }

    /// Length of an array value.
    pub fn len(&self) -> Result<u64, Error> {
        self.ensure_live()?;
        let mut cache = self.cache.lock();
        if matches!(*cache, CachedValue::NotComputed) {
            self.fetch_into(&mut cache)?;
        }
        match &*cache {
            CachedValue::Array(array) => Ok(array.len),
            CachedValue::Failed(msg) => Err(Error::StaleValue(msg.clone())),
            _ => Err(Error::NotAnAggregate(self.name.clone())),
        }
    }

    /// Element node of an array value. Materializes exactly the partition
    /// containing `index` on first touch; any later index inside the same
    /// partition is served without a backend round-trip.
    pub fn element(&self, index: u64) -> Result<Arc<Variable>, Error> {
        self.ensure_live()?;
        let mut cache = self.cache.lock();
        if matches!(*cache, CachedValue::NotComputed) {
            self.fetch_into(&mut cache)?;
        }
        let descriptor = self.active_id();
        match &mut *cache {
            CachedValue::Array(array) => {
                if index >= array.len {
                    return Err(Error::IndexOutOfBounds(index, array.len));
                }
                if let Some(node) = array.get(index) {
                    return Ok(node);
                }
                let partition = ArrayCache::partition_of(index);
                let start = partition * PARTITION_SIZE;
                let length = PARTITION_SIZE.min(array.len - start);
                debug!(
                    target: "variable",
                    "`{}`: materialize partition {partition} ([{start}; {})", self.path, start + length
                );
                let descriptors = self.ctx.backend.array_slice(descriptor, start, length)?;
                let nodes: Vec<_> = descriptors
                    .into_iter()
                    .enumerate()
                    .map(|(i, d)| {
                        Variable::create(
                            self.ctx.clone(),
                            VariableKind::ArrayElement {
                                index: start + i as u64,
                            },
                            d,
                            &self.path,
                        )
                    })
                    .collect();
                array.insert_partition(partition, nodes);
                array
                    .get(index)
                    .ok_or(Error::IndexOutOfBounds(index, array.len))
            }
            CachedValue::Failed(msg) => Err(Error::StaleValue(msg.clone())),
            _ => Err(Error::NotAnAggregate(self.name.clone())),
        }
    }

    /// Assign a new value through the backend. The cache is invalidated so the
    /// next query re-reads the effective value.
    pub fn set_value(&self, literal: &str) -> Result<(), Error> {
        self.ensure_live()?;
        let descriptor = self.active_id();
        self.ctx.backend.set_value(descriptor, literal)?;
        self.state.lock().changed = true;
        self.invalidate_cache();
        Ok(())
    }

    /// Reinterpret this node as `target_type` via a shadow binding.
    pub fn cast(&self, target_type: &str) -> Result<(), Error> {
        self.ensure_live()?;
        let original = self.state.lock().original.id;
        let shadow = self.ctx.backend.cast(original, target_type)?;
        self.install_shadow(shadow);
        self.ctx.prefs.set_cast_type(&self.path, Some(target_type));
        Ok(())
    }

    /// Reinterpret this node as an array slice `[start; start + length)`.
    pub fn cast_to_array(&self, start: u32, length: u32) -> Result<(), Error> {
        self.ensure_live()?;
        let original = self.state.lock().original.id;
        let shadow = self.ctx.backend.cast_to_array(original, start, length)?;
        self.install_shadow(shadow);
        self.ctx
            .prefs
            .set_array_range(&self.path, Some((start, length)));
        Ok(())
    }

    /// Drop any active cast and return to the original binding.
    pub fn restore_original(&self) -> Result<(), Error> {
        self.ensure_live()?;
        let previous = self.state.lock().shadow.take();
        if let Some(previous) = previous {
            self.ctx.backend.release(previous.id);
            self.invalidate_cache();
        }
        self.ctx.prefs.set_cast_type(&self.path, None);
        self.ctx.prefs.set_array_range(&self.path, None);
        Ok(())
    }

    fn install_shadow(&self, shadow: VarDescriptor) {
        let previous = self.state.lock().shadow.replace(shadow);
        if let Some(previous) = previous {
            self.ctx.backend.release(previous.id);
        }
        self.invalidate_cache();
    }

    fn fetch_into(&self, cache: &mut CachedValue) -> Result<(), Error> {
        let descriptor = self.active_id();
        match self.ctx.backend.read_value(descriptor) {
            Ok(RawValue::Scalar(text)) => {
                *cache = CachedValue::Scalar(text);
                Ok(())
            }
            Ok(RawValue::Array { len }) => {
                *cache = CachedValue::Array(ArrayCache::new(len));
                Ok(())
            }
            Ok(RawValue::Composite { members }) => {
                let children = members
                    .into_iter()
                    .map(|d| Variable::create(self.ctx.clone(), self.kind, d, &self.path))
                    .collect();
                *cache = CachedValue::Composite(children);
                Ok(())
            }
            Err(BackendError::HandleInvalidated(msg)) => {
                // keep serving the error text until the next refresh
                self.state.lock().status = Status::error(&msg);
                *cache = CachedValue::Failed(msg.clone());
                Err(Error::StaleValue(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn view_of(&self, cache: &CachedValue) -> Result<ValueView, Error> {
        match cache {
            CachedValue::Scalar(text) => Ok(ValueView::Scalar(self.format().render(text))),
            CachedValue::Array(array) => Ok(ValueView::Array { len: array.len }),
            CachedValue::Composite(members) => Ok(ValueView::Composite {
                members: members.len(),
            }),
            CachedValue::Failed(msg) => Err(Error::StaleValue(msg.clone())),
            CachedValue::NotComputed => {
                unreachable!("cache is filled under the same lock before viewing")
            }
        }
    }

    /// Idempotent: invalidating an already empty cache is a no-op.
    fn invalidate_cache(&self) {
        let previous = mem::replace(&mut *self.cache.lock(), CachedValue::NotComputed);
        for child in previous.take_children() {
            child.dispose();
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Disposed("variable"));
        }
        Ok(())
    }

    /// Detach from the model. Deregisters first, then releases backend
    /// handles, then marks the node disposed; queries received afterwards
    /// fail fast instead of touching dead handles.
    pub(crate) fn dispose(&self) {
        let Some(subscription) = self.subscription.lock().take() else {
            return; // already disposed
        };
        self.ctx.dispatcher.deregister(subscription);

        let previous = mem::replace(&mut *self.cache.lock(), CachedValue::NotComputed);
        for child in previous.take_children() {
            child.dispose();
        }
        let (original, shadow) = {
            let mut state = self.state.lock();
            (state.original.id, state.shadow.take().map(|s| s.id))
        };
        if let Some(shadow) = shadow {
            self.ctx.backend.release(shadow);
        }
        self.ctx.backend.release(original);

        self.disposed.store(true, Ordering::SeqCst);
        debug!(target: "variable", "`{}` disposed", self.path);
    }
}

impl EventListener for Variable {
    fn handle_event(&self, event: &Event) {
        if self.is_disposed() {
            return;
        }
        match event {
            Event::Changed(EventSource::Value(id)) if *id == self.active_id() => {
                self.state.lock().changed = true;
                self.invalidate_cache();
            }
            Event::Resumed { .. } => {
                // the old value handle may not survive the resume
                {
                    let mut state = self.state.lock();
                    state.changed = false;
                    state.status = Status::ok();
                }
                self.invalidate_cache();
            }
            Event::Destroyed(EventSource::Value(id)) if *id == self.active_id() => {
                // the backend invalidated this object out from under us
                debug!(target: "variable", "`{}` destroyed by the backend", self.path);
                self.dispose();
            }
            _ => {}
        }
    }
}
