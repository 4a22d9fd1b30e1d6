//! Stack frames and cross-suspend frame identity.

use crate::backend::{FrameHandle, FrameSnapshot, VarDescriptor};
use crate::error::Error;
use crate::session::SessionCtx;
use crate::variable::{Variable, VariableKind};
use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLocation {
    Line(u32),
    /// Fallback for frames without line information (stripped code, plt stubs).
    Address(u64),
}

/// Identity tuple used for cross-suspend frame equality. Two backend frame
/// handles denote "the same frame" iff these tuples match, even though the
/// handles themselves are reissued on every suspend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameIdentity {
    /// Function name or empty.
    pub function: String,
    /// File name or empty.
    pub file: String,
    pub location: FrameLocation,
}

impl FrameIdentity {
    pub fn from_snapshot(snapshot: &FrameSnapshot) -> Self {
        Self {
            function: snapshot.function.clone().unwrap_or_default(),
            file: snapshot.file.clone().unwrap_or_default(),
            location: match snapshot.line {
                Some(line) => FrameLocation::Line(line),
                None => FrameLocation::Address(snapshot.address),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Regular,
    /// Sentinel appended when the real stack is deeper than the probe limit.
    Overflow,
}

#[derive(Default)]
struct FrameVars {
    /// Arguments + locals + visible globals, built lazily on first query.
    built: Option<Vec<Arc<Variable>>>,
    /// Ad hoc watch expressions, same representation, separate namespace.
    expressions: Vec<Arc<Variable>>,
    /// Set after a preserved frame was re-bound: the descriptor list must be
    /// re-fetched and merged before the next enumeration.
    refresh: bool,
}

pub struct StackFrame {
    ctx: SessionCtx,
    kind: FrameKind,
    identity: FrameIdentity,
    /// Replaceable: reconciliation re-binds surviving frames to fresh handles.
    handle: Mutex<Option<FrameHandle>>,
    level: AtomicU32,
    vars: Mutex<FrameVars>,
    disposed: AtomicBool,
}

impl fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackFrame")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("level", &self.level())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl StackFrame {
    pub(crate) fn create(ctx: SessionCtx, snapshot: &FrameSnapshot, level: u32) -> Arc<Self> {
        Arc::new(StackFrame {
            ctx,
            kind: FrameKind::Regular,
            identity: FrameIdentity::from_snapshot(snapshot),
            handle: Mutex::new(Some(snapshot.handle)),
            level: AtomicU32::new(level),
            vars: Mutex::default(),
            disposed: AtomicBool::new(false),
        })
    }

    /// The "more frames" placeholder representing everything below the probe depth.
    pub(crate) fn overflow(ctx: SessionCtx, level: u32) -> Arc<Self> {
        Arc::new(StackFrame {
            ctx,
            kind: FrameKind::Overflow,
            identity: FrameIdentity {
                function: String::new(),
                file: String::new(),
                location: FrameLocation::Address(0),
            },
            handle: Mutex::new(None),
            level: AtomicU32::new(level),
            vars: Mutex::default(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &FrameIdentity {
        &self.identity
    }

    pub fn function(&self) -> &str {
        &self.identity.function
    }

    pub fn file(&self) -> &str {
        &self.identity.file
    }

    pub fn location(&self) -> &FrameLocation {
        &self.identity.location
    }

    /// Depth index within the owning thread, 0 is the innermost frame.
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    pub fn is_overflow_sentinel(&self) -> bool {
        self.kind == FrameKind::Overflow
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn handle(&self) -> Option<FrameHandle> {
        *self.handle.lock()
    }

    /// Attach a fresh backend handle to a surviving frame. The variable nodes
    /// stay, only their descriptor list is re-validated on the next query.
    pub(crate) fn rebind(&self, snapshot: &FrameSnapshot, level: u32) {
        *self.handle.lock() = Some(snapshot.handle);
        self.level.store(level, Ordering::SeqCst);
        self.vars.lock().refresh = true;
    }

    /// Keep this frame across a resume; values must be refreshed afterwards.
    pub(crate) fn preserve(&self) {
        self.vars.lock().refresh = true;
    }

    /// Arguments, locals and visible globals of this frame, built lazily.
    pub fn variables(&self) -> Result<Vec<Arc<Variable>>, Error> {
        self.ensure_live()?;
        if self.kind == FrameKind::Overflow {
            return Ok(vec![]);
        }
        let handle = self.handle().ok_or(Error::Disposed("stack frame"))?;

        let mut vars = self.vars.lock();
        let vars = &mut *vars;
        match &mut vars.built {
            None => {
                let descriptors = self.fetch_descriptors(handle)?;
                let built = descriptors
                    .into_iter()
                    .map(|d| self.build_node(d))
                    .collect::<Vec<_>>();
                debug!(
                    target: "session",
                    "frame `{}` level {}: built {} variable(s)",
                    self.identity.function,
                    self.level(),
                    built.len()
                );
                vars.built = Some(built);
            }
            Some(existing) if vars.refresh => {
                // merge: keep nodes whose descriptor survived, drop the rest
                let descriptors = self.fetch_descriptors(handle)?;
                let mut merged = Vec::with_capacity(descriptors.len());
                for descriptor in descriptors {
                    match existing
                        .iter()
                        .find(|v| v.descriptor_id() == descriptor.id)
                    {
                        Some(node) => merged.push(node.clone()),
                        None => merged.push(self.build_node(descriptor)),
                    }
                }
                for stale in existing.iter() {
                    if !merged.iter().any(|m| Arc::ptr_eq(m, stale)) {
                        stale.dispose();
                    }
                }
                vars.built = Some(merged);
            }
            Some(_) => {}
        }
        vars.refresh = false;
        Ok(vars.built.clone().unwrap_or_default())
    }

    fn fetch_descriptors(&self, handle: FrameHandle) -> Result<Vec<VarDescriptor>, Error> {
        let mut descriptors = self.ctx.backend.frame_variables(handle)?;
        descriptors.extend(self.ctx.backend.visible_globals(handle)?);
        Ok(descriptors)
    }

    fn build_node(&self, descriptor: VarDescriptor) -> Arc<Variable> {
        let kind = VariableKind::from_origin(descriptor.origin);
        Variable::create(self.ctx.clone(), kind, descriptor, &self.identity.function)
    }

    /// Evaluate a watch expression in this frame's context and attach the
    /// resulting node to the frame.
    pub fn add_expression(&self, expression: &str) -> Result<Arc<Variable>, Error> {
        self.ensure_live()?;
        let handle = self.handle().ok_or(Error::Disposed("stack frame"))?;
        let descriptor = self.ctx.backend.evaluate(handle, expression)?;
        let node = Variable::create(
            self.ctx.clone(),
            VariableKind::Expression,
            descriptor,
            &self.identity.function,
        );
        self.vars.lock().expressions.push(node.clone());
        Ok(node)
    }

    pub fn remove_expression(&self, node: &Arc<Variable>) {
        let mut vars = self.vars.lock();
        let before = vars.expressions.len();
        vars.expressions.retain(|e| !Arc::ptr_eq(e, node));
        if vars.expressions.len() != before {
            node.dispose();
        }
    }

    pub fn expressions(&self) -> Vec<Arc<Variable>> {
        self.vars.lock().expressions.clone()
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Disposed("stack frame"));
        }
        Ok(())
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (built, expressions) = {
            let mut vars = self.vars.lock();
            (vars.built.take(), std::mem::take(&mut vars.expressions))
        };
        for node in built.into_iter().flatten() {
            node.dispose();
        }
        for node in expressions {
            node.dispose();
        }
        *self.handle.lock() = None;
    }
}
