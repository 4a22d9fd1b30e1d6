//! Narrow interfaces of the session sub-managers.
//!
//! Breakpoint persistence, register presentation, signal policy and module
//! bookkeeping live outside this crate. The session consumes them through the
//! traits below and releases them on terminate/disconnect.

use crate::backend::{BackendResult, FrameHandle, VarDescriptor};
use std::sync::Arc;

/// Persisted breakpoint as resolved by the external breakpoint manager.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointInfo {
    pub id: u32,
    pub enabled: bool,
    /// Human readable location, e.g. `main.c:42`.
    pub location: String,
    pub condition: Option<String>,
}

/// Maps backend breakpoint ids to persisted breakpoint objects.
pub trait BreakpointResolver: Send + Sync {
    fn resolve(&self, id: u32) -> Option<BreakpointInfo>;
}

/// Side-effect action attached to breakpoint hits (sound, log, re-enable, ...).
/// Actions run after the breakpoint is resolved and before the generic
/// suspend notification reaches the client.
pub trait BreakpointAction: Send + Sync {
    fn on_hit(&self, breakpoint: &BreakpointInfo) -> anyhow::Result<()>;
}

/// Register descriptors of a frame, provided by the external register manager.
pub trait RegisterProvider: Send + Sync {
    fn frame_registers(&self, frame: FrameHandle) -> BackendResult<Vec<VarDescriptor>>;
}

/// Decides whether a signal stop is worth reporting to the client.
pub trait SignalPolicy: Send + Sync {
    fn should_report(&self, signal: &str) -> bool;
}

/// Shared-library bookkeeping of the external module manager.
pub trait ModuleRegistry: Send + Sync {
    fn on_library_load(&self, name: &str);
}

#[derive(Clone)]
pub struct Collaborators {
    pub breakpoints: Arc<dyn BreakpointResolver>,
    pub actions: Vec<Arc<dyn BreakpointAction>>,
    pub registers: Arc<dyn RegisterProvider>,
    pub signals: Arc<dyn SignalPolicy>,
    pub modules: Arc<dyn ModuleRegistry>,
}

/// Resolver that knows no breakpoints.
pub struct NoBreakpoints;

impl BreakpointResolver for NoBreakpoints {
    fn resolve(&self, _: u32) -> Option<BreakpointInfo> {
        None
    }
}

/// Provider for backends without register access.
pub struct NoRegisters;

impl RegisterProvider for NoRegisters {
    fn frame_registers(&self, _: FrameHandle) -> BackendResult<Vec<VarDescriptor>> {
        Ok(vec![])
    }
}

/// Policy that reports every signal.
pub struct ReportAllSignals;

impl SignalPolicy for ReportAllSignals {
    fn should_report(&self, _: &str) -> bool {
        true
    }
}

/// Registry that ignores library events.
pub struct NoModules;

impl ModuleRegistry for NoModules {
    fn on_library_load(&self, _: &str) {}
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            breakpoints: Arc::new(NoBreakpoints),
            actions: vec![],
            registers: Arc::new(NoRegisters),
            signals: Arc::new(ReportAllSignals),
            modules: Arc::new(NoModules),
        }
    }
}
