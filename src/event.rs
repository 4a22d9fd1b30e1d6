//! Typed events of the backend notifier.
//!
//! The backend delivers events in ordered batches on its own notification
//! thread, one batch at a time per session. Every event names its originating
//! backend object; `Suspended` additionally carries the stop reason.

use crate::backend::{DescriptorId, ThreadHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Target,
    Thread(ThreadHandle),
    Value(DescriptorId),
}

/// Why the debuggee stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum SuspendReason {
    /// Stopped at a breakpoint, carries the backend breakpoint id.
    Breakpoint(u32),
    /// A watchpoint fired, carries the backend watchpoint id.
    Watchpoint(u32),
    /// A step request ran to the end of its range.
    EndOfStep,
    /// The debuggee received an OS signal.
    Signal { name: String },
    /// A shared library was loaded or unloaded.
    SharedLibrary { name: String },
    /// The backend stopped the debuggee because of an internal error.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeCause {
    ClientRequest,
    StepInto,
    StepOver,
    StepReturn,
}

impl ResumeCause {
    pub fn is_step(self) -> bool {
        !matches!(self, ResumeCause::ClientRequest)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Created(EventSource),
    Changed(EventSource),
    Resumed {
        source: EventSource,
        cause: ResumeCause,
    },
    Suspended {
        source: EventSource,
        reason: SuspendReason,
    },
    Destroyed(EventSource),
    Exited {
        code: i32,
    },
    Disconnected,
    Restarted,
}
