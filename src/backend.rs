//! Interface boundary of the external debugger engine.
//!
//! The model never talks to a wire protocol directly: everything it needs from
//! the engine is expressed by the [`Backend`] command surface plus the typed
//! event stream defined in [`crate::event`]. Handles handed out by the backend
//! are opaque: a [`DescriptorId`] is stable for the lifetime of a variable,
//! while [`FrameHandle`]s are transient and reissued on every suspend.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Backend identifier of an OS thread of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadHandle(pub u64);

impl Display for ThreadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

/// Stable backend-side identifier of a variable or register,
/// independent of its possibly-transient value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub u64);

impl Display for DescriptorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

/// Backend handle of a single stack frame. Valid only until the next resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle {
    pub thread: ThreadHandle,
    pub token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOrigin {
    Argument,
    Local,
    Global,
    Register,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueShape {
    Scalar,
    Array { len: u64, element_type: String },
    Composite,
}

/// Descriptor of a single named binding as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDescriptor {
    pub id: DescriptorId,
    pub name: String,
    pub type_name: String,
    pub shape: ValueShape,
    pub origin: VarOrigin,
}

/// Result of a value fetch. Aggregate contents are reported as descriptors,
/// scalar contents as the natural-format rendering of the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(String),
    Array { len: u64 },
    Composite { members: Vec<VarDescriptor> },
}

/// One frame of a thread backtrace as reported on suspend.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub handle: FrameHandle,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Endianness {
    Little,
    Big,
}

/// Static facts about the debugged image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub endianness: Endianness,
    /// Pointer width in bits.
    pub address_width: u8,
}

/// Optional backend abilities, resolved once at session construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub can_suspend: bool,
    pub can_disconnect: bool,
    pub can_restart: bool,
    pub can_step_instruction: bool,
    pub can_read_memory: bool,
    pub can_access_registers: bool,
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("value handle invalidated: {0}")]
    HandleInvalidated(String),
    #[error("operation `{0}` is not supported by this backend")]
    Unsupported(&'static str),
    #[error("backend connection lost")]
    ConnectionLost,
}

/// Command surface of the debugger engine.
///
/// Execution-control commands are asynchronous from the model's point of view:
/// a successful return only means the command was accepted, the actual state
/// change arrives later as an event. Introspection commands are synchronous
/// round-trips and must be issued on suspended targets only.
pub trait Backend: Send + Sync {
    fn image(&self) -> ImageInfo;
    fn capabilities(&self) -> Capabilities;

    fn resume(&self) -> BackendResult<()>;
    fn interrupt(&self) -> BackendResult<()>;
    fn step(&self, thread: ThreadHandle, kind: StepKind) -> BackendResult<()>;
    fn terminate(&self) -> BackendResult<()>;
    fn disconnect(&self) -> BackendResult<()>;
    fn restart(&self) -> BackendResult<()>;

    fn threads(&self) -> BackendResult<Vec<ThreadHandle>>;
    fn stack_depth(&self, thread: ThreadHandle) -> BackendResult<u32>;
    /// Fetch snapshots for frame levels `[from, to)`, level 0 is the innermost frame.
    fn stack_frames(
        &self,
        thread: ThreadHandle,
        from: u32,
        to: u32,
    ) -> BackendResult<Vec<FrameSnapshot>>;

    /// Argument and local descriptors of a frame, in declaration order.
    fn frame_variables(&self, frame: FrameHandle) -> BackendResult<Vec<VarDescriptor>>;
    /// Globals visible from a frame.
    fn visible_globals(&self, frame: FrameHandle) -> BackendResult<Vec<VarDescriptor>>;
    /// Evaluate a watch expression in the context of a frame.
    fn evaluate(&self, frame: FrameHandle, expression: &str) -> BackendResult<VarDescriptor>;

    fn read_value(&self, descriptor: DescriptorId) -> BackendResult<RawValue>;
    /// Reinterpret a descriptor as another type, producing a shadow descriptor.
    fn cast(&self, descriptor: DescriptorId, target_type: &str) -> BackendResult<VarDescriptor>;
    /// Reinterpret a descriptor as an array slice, producing a shadow descriptor.
    fn cast_to_array(
        &self,
        descriptor: DescriptorId,
        start: u32,
        length: u32,
    ) -> BackendResult<VarDescriptor>;
    /// Element descriptors for the `[offset, offset + length)` sub-range of an array value.
    fn array_slice(
        &self,
        descriptor: DescriptorId,
        offset: u64,
        length: u64,
    ) -> BackendResult<Vec<VarDescriptor>>;
    fn set_value(&self, descriptor: DescriptorId, literal: &str) -> BackendResult<()>;

    /// Release a backend handle. Infallible from the model's point of view,
    /// the backend is free to ignore unknown handles.
    fn release(&self, descriptor: DescriptorId);
}
