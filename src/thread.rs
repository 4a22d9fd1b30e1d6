//! Debuggee threads and stack-frame reconciliation.
//!
//! A thread's frame sequence is rebuilt as little as possible across suspends:
//! the depth diff against the previous suspend selects a fast path, and frame
//! identity (see [`crate::frame::FrameIdentity`]) is always verified pairwise
//! before any cached frame object is reused. Whenever identity cannot be
//! proven the whole sequence is rebuilt as a correctness fallback.

use crate::backend::{FrameSnapshot, ThreadHandle};
use crate::dispatch::{EventListener, SubscriptionId};
use crate::error::Error;
use crate::event::{Event, EventSource, ResumeCause};
use crate::frame::{FrameIdentity, StackFrame};
use crate::session::SessionCtx;
use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strum_macros::Display;
use uuid::Uuid;

/// Probe limit for backtraces. Deeper stacks are represented by a single
/// sentinel "more frames" placeholder after the last probed frame.
pub const MAX_FRAMES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ThreadState {
    Running,
    Stepping,
    Suspended,
    Exited,
}

#[derive(Default)]
struct FrameStack {
    /// Index 0 is the innermost frame.
    frames: Vec<Arc<StackFrame>>,
    /// Last stack depth reported by the backend, unclamped.
    depth: u32,
    has_sentinel: bool,
    /// Set on every suspend; the next query reconciles.
    stale: bool,
}

pub struct Thread {
    ctx: SessionCtx,
    /// Stable surrogate identity: survives suspends and outlives the backend
    /// handle, so clients can correlate UI state with a thread over time.
    id: Uuid,
    /// Weak reference to the backend thread: nulled once the backend destroys it.
    handle: Mutex<Option<ThreadHandle>>,
    state: Mutex<ThreadState>,
    current: AtomicBool,
    stack: Mutex<FrameStack>,
    subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Thread {
    pub(crate) fn create(ctx: SessionCtx, tid: ThreadHandle, state: ThreadState) -> Arc<Self> {
        let thread = Arc::new(Thread {
            ctx,
            id: Uuid::new_v4(),
            handle: Mutex::new(Some(tid)),
            state: Mutex::new(state),
            current: AtomicBool::new(false),
            stack: Mutex::default(),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        let listener: Arc<dyn EventListener> = thread.clone();
        let id = thread.ctx.dispatcher.register(Arc::downgrade(&listener));
        *thread.subscription.lock() = Some(id);
        debug!(target: "session", "thread {tid} attached (surrogate {})", thread.id);
        thread
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> Option<ThreadHandle> {
        *self.handle.lock()
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current(&self, current: bool) {
        self.current.store(current, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Last observed stack depth, unclamped.
    pub fn stack_depth(&self) -> u32 {
        self.stack.lock().depth
    }

    /// Stack frames of this thread, innermost first. Reconciles against the
    /// backend if the cached sequence is stale; this is the only blocking path.
    pub fn frames(&self) -> Result<Vec<Arc<StackFrame>>, Error> {
        self.ensure_live()?;
        if self.state() != ThreadState::Suspended {
            return Err(Error::ThreadRunning);
        }
        let mut stack = self.stack.lock();
        if stack.stale {
            self.reconcile(&mut stack)?;
            stack.stale = false;
        }
        Ok(stack.frames.clone())
    }

    fn reconcile(&self, stack: &mut FrameStack) -> Result<(), Error> {
        let tid = self.handle().ok_or(Error::Disposed("thread"))?;

        // the sentinel never participates in diffing
        if stack.has_sentinel {
            if let Some(sentinel) = stack.frames.pop() {
                sentinel.dispose();
            }
            stack.has_sentinel = false;
        }

        let depth = self.ctx.backend.stack_depth(tid)?;
        let clamped = depth.min(MAX_FRAMES);
        let snapshots = self.ctx.backend.stack_frames(tid, 0, clamped)?;
        debug!(
            target: "reconcile",
            "thread {tid}: depth {} -> {depth} ({} frame(s) cached)",
            stack.depth,
            stack.frames.len()
        );

        if stack.frames.is_empty() {
            stack.frames = self.build_all(&snapshots);
        } else {
            let diff = depth as i64 - stack.depth as i64;
            if !self.try_diff(stack, &snapshots, diff) {
                debug!(target: "reconcile", "thread {tid}: identity unproven, full rebuild");
                for frame in stack.frames.drain(..) {
                    frame.dispose();
                }
                stack.frames = self.build_all(&snapshots);
            }
        }

        if depth > MAX_FRAMES {
            stack
                .frames
                .push(StackFrame::overflow(self.ctx.clone(), MAX_FRAMES));
            stack.has_sentinel = true;
        }
        stack.depth = depth;
        Ok(())
    }

    fn build_all(&self, snapshots: &[FrameSnapshot]) -> Vec<Arc<StackFrame>> {
        snapshots
            .iter()
            .enumerate()
            .map(|(level, s)| StackFrame::create(self.ctx.clone(), s, level as u32))
            .collect()
    }

    /// Depth-diff fast paths of the reconciliation.
    ///
    /// A positive diff means the thread stepped into deeper frames: the new
    /// innermost `diff` frames are built fresh and the old sequence survives
    /// shifted down. A negative diff means the thread returned out of its
    /// innermost frames: those are disposed and the survivors shift up, with
    /// frames newly exposed by the probe window appended at the tail.
    ///
    /// Identity is verified pairwise over the whole overlapping range before
    /// anything is mutated; `false` means the caller must rebuild.
    fn try_diff(&self, stack: &mut FrameStack, snapshots: &[FrameSnapshot], diff: i64) -> bool {
        let old = &stack.frames;
        // survivors: old[head_drop + i] corresponds to snapshots[shift + i]
        let (head_drop, shift) = if diff >= 0 {
            (0usize, diff as usize)
        } else {
            ((-diff) as usize, 0usize)
        };
        if head_drop > old.len() {
            return false;
        }

        let survivors = (old.len() - head_drop).min(snapshots.len().saturating_sub(shift));
        for i in 0..survivors {
            let frame = &old[head_drop + i];
            if *frame.identity() != FrameIdentity::from_snapshot(&snapshots[shift + i]) {
                return false;
            }
        }

        // identity proven for every overlapping pair, commit
        let mut next = Vec::with_capacity(snapshots.len());
        for (level, snapshot) in snapshots.iter().enumerate().take(shift) {
            next.push(StackFrame::create(self.ctx.clone(), snapshot, level as u32));
        }
        for i in 0..survivors {
            let frame = old[head_drop + i].clone();
            frame.rebind(&snapshots[shift + i], (shift + i) as u32);
            next.push(frame);
        }
        // frames newly exposed at the bottom of the probe window
        for (level, snapshot) in snapshots.iter().enumerate().skip(shift + survivors) {
            next.push(StackFrame::create(self.ctx.clone(), snapshot, level as u32));
        }

        // frames that returned out, plus survivors that fell below the window
        for frame in &old[..head_drop] {
            frame.dispose();
        }
        for frame in &old[head_drop + survivors..] {
            frame.dispose();
        }

        stack.frames = next;
        true
    }

    /// Keep the cached frames across a resume (this thread is the one
    /// stepping); everything is re-validated on the next suspend.
    pub(crate) fn resumed_preserve(&self, cause: ResumeCause) {
        *self.state.lock() = if cause.is_step() {
            ThreadState::Stepping
        } else {
            ThreadState::Running
        };
        let mut stack = self.stack.lock();
        stack.stale = true;
        for frame in &stack.frames {
            frame.preserve();
        }
    }

    /// Drop the cached frames entirely (another thread is stepping).
    pub(crate) fn resumed_discard(&self) {
        *self.state.lock() = ThreadState::Running;
        let mut stack = self.stack.lock();
        for frame in stack.frames.drain(..) {
            frame.dispose();
        }
        stack.has_sentinel = false;
        stack.stale = true;
        stack.depth = 0;
    }

    pub(crate) fn mark_suspended(&self) {
        *self.state.lock() = ThreadState::Suspended;
        self.stack.lock().stale = true;
    }

    pub(crate) fn mark_stepping_failed(&self) {
        *self.state.lock() = ThreadState::Suspended;
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Disposed("thread"));
        }
        Ok(())
    }

    /// Detach from the model: deregister, dispose owned frames, release the
    /// backend handle, then mark disposed.
    pub(crate) fn dispose(&self) {
        let Some(subscription) = self.subscription.lock().take() else {
            return; // already disposed
        };
        self.ctx.dispatcher.deregister(subscription);

        let frames = {
            let mut stack = self.stack.lock();
            stack.has_sentinel = false;
            stack.stale = true;
            stack.depth = 0;
            std::mem::take(&mut stack.frames)
        };
        for frame in frames {
            frame.dispose();
        }

        *self.handle.lock() = None;
        *self.state.lock() = ThreadState::Exited;
        self.disposed.store(true, Ordering::SeqCst);
        debug!(target: "session", "thread (surrogate {}) disposed", self.id);
    }
}

impl EventListener for Thread {
    fn handle_event(&self, event: &Event) {
        if self.is_disposed() {
            return;
        }
        match event {
            Event::Suspended { source, .. } => {
                let mine = match source {
                    EventSource::Target => true,
                    EventSource::Thread(tid) => Some(*tid) == self.handle(),
                    EventSource::Value(_) => false,
                };
                if mine {
                    self.mark_suspended();
                }
            }
            Event::Destroyed(EventSource::Thread(tid)) if Some(*tid) == self.handle() => {
                // the backend handle is gone; the owning session disposes the
                // model object, here only the weak reference is dropped
                *self.handle.lock() = None;
                *self.state.lock() = ThreadState::Exited;
            }
            _ => {}
        }
    }
}
