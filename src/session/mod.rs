//! Debug target: the root of the model and the sole receiver of the backend
//! event stream.
//!
//! The session owns the thread list and the lifecycle state machine. Client
//! requests set transitional states optimistically and roll back if the
//! backend rejects the command synchronously; backend notifications settle
//! states unconditionally and always win over optimistic state.

pub mod state;

use crate::backend::{Backend, Capabilities, ImageInfo, StepKind, ThreadHandle};
use crate::collab::Collaborators;
use crate::dispatch::{EventDispatcher, EventListener, SubscriptionId};
use crate::error::Error;
use crate::event::{Event, EventSource, ResumeCause, SuspendReason};
use crate::frame::StackFrame;
use crate::session::state::{SessionState, Status};
use crate::settings::PrefsStore;
use crate::thread::{Thread, ThreadState};
use crate::variable::{Variable, VariableKind};
use crate::weak_error;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Client-side notification hook. Fired after the model finished updating
/// itself, so callbacks observe a consistent model. Errors are logged and
/// never propagated into the state machine.
pub trait SessionHook: Send + Sync {
    fn on_suspend(&self, reason: &SuspendReason) -> anyhow::Result<()> {
        let _ = reason;
        Ok(())
    }
    fn on_resume(&self, cause: ResumeCause) -> anyhow::Result<()> {
        let _ = cause;
        Ok(())
    }
    fn on_exit(&self, code: i32) {
        let _ = code;
    }
    fn on_terminate(&self) {}
    fn on_disconnect(&self) {}
}

/// Hook that ignores everything.
pub struct SilentHook;

impl SessionHook for SilentHook {}

/// Shared construction context threaded into every model object.
#[derive(Clone)]
pub struct SessionCtx {
    pub backend: Arc<dyn Backend>,
    pub dispatcher: Arc<EventDispatcher>,
    pub prefs: Arc<PrefsStore>,
}

struct SessionInner {
    state: SessionState,
    status: Status,
    threads: Vec<Arc<Thread>>,
    current: Option<ThreadHandle>,
    /// Thread that initiated the in-flight resume/step request; its frame
    /// cache is preserved when the resumed notification arrives.
    initiator: Option<ThreadHandle>,
    suspend_reason: Option<SuspendReason>,
    exit_code: Option<i32>,
    /// Sub-managers, released on terminate/disconnect.
    collab: Option<Collaborators>,
}

pub struct Session {
    ctx: SessionCtx,
    image: ImageInfo,
    caps: Capabilities,
    hook: Box<dyn SessionHook>,
    inner: Mutex<SessionInner>,
    subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl Session {
    /// Build a session over one backend connection and register it with the
    /// dispatcher. The session stays in [`SessionState::Created`] until the
    /// backend reports the target created.
    pub fn attach(ctx: SessionCtx, collab: Collaborators, hook: Box<dyn SessionHook>) -> Arc<Self> {
        let image = ctx.backend.image();
        let caps = ctx.backend.capabilities();
        let session = Arc::new(Session {
            ctx,
            image,
            caps,
            hook,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                status: Status::ok(),
                threads: vec![],
                current: None,
                initiator: None,
                suspend_reason: None,
                exit_code: None,
                collab: Some(collab),
            }),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        let listener: Arc<dyn EventListener> = session.clone();
        let id = session.ctx.dispatcher.register(Arc::downgrade(&listener));
        *session.subscription.lock() = Some(id);
        info!(
            target: "session",
            "session attached to `{}`", session.image.path.display()
        );
        session
    }

    pub fn image(&self) -> &ImageInfo {
        &self.image
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Persisted view preferences, for export to an external settings store.
    pub fn prefs(&self) -> &Arc<PrefsStore> {
        &self.ctx.prefs
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status.clone()
    }

    /// Reason of the last suspend; cleared on every resume.
    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        self.inner.lock().suspend_reason.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.lock().exit_code
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> Result<Vec<Arc<Thread>>, Error> {
        self.ensure_live()?;
        Ok(self.inner.lock().threads.clone())
    }

    pub fn current_thread(&self) -> Result<Option<Arc<Thread>>, Error> {
        self.ensure_live()?;
        let inner = self.inner.lock();
        let current = inner.current;
        Ok(inner
            .threads
            .iter()
            .find(|t| t.handle() == current)
            .cloned())
    }

    /// Continue the whole target.
    pub fn resume(&self) -> Result<(), Error> {
        self.ensure_live()?;
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Suspended {
                return Err(Error::InvalidState {
                    op: "resume",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Resuming;
            inner.initiator = inner.current;
        }
        debug!(target: "session", "resume requested");
        if let Err(e) = self.ctx.backend.resume() {
            self.rollback(SessionState::Resuming, SessionState::Suspended);
            return Err(e.into());
        }
        Ok(())
    }

    /// Interrupt a running target.
    pub fn suspend(&self) -> Result<(), Error> {
        self.ensure_live()?;
        if !self.caps.can_suspend {
            return Err(Error::Unsupported("suspend"));
        }
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Running {
                return Err(Error::InvalidState {
                    op: "suspend",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Suspending;
        }
        debug!(target: "session", "suspend requested");
        if let Err(e) = self.ctx.backend.interrupt() {
            self.rollback(SessionState::Suspending, SessionState::Running);
            return Err(e.into());
        }
        Ok(())
    }

    /// Step one thread; its frame cache is preserved across the resulting
    /// resume/suspend pair.
    pub fn step(&self, thread: &Arc<Thread>, kind: StepKind) -> Result<(), Error> {
        self.ensure_live()?;
        let tid = thread.handle().ok_or(Error::Disposed("thread"))?;
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Suspended {
                return Err(Error::InvalidState {
                    op: "step",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Resuming;
            inner.initiator = Some(tid);
        }
        debug!(target: "session", "step {kind} requested for thread {tid}");
        if let Err(e) = self.ctx.backend.step(tid, kind) {
            self.rollback(SessionState::Resuming, SessionState::Suspended);
            thread.mark_stepping_failed();
            return Err(e.into());
        }
        Ok(())
    }

    pub fn terminate(&self) -> Result<(), Error> {
        self.ensure_live()?;
        let prior = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() || inner.state == SessionState::Terminating {
                return Err(Error::InvalidState {
                    op: "terminate",
                    state: inner.state,
                });
            }
            let prior = inner.state;
            inner.state = SessionState::Terminating;
            prior
        };
        info!(target: "session", "terminate requested");
        if let Err(e) = self.ctx.backend.terminate() {
            self.rollback(SessionState::Terminating, prior);
            return Err(e.into());
        }
        Ok(())
    }

    /// Detach from the backend leaving the debuggee running.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.ensure_live()?;
        if !self.caps.can_disconnect {
            return Err(Error::Unsupported("disconnect"));
        }
        let prior = {
            let mut inner = self.inner.lock();
            if !inner.state.is_available() {
                return Err(Error::InvalidState {
                    op: "disconnect",
                    state: inner.state,
                });
            }
            let prior = inner.state;
            inner.state = SessionState::Disconnecting;
            prior
        };
        info!(target: "session", "disconnect requested");
        if let Err(e) = self.ctx.backend.disconnect() {
            self.rollback(SessionState::Disconnecting, prior);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn restart(&self) -> Result<(), Error> {
        self.ensure_live()?;
        if !self.caps.can_restart {
            return Err(Error::Unsupported("restart"));
        }
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Suspended {
                return Err(Error::InvalidState {
                    op: "restart",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Restarting;
        }
        info!(target: "session", "restart requested");
        if let Err(e) = self.ctx.backend.restart() {
            self.rollback(SessionState::Restarting, SessionState::Suspended);
            return Err(e.into());
        }
        Ok(())
    }

    /// Register nodes of a frame, resolved through the register sub-manager.
    pub fn register_variables(
        &self,
        frame: &Arc<StackFrame>,
    ) -> Result<Vec<Arc<Variable>>, Error> {
        self.ensure_live()?;
        if !self.caps.can_access_registers {
            return Err(Error::Unsupported("registers"));
        }
        let provider = {
            let inner = self.inner.lock();
            let collab = inner.collab.as_ref().ok_or(Error::Disposed("session"))?;
            collab.registers.clone()
        };
        let handle = frame.handle().ok_or(Error::Disposed("stack frame"))?;
        let descriptors = provider.frame_registers(handle)?;
        Ok(descriptors
            .into_iter()
            .map(|d| {
                Variable::create(
                    self.ctx.clone(),
                    VariableKind::Register,
                    d,
                    frame.function(),
                )
            })
            .collect())
    }

    /// Roll an optimistic transition back, unless a notification settled the
    /// state in the meantime - notifications always win.
    fn rollback(&self, from: SessionState, to: SessionState) {
        let mut inner = self.inner.lock();
        if inner.state == from {
            inner.state = to;
            inner.initiator = None;
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Disposed("session"));
        }
        Ok(())
    }

    // ---------------------------------- event handling -------------------------------------------

    fn on_created(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Created {
            inner.state = SessionState::Running;
        }
        drop(inner);
        self.refresh_threads(ThreadState::Running);
    }

    fn on_suspended(&self, source: EventSource, reason: &SuspendReason) {
        debug!(target: "session", "suspended: {reason:?}");
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Suspended;
            inner.suspend_reason = Some(reason.clone());
            inner.initiator = None;
        }
        self.refresh_threads(ThreadState::Suspended);

        let threads = {
            let mut inner = self.inner.lock();
            if let EventSource::Thread(tid) = source {
                inner.current = Some(tid);
            } else if inner.current.is_none() {
                inner.current = inner.threads.first().and_then(|t| t.handle());
            }
            let current = inner.current;
            for thread in &inner.threads {
                thread.set_current(thread.handle() == current);
            }
            inner.threads.clone()
        };
        // every thread reconciles its frames on the next query
        for thread in &threads {
            thread.mark_suspended();
        }

        self.handle_suspend_reason(reason);
        weak_error!(self.hook.on_suspend(reason).map_err(Error::Hook));
    }

    /// Reason-specific side effects, before the generic client notification.
    fn handle_suspend_reason(&self, reason: &SuspendReason) {
        if let SuspendReason::Error { message } = reason {
            self.inner.lock().status = Status::error(message);
            return;
        }
        let collab = {
            let inner = self.inner.lock();
            match inner.collab.as_ref() {
                Some(collab) => collab.clone(),
                None => return,
            }
        };
        match reason {
            SuspendReason::Breakpoint(id) | SuspendReason::Watchpoint(id) => {
                match collab.breakpoints.resolve(*id) {
                    Some(breakpoint) => {
                        debug!(
                            target: "session",
                            "stopped at breakpoint {} ({})", breakpoint.id, breakpoint.location
                        );
                        for action in &collab.actions {
                            weak_error!(action.on_hit(&breakpoint).map_err(Error::Hook));
                        }
                    }
                    None => warn!(target: "session", "unresolved breakpoint id {id}"),
                }
            }
            SuspendReason::Signal { name } => {
                if !collab.signals.should_report(name) {
                    debug!(target: "session", "signal {name} silenced by policy");
                }
            }
            SuspendReason::SharedLibrary { name } => collab.modules.on_library_load(name),
            SuspendReason::Error { .. } | SuspendReason::EndOfStep => {}
        }
    }

    fn on_resumed(&self, source: EventSource, cause: ResumeCause) {
        debug!(target: "session", "resumed: {cause:?}");
        let (threads, initiator) = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Running;
            inner.suspend_reason = None;
            inner.status = Status::ok();
            let initiator = match source {
                // the thread named by the notification wins over the recorded one
                EventSource::Thread(tid) => Some(tid),
                _ => inner.initiator.take(),
            };
            (inner.threads.clone(), initiator)
        };
        for thread in &threads {
            if thread.handle().is_some() && thread.handle() == initiator {
                thread.resumed_preserve(cause);
            } else {
                thread.resumed_discard();
            }
        }
        weak_error!(self.hook.on_resume(cause).map_err(Error::Hook));
    }

    fn on_thread_created(&self, tid: ThreadHandle) {
        let state = match self.state() {
            SessionState::Suspended => ThreadState::Suspended,
            _ => ThreadState::Running,
        };
        let mut inner = self.inner.lock();
        let known = inner.threads.iter().any(|t| t.handle() == Some(tid));
        if !known {
            inner
                .threads
                .push(Thread::create(self.ctx.clone(), tid, state));
        }
    }

    fn on_thread_destroyed(&self, tid: ThreadHandle) {
        let removed = {
            let mut inner = self.inner.lock();
            let position = inner.threads.iter().position(|t| t.handle() == Some(tid));
            if inner.current == Some(tid) {
                inner.current = None;
            }
            position.map(|i| inner.threads.remove(i))
        };
        if let Some(thread) = removed {
            thread.dispose();
        }
    }

    fn on_exited(&self, code: i32) {
        info!(target: "session", "debuggee exited with code {code}");
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Exited;
            inner.exit_code = Some(code);
            inner.status = Status::ok();
        }
        self.cleanup();
        self.hook.on_exit(code);
    }

    fn on_terminated(&self) {
        info!(target: "session", "session terminated");
        self.inner.lock().state = SessionState::Terminated;
        self.cleanup();
        self.hook.on_terminate();
    }

    fn on_disconnected(&self) {
        info!(target: "session", "session disconnected");
        self.inner.lock().state = SessionState::Disconnected;
        self.cleanup();
        self.hook.on_disconnect();
    }

    fn on_restarted(&self) {
        info!(target: "session", "debuggee restarted");
        let threads = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Running;
            inner.suspend_reason = None;
            inner.status = Status::ok();
            inner.exit_code = None;
            inner.current = None;
            mem::take(&mut inner.threads)
        };
        // the backend reports a fresh thread set after restart
        for thread in threads {
            thread.dispose();
        }
        self.refresh_threads(ThreadState::Running);
    }

    /// Reconcile the thread list against the backend: reuse models for known
    /// handles, create models for new ones, dispose models whose backend
    /// thread vanished without a destroy notification.
    fn refresh_threads(&self, state_of_new: ThreadState) {
        let live = match self.ctx.backend.threads() {
            Ok(live) => live,
            Err(e) => {
                warn!(target: "session", "thread list refresh failed: {e:#}");
                return;
            }
        };
        let stale = {
            let mut inner = self.inner.lock();
            let mut next = Vec::with_capacity(live.len());
            for tid in &live {
                match inner.threads.iter().find(|t| t.handle() == Some(*tid)) {
                    Some(thread) => next.push(thread.clone()),
                    None => next.push(Thread::create(self.ctx.clone(), *tid, state_of_new)),
                }
            }
            let stale: Vec<_> = inner
                .threads
                .iter()
                .filter(|t| !t.handle().map(|h| live.contains(&h)).unwrap_or(false))
                .cloned()
                .collect();
            inner.threads = next;
            stale
        };
        for thread in stale {
            thread.dispose();
        }
    }

    /// Tear the model down in fixed order: deregister from the dispatcher,
    /// dispose owned threads (which cascade to frames and variables), release
    /// the sub-managers, then mark the session disposed. After this every
    /// query fails fast.
    fn cleanup(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            self.ctx.dispatcher.deregister(subscription);
        }
        let threads = {
            let mut inner = self.inner.lock();
            inner.current = None;
            inner.initiator = None;
            mem::take(&mut inner.threads)
        };
        for thread in &threads {
            thread.dispose();
        }
        self.inner.lock().collab = None;
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl EventListener for Session {
    fn handle_event(&self, event: &Event) {
        if self.is_disposed() {
            return;
        }
        match event {
            Event::Created(EventSource::Target) => self.on_created(),
            Event::Created(EventSource::Thread(tid)) => self.on_thread_created(*tid),
            Event::Suspended { source, reason } => self.on_suspended(*source, reason),
            Event::Resumed { source, cause } => self.on_resumed(*source, *cause),
            Event::Destroyed(EventSource::Thread(tid)) => self.on_thread_destroyed(*tid),
            Event::Destroyed(EventSource::Target) => self.on_terminated(),
            Event::Exited { code } => self.on_exited(*code),
            Event::Disconnected => self.on_disconnected(),
            Event::Restarted => self.on_restarted(),
            _ => {}
        }
    }
}
