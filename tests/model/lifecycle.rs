use crate::common::{
    all_caps, fixture, fixture_full, fixture_with, frame, scalar, tid, Call, HookInfo,
};
use debug_mirror::backend::{BackendError, Capabilities, DescriptorId, RawValue, StepKind};
use debug_mirror::collab::{
    BreakpointAction, BreakpointInfo, BreakpointResolver, Collaborators, ModuleRegistry,
};
use debug_mirror::error::Error;
use debug_mirror::event::{Event, EventSource, ResumeCause, SuspendReason};
use debug_mirror::session::state::SessionState;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[test]
fn launch_reaches_running_then_suspends() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);

    assert_eq!(f.session.state(), SessionState::Created);
    f.dispatcher.publish(&[Event::Created(EventSource::Target)]);
    assert_eq!(f.session.state(), SessionState::Running);

    f.suspend(tid(1), SuspendReason::Breakpoint(7));
    assert_eq!(f.session.state(), SessionState::Suspended);
    assert_eq!(
        f.session.suspend_reason(),
        Some(SuspendReason::Breakpoint(7))
    );

    let threads = f.session.threads().unwrap();
    assert_eq!(threads.len(), 1);
    let current = f.session.current_thread().unwrap().unwrap();
    assert_eq!(current.handle(), Some(tid(1)));
    assert_eq!(
        *f.hook.suspends.lock(),
        vec![SuspendReason::Breakpoint(7)]
    );
}

#[test]
fn rejected_resume_rolls_back() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));

    f.backend.reject("resume");
    let err = f.session.resume().unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Rejected(_))));
    // optimistic `resuming` was rolled back
    assert_eq!(f.session.state(), SessionState::Suspended);

    f.backend.accept("resume");
    f.session.resume().unwrap();
    assert_eq!(f.session.state(), SessionState::Resuming);

    // a second request while the first is in flight is refused
    let err = f.session.resume().unwrap_err();
    assert!(matches!(err, Error::InvalidState { op: "resume", .. }));

    f.resume_event(tid(1), ResumeCause::ClientRequest);
    assert_eq!(f.session.state(), SessionState::Running);
    assert_eq!(*f.hook.resumes.lock(), vec![ResumeCause::ClientRequest]);
}

#[test]
fn notification_settles_transitional_state() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));

    f.session.resume().unwrap();
    assert_eq!(f.session.state(), SessionState::Resuming);

    // the backend stops again before ever reporting the resume
    f.suspend(tid(1), SuspendReason::Signal { name: "SIGSEGV".to_string() });
    assert_eq!(f.session.state(), SessionState::Suspended);
}

#[test]
fn commands_are_refused_in_wrong_states() {
    let f = fixture();
    // nothing is running yet
    assert!(matches!(
        f.session.resume().unwrap_err(),
        Error::InvalidState { op: "resume", .. }
    ));
    assert!(matches!(
        f.session.suspend().unwrap_err(),
        Error::InvalidState { op: "suspend", .. }
    ));
    assert!(matches!(
        f.session.restart().unwrap_err(),
        Error::InvalidState { op: "restart", .. }
    ));
}

#[test]
fn missing_capabilities_surface_as_unsupported() {
    let f = fixture_with(Collaborators::default(), Capabilities::default());
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));

    let err = f.session.disconnect().unwrap_err();
    assert!(err.is_unsupported());
    let err = f.session.restart().unwrap_err();
    assert!(err.is_unsupported());
    // an unsupported command never reaches the backend
    assert_eq!(f.backend.count(|c| matches!(c, Call::Disconnect)), 0);
    assert_eq!(f.backend.count(|c| matches!(c, Call::Restart)), 0);
    assert_eq!(f.session.state(), SessionState::Suspended);
}

#[test]
fn terminate_disposes_the_whole_model() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1), tid(2)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.backend
        .set_stack(tid(2), vec![frame(tid(2), 2, "worker", "worker.c", 5)]);
    f.backend.set_frame_vars(1, vec![scalar(100, "x")]);
    f.backend
        .set_value(DescriptorId(100), RawValue::Scalar("42".to_string()));
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));

    let threads = f.session.threads().unwrap();
    let frames = threads[0].frames().unwrap();
    let vars = frames[0].variables().unwrap();
    let x = vars[0].clone();
    x.value().unwrap();
    assert!(f.dispatcher.listener_count() > 0);

    f.session.terminate().unwrap();
    assert_eq!(f.session.state(), SessionState::Terminating);
    f.dispatcher.publish(&[Event::Destroyed(EventSource::Target)]);

    assert_eq!(f.session.state(), SessionState::Terminated);
    assert!(f.hook.terminated.load(Ordering::SeqCst));
    assert!(f.session.is_disposed());
    assert!(threads.iter().all(|t| t.is_disposed()));
    assert!(frames[0].is_disposed());
    assert!(x.is_disposed());
    // variable handles went back to the backend
    assert!(f.backend.released().contains(&DescriptorId(100)));
    // every listener deregistered itself
    assert_eq!(f.dispatcher.listener_count(), 0);

    // disposed objects fail fast and never touch the backend again
    f.backend.clear_calls();
    assert!(matches!(
        f.session.threads().unwrap_err(),
        Error::Disposed(_)
    ));
    let err = threads[0].frames().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(x.value().unwrap_err(), Error::Disposed(_)));
    assert!(f.backend.calls().is_empty());
}

#[test]
fn rejected_terminate_keeps_the_prior_state() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.dispatcher.publish(&[Event::Created(EventSource::Target)]);
    assert_eq!(f.session.state(), SessionState::Running);

    f.backend.reject("terminate");
    f.backend.reject("disconnect");

    // a rejected kill while the target runs must leave it running
    let err = f.session.terminate().unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Rejected(_))));
    assert_eq!(f.session.state(), SessionState::Running);

    let err = f.session.disconnect().unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Rejected(_))));
    assert_eq!(f.session.state(), SessionState::Running);

    // and a rejected kill at a stop leaves it suspended
    f.suspend(tid(1), SuspendReason::Breakpoint(1));
    f.session.terminate().unwrap_err();
    assert_eq!(f.session.state(), SessionState::Suspended);

    f.backend.accept("terminate");
    f.session.terminate().unwrap();
    assert_eq!(f.session.state(), SessionState::Terminating);
}

#[test]
fn repeated_destroy_notification_is_idempotent() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.backend.set_frame_vars(1, vec![scalar(100, "x")]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));
    let threads = f.session.threads().unwrap();
    threads[0].frames().unwrap()[0].variables().unwrap();

    f.dispatcher.publish(&[Event::Destroyed(EventSource::Target)]);
    let released = f.backend.released().len();

    f.dispatcher.publish(&[Event::Destroyed(EventSource::Target)]);
    assert_eq!(f.backend.released().len(), released);
    assert_eq!(f.session.state(), SessionState::Terminated);
}

#[test]
fn debuggee_exit_is_reported_and_cleans_up() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));
    let threads = f.session.threads().unwrap();

    f.session.resume().unwrap();
    f.resume_event(tid(1), ResumeCause::ClientRequest);
    f.dispatcher.publish(&[Event::Exited { code: 3 }]);

    assert_eq!(f.session.state(), SessionState::Exited);
    assert_eq!(f.session.exit_code(), Some(3));
    assert_eq!(*f.hook.exit_code.lock(), Some(3));
    assert!(f.session.is_disposed());
    assert!(threads[0].is_disposed());
    assert_eq!(f.dispatcher.listener_count(), 0);
}

#[test]
fn disconnect_detaches_without_killing() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));

    f.session.disconnect().unwrap();
    assert_eq!(f.session.state(), SessionState::Disconnecting);
    f.dispatcher.publish(&[Event::Disconnected]);

    assert_eq!(f.session.state(), SessionState::Disconnected);
    assert!(f.hook.disconnected.load(Ordering::SeqCst));
    assert!(f.session.is_disposed());
    assert_eq!(f.backend.count(|c| matches!(c, Call::Terminate)), 0);
}

#[test]
fn restart_rebuilds_the_thread_list() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 10)]);
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));
    let old = f.session.threads().unwrap();

    f.session.restart().unwrap();
    assert_eq!(f.session.state(), SessionState::Restarting);

    f.backend.set_threads(vec![tid(5)]);
    f.backend
        .set_stack(tid(5), vec![frame(tid(5), 50, "main", "main.c", 1)]);
    f.dispatcher.publish(&[Event::Restarted]);

    assert_eq!(f.session.state(), SessionState::Running);
    assert!(old[0].is_disposed());
    let threads = f.session.threads().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].handle(), Some(tid(5)));
    assert_eq!(f.session.exit_code(), None);
}

struct OneBreakpoint;

impl BreakpointResolver for OneBreakpoint {
    fn resolve(&self, id: u32) -> Option<BreakpointInfo> {
        (id == 7).then(|| BreakpointInfo {
            id: 7,
            enabled: true,
            location: "main.c:42".to_string(),
            condition: None,
        })
    }
}

struct TraceAction {
    trace: Arc<Mutex<Vec<String>>>,
}

impl BreakpointAction for TraceAction {
    fn on_hit(&self, breakpoint: &BreakpointInfo) -> anyhow::Result<()> {
        self.trace.lock().push(format!("action:{}", breakpoint.id));
        Ok(())
    }
}

#[test]
fn breakpoint_actions_run_before_the_client_hook() {
    let hook = HookInfo::default();
    let collab = Collaborators {
        breakpoints: Arc::new(OneBreakpoint),
        actions: vec![Arc::new(TraceAction {
            trace: hook.trace.clone(),
        })],
        ..Collaborators::default()
    };
    let f = fixture_full(collab, all_caps(), hook);
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 42)]);

    f.start_suspended(tid(1), SuspendReason::Breakpoint(7));
    assert_eq!(
        *f.hook.trace.lock(),
        vec!["action:7".to_string(), "hook:suspend".to_string()]
    );
}

#[derive(Default)]
struct LoadLog {
    loaded: Mutex<Vec<String>>,
}

impl ModuleRegistry for LoadLog {
    fn on_library_load(&self, name: &str) {
        self.loaded.lock().push(name.to_string());
    }
}

#[test]
fn library_loads_reach_the_module_registry() {
    let registry = Arc::new(LoadLog::default());
    let collab = Collaborators {
        modules: registry.clone(),
        ..Collaborators::default()
    };
    let f = fixture_with(collab, all_caps());
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 1)]);

    f.start_suspended(
        tid(1),
        SuspendReason::SharedLibrary {
            name: "libssl.so".to_string(),
        },
    );
    assert_eq!(*registry.loaded.lock(), vec!["libssl.so".to_string()]);
    // the generic notification still follows
    assert_eq!(f.hook.suspends.lock().len(), 1);
}

#[test]
fn backend_error_stop_marks_the_session_status() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "main.c", 1)]);

    f.start_suspended(
        tid(1),
        SuspendReason::Error {
            message: "cannot read memory at 0x0".to_string(),
        },
    );
    let status = f.session.status();
    assert!(!status.is_ok());
    assert_eq!(status.message.as_deref(), Some("cannot read memory at 0x0"));

    // the status resets on the next resume
    f.session.resume().unwrap();
    f.resume_event(tid(1), ResumeCause::ClientRequest);
    assert!(f.session.status().is_ok());
}

#[test]
fn breakpoint_then_step_then_resume_scenario() {
    let f = fixture();
    f.backend.set_threads(vec![tid(1)]);
    f.backend
        .set_stack(tid(1), vec![frame(tid(1), 1, "main", "app.c", 10)]);
    f.backend.set_frame_vars(1, vec![scalar(100, "x")]);
    f.backend
        .set_value(DescriptorId(100), RawValue::Scalar("1".to_string()));

    // hit a breakpoint in main
    f.start_suspended(tid(1), SuspendReason::Breakpoint(1));
    let thread = f.session.current_thread().unwrap().unwrap();
    let frames = thread.frames().unwrap();
    assert_eq!(frames.len(), 1);
    let vars = frames[0].variables().unwrap();
    let x = vars[0].clone();
    assert_eq!(
        x.value().unwrap(),
        debug_mirror::variable::ValueView::Scalar("1".to_string())
    );

    // step into a helper
    f.session.step(&thread, StepKind::Into).unwrap();
    f.backend.set_stack(
        tid(1),
        vec![
            frame(tid(1), 11, "helper", "app.c", 20),
            frame(tid(1), 12, "main", "app.c", 10),
        ],
    );
    f.backend.set_frame_vars(11, vec![scalar(101, "n")]);
    f.backend.set_frame_vars(12, vec![scalar(100, "x")]);
    f.backend
        .set_value(DescriptorId(101), RawValue::Scalar("5".to_string()));
    f.resume_event(tid(1), ResumeCause::StepInto);
    f.suspend(tid(1), SuspendReason::EndOfStep);

    // main's frame and its variable node kept their identity
    let frames2 = thread.frames().unwrap();
    assert_eq!(frames2.len(), 2);
    assert!(Arc::ptr_eq(&frames2[1], &frames[0]));
    assert_eq!(frames2[1].level(), 1);
    let vars2 = frames2[1].variables().unwrap();
    assert!(Arc::ptr_eq(&vars2[0], &x));

    // the backend reports x changed
    f.backend
        .set_value(DescriptorId(100), RawValue::Scalar("2".to_string()));
    f.dispatcher
        .publish(&[Event::Changed(EventSource::Value(DescriptorId(100)))]);
    assert!(x.is_changed());
    assert_eq!(
        x.value().unwrap(),
        debug_mirror::variable::ValueView::Scalar("2".to_string())
    );

    // plain resume from the current thread preserves its frames too
    f.session.resume().unwrap();
    f.dispatcher.publish(&[Event::Resumed {
        source: EventSource::Target,
        cause: ResumeCause::ClientRequest,
    }]);
    assert!(!x.is_changed());

    f.backend.set_stack(
        tid(1),
        vec![
            frame(tid(1), 21, "helper", "app.c", 20),
            frame(tid(1), 22, "main", "app.c", 10),
        ],
    );
    f.backend.set_frame_vars(21, vec![scalar(101, "n")]);
    f.backend.set_frame_vars(22, vec![scalar(100, "x")]);
    f.suspend(tid(1), SuspendReason::Breakpoint(1));

    let frames3 = thread.frames().unwrap();
    assert!(Arc::ptr_eq(&frames3[1], &frames[0]));
    assert!(Arc::ptr_eq(&frames3[1].variables().unwrap()[0], &x));
}
