//! In-memory mirror of a live debug session.
//!
//! The crate keeps a queryable object model (session, threads, stack frames,
//! variable nodes) synchronized with an external debugger backend. Backend
//! notifications flow through the [`dispatch::EventDispatcher`] and update the
//! model incrementally; client queries are served from the model and only
//! fall through to the backend for data that is missing or invalidated.
//!
//! Entry point is [`session::Session::attach`].

pub mod backend;
pub mod collab;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod session;
pub mod settings;
pub mod thread;
pub mod variable;

pub use error::Error;
pub use session::{Session, SessionCtx, SessionHook, SilentHook};
