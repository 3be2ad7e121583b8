//! The command runner and the bounded concurrent worker pool built on
//! top of it.
//!
//! This crate is the library half of the `walk` binary: everything the
//! CLI front-end does is also available to a caller embedding the
//! engine directly.

#![warn(missing_docs)]

pub mod pool;
pub mod runner;

pub use self::{
    pool::{Completion, Concurrent},
    runner::run,
};

pub use walk_core::{CommandRequest, EngineContext, EngineError, Force, WalkFile};
pub use walk_tracer::{Method, PreloadTracer, SyscallTracer, Tracer, default_method};
