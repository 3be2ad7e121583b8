//! The per-command memoization protocol: walk files, requests, and errors.
//!
//! This crate knows nothing about how a command's file accesses are
//! discovered (that's `walk-tracer`) or how commands are scheduled
//! (that's the `walk` crate's worker pool). It only defines the durable
//! record of one command's prior run, and the request shape a caller uses
//! to ask "does this command need to run again?".

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod request;
pub mod walk_file;

pub use self::{
    context::EngineContext,
    error::EngineError,
    request::{CommandRequest, Force},
    walk_file::WalkFile,
};
