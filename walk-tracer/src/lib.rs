//! Discovering which files a command reads and writes.
//!
//! Two backends implement the same [`Tracer`] trait: [`SyscallTracer`]
//! wraps the external `strace` utility, and [`PreloadTracer`] builds and
//! injects a small native shim via `LD_PRELOAD`. Callers pick one
//! explicitly, or use [`default_method`] to get the platform's usual
//! choice.

#![warn(missing_docs)]

pub mod preload;
pub mod select;
pub mod syscall;

pub use self::{
    preload::PreloadTracer,
    select::{Method, UnknownMethod, default_method},
    syscall::SyscallTracer,
};

use {
    std::{path::Path, process::ExitStatus},
    walk_core::EngineError,
    walk_util::access::AccessLog,
};

/// A backend that runs a command and reports which files it touched.
///
/// Implementations differ in how they observe file accesses, but agree
/// on everything else: the command is run to completion, its standard
/// streams are inherited by the caller, and its exit status is reported
/// alongside the normalized access log regardless of whether the command
/// succeeded.
pub trait Tracer
{
    /// Run `command` (a `sh -c`-style shell command line) with working
    /// directory `cwd`, and report its exit status together with every
    /// file it read, wrote, or failed to read.
    fn spawn(&self, command: &[u8], cwd: &Path) -> Result<(ExitStatus, AccessLog), EngineError>;
}
