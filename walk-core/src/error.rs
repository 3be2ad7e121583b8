//! The engine's error taxonomy.

use std::{io, path::PathBuf};

/// Errors the engine itself raises.
///
/// Notably absent: a "the command failed" variant. A nonzero exit status
/// is not an engine error — it's the normal outcome of running a command,
/// reported as an [`ExitStatus`][std::process::ExitStatus] from
/// [`run`][crate-level docs of the `walk` crate]. Only failures of the
/// memoization machinery itself land here.
///
/// Also absent: "invalid walk file record" and "prior run was
/// interrupted". Both are silently downgraded to "no usable prior
/// record" by the runner rather than surfaced as errors; see
/// [`crate::walk_file::WalkFile::load`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError
{
    /// Reading, writing, or atomically replacing a walk file failed.
    #[error("walk file {path}: {source}")]
    WalkFileIo
    {
        /// Path of the walk file involved.
        path: PathBuf,

        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Hashing a file that participated in the command's access log failed
    /// for a reason other than the file being absent.
    #[error("hashing {path}: {source}")]
    Hash
    {
        /// Path that could not be hashed.
        path: PathBuf,

        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The tracer backend could not observe the command at all: it failed
    /// to start, or its output could not be parsed.
    #[error("tracer failure: {0}")]
    Tracer(#[source] anyhow::Error),

    /// The tracer ran the command but the resulting access log is known to
    /// be incomplete (for example, a traced subprocess exec'd a binary the
    /// tracer could not follow).
    ///
    /// Unlike [`EngineError::Tracer`], the command itself did complete;
    /// this variant exists so callers can choose to treat an incomplete
    /// log as fatal or as a (logged) best-effort result.
    #[error("incomplete access log for command")]
    TracerGap,

    /// Spawning the command's process failed outright (for example, the
    /// executable named in the command text does not exist).
    #[error("spawning command failed: {0}")]
    Spawn(#[source] io::Error),
}
