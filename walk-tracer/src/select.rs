//! Picking a tracer backend.

use std::str::FromStr;

/// Which tracer backend to use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method
{
    /// [`crate::SyscallTracer`]: wraps `strace -f`.
    Trace,

    /// [`crate::PreloadTracer`]: injects a native `LD_PRELOAD` shim.
    Preload,
}

impl FromStr for Method
{
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s {
            "trace" => Ok(Self::Trace),
            "preload" => Ok(Self::Preload),
            _ => Err(UnknownMethod(s.to_owned())),
        }
    }
}

/// Returned when `-m`/`--method` names something other than `trace` or
/// `preload`.
#[derive(Debug, thiserror::Error)]
#[error("unknown tracer method {0:?}, expected \"trace\" or \"preload\"")]
pub struct UnknownMethod(String);

/// The tracer backend this platform uses unless overridden.
///
/// Linux defaults to [`Method::Trace`] (a ubiquitous `strace` install);
/// every other platform defaults to [`Method::Preload`], since `strace`
/// is a Linux-specific tool built on `ptrace(2)`'s Linux semantics.
pub fn default_method() -> Method
{
    if cfg!(target_os = "linux") {
        Method::Trace
    } else {
        Method::Preload
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn parses_known_methods()
    {
        assert_eq!("trace".parse::<Method>().unwrap(), Method::Trace);
        assert_eq!("preload".parse::<Method>().unwrap(), Method::Preload);
    }

    #[test]
    fn rejects_unknown_method()
    {
        assert!("ptrace".parse::<Method>().is_err());
    }
}
