//! Requests to run (or skip) a single command.

use std::{path::PathBuf, sync::Arc};

/// How the force flag overrides the normal run/skip decision.
///
/// Corresponds to the `-f` CLI flag and the `force` option of `system()`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Force
{
    /// Never run the command; report success as if it had been skipped.
    Skip,

    /// Always run the command, regardless of what the walk file says.
    Run,
}

/// A comparator used in place of byte equality when checking whether the
/// command text has changed since the prior run.
///
/// Intended use: ignoring changes to flags that don't affect the output,
/// such as compiler warning flags. The comparator must be pure: it must
/// not perform I/O and must return the same answer for the same inputs
/// every time it is called.
pub type CommandCompare = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

/// In-memory value describing one command to run (or skip).
///
/// Immutable after it is built; this is what's carried through the
/// [`Concurrent`][crate-level docs of the `walk` crate] worker pool.
#[derive(Clone)]
pub struct CommandRequest
{
    /// Verbatim bytes of the command the caller supplied.
    ///
    /// This is exactly what's persisted as `command_text` in the walk
    /// file (see [`WalkFile`][`crate::WalkFile`]); it is never
    /// normalized or re-quoted.
    command_text: Vec<u8>,

    /// Filesystem location of the walk file for this command.
    walk_path: PathBuf,

    /// Optional replacement for byte-equality when comparing command text.
    command_compare: Option<CommandCompare>,

    /// Optional force override of the run/skip decision.
    force: Option<Force>,

    /// Optional human-readable tag, surfaced in logs and error messages.
    description: Option<String>,

    /// Working directory to run the command in; the process's own
    /// current directory if unset.
    cwd: Option<PathBuf>,

    /// Paths to treat as though they were just modified, forcing
    /// invalidation of any prior record that references them even if
    /// their content hash still matches. Corresponds to the CLI's
    /// repeatable `--new <path>` flag.
    new_paths: Vec<PathBuf>,

    /// Extra roots the access log builder should drop, on top of the
    /// engine's built-in ignore set
    /// ([`default_ignore_roots`][walk_util::access::default_ignore_roots]).
    extra_ignore_roots: Vec<PathBuf>,
}

impl CommandRequest
{
    /// Start building a request for the given command text and walk path.
    pub fn new(command_text: impl Into<Vec<u8>>, walk_path: impl Into<PathBuf>) -> Self
    {
        Self{
            command_text: command_text.into(),
            walk_path: walk_path.into(),
            command_compare: None,
            force: None,
            description: None,
            cwd: None,
            new_paths: Vec::new(),
            extra_ignore_roots: Vec::new(),
        }
    }

    /// Set the working directory the command runs in.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self
    {
        self.cwd = Some(cwd.into());
        self
    }

    /// The working directory, if one was set.
    pub fn cwd(&self) -> Option<&std::path::Path>
    {
        self.cwd.as_deref()
    }

    /// Set a custom comparator for the command-text check.
    pub fn with_command_compare(mut self, compare: CommandCompare) -> Self
    {
        self.command_compare = Some(compare);
        self
    }

    /// Set the force override.
    pub fn with_force(mut self, force: Force) -> Self
    {
        self.force = Some(force);
        self
    }

    /// Set a human-readable description for diagnostics.
    pub fn with_description(mut self, description: impl Into<String>) -> Self
    {
        self.description = Some(description.into());
        self
    }

    /// Mark `path` as though it were just modified: any prior record
    /// entry naming it is invalidated at the next run regardless of
    /// whether its content hash still matches. May be called repeatedly
    /// to mark more than one path.
    pub fn with_new_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.new_paths.push(path.into());
        self
    }

    /// Paths marked via [`with_new_path`][Self::with_new_path].
    pub fn new_paths(&self) -> &[PathBuf]
    {
        &self.new_paths
    }

    /// Add a root the access log builder should exclude, on top of the
    /// engine's built-in ignore set. May be called repeatedly.
    pub fn with_ignore_root(mut self, root: impl Into<PathBuf>) -> Self
    {
        self.extra_ignore_roots.push(root.into());
        self
    }

    /// The full set of roots the access log builder should exclude for
    /// this request: the engine's built-in defaults plus any added via
    /// [`with_ignore_root`][Self::with_ignore_root].
    pub fn ignore_roots(&self) -> Vec<PathBuf>
    {
        let mut roots = walk_util::access::default_ignore_roots();
        roots.extend(self.extra_ignore_roots.iter().cloned());
        roots
    }

    /// The command text, verbatim.
    pub fn command_text(&self) -> &[u8]
    {
        &self.command_text
    }

    /// The walk file path.
    pub fn walk_path(&self) -> &std::path::Path
    {
        &self.walk_path
    }

    /// The force override, if any.
    pub fn force(&self) -> Option<Force>
    {
        self.force
    }

    /// The human-readable description, if any.
    pub fn description(&self) -> Option<&str>
    {
        self.description.as_deref()
    }

    /// Compare this request's command text against a previously recorded
    /// one, using the custom comparator if one was supplied.
    pub fn command_text_matches(&self, prior: &[u8]) -> bool
    {
        match &self.command_compare {
            Some(compare) => compare(prior, &self.command_text),
            None => prior == self.command_text.as_slice(),
        }
    }
}

impl std::fmt::Debug for CommandRequest
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        f.debug_struct("CommandRequest")
            .field("command_text", &String::from_utf8_lossy(&self.command_text))
            .field("walk_path", &self.walk_path)
            .field("force", &self.force)
            .field("description", &self.description)
            .field("cwd", &self.cwd)
            .field("new_paths", &self.new_paths)
            .field("extra_ignore_roots", &self.extra_ignore_roots)
            .field("command_compare", &self.command_compare.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn byte_equality_by_default()
    {
        let req = CommandRequest::new(*b"cc -c a.c", "/tmp/a.o.walk");
        assert!(req.command_text_matches(b"cc -c a.c"));
        assert!(!req.command_text_matches(b"cc -O2 -c a.c"));
    }

    #[test]
    fn new_paths_accumulate_in_call_order()
    {
        let req = CommandRequest::new(*b"cc -c a.c", "/tmp/a.o.walk")
            .with_new_path("/tmp/a.c")
            .with_new_path("/tmp/b.c");
        assert_eq!(req.new_paths(), [PathBuf::from("/tmp/a.c"), PathBuf::from("/tmp/b.c")]);
    }

    #[test]
    fn ignore_roots_include_builtin_defaults()
    {
        let req = CommandRequest::new(*b"true", "/tmp/a.walk")
            .with_ignore_root("/opt/sandbox");
        let roots = req.ignore_roots();
        assert!(roots.contains(&PathBuf::from("/proc")));
        assert!(roots.contains(&PathBuf::from("/opt/sandbox")));
    }

    #[test]
    fn custom_comparator_overrides_byte_equality()
    {
        // Ignore anything that looks like an -O flag.
        let strip_o_flags = |text: &[u8]| -> Vec<u8> {
            String::from_utf8_lossy(text)
                .split_whitespace()
                .filter(|word| !word.starts_with("-O"))
                .collect::<Vec<_>>()
                .join(" ")
                .into_bytes()
        };
        let compare: CommandCompare = Arc::new(move |old, new| {
            strip_o_flags(old) == strip_o_flags(new)
        });

        let req = CommandRequest::new(*b"cc -O2 -c -o a.o a.c", "/tmp/a.o.walk")
            .with_command_compare(compare);
        assert!(req.command_text_matches(b"cc -O0 -c -o a.o a.c"));
        assert!(!req.command_text_matches(b"cc -O0 -c -o b.o a.c"));
    }
}
