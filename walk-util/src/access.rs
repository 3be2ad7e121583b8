//! The normalized set of file accesses observed during one command run.

use {
    crate::path::canonicalize_best_effort,
    std::{collections::BTreeMap, path::{Path, PathBuf}},
};

/// How a path was accessed during a command run.
///
/// `FailedRead` is semantically distinct from simply not appearing in the
/// log: it records that the command *looked* for the path (an open-for-read
/// that returned `ENOENT` or similar) and did not find it. A command that
/// probed for an optional config file must be re-run if that file later
/// appears, even though the probe itself never read any bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessKind
{
    /// The path was opened for reading, and the open succeeded.
    Read,

    /// The path was opened for writing (the open may have created it).
    Write,

    /// The path was both read and written during the command.
    ReadThenWrite,

    /// The path was opened for reading but the open failed
    /// (for example with `ENOENT`).
    FailedRead,
}

impl AccessKind
{
    /// Combine two accesses to the same path into one.
    ///
    /// This is commutative and associative, so repeated accesses can be
    /// folded in any order; see the module-level merge table.
    pub fn merge(self, other: Self) -> Self
    {
        use AccessKind::*;
        match (self, other) {
            (a, b) if a == b => a,

            (Read, Write) | (Write, Read) => ReadThenWrite,

            // A failed read contributes nothing once a real read succeeded.
            (FailedRead, Read) | (Read, FailedRead) => Read,

            // A failed read still counts as "this path was read" once
            // the path is also written, so the combination is the same
            // as an ordinary read-then-write.
            (FailedRead, Write) | (Write, FailedRead) => ReadThenWrite,
            (FailedRead, ReadThenWrite) | (ReadThenWrite, FailedRead) => ReadThenWrite,

            (Read, ReadThenWrite) | (ReadThenWrite, Read) => ReadThenWrite,
            (Write, ReadThenWrite) | (ReadThenWrite, Write) => ReadThenWrite,
        }
    }
}

/// Normalized set of file accesses observed during one command invocation.
///
/// Keys are absolute, canonicalized paths. Order is not significant; the
/// durable per-command record that embeds this log is defined in the
/// `walk-core` crate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessLog
{
    entries: BTreeMap<PathBuf, AccessKind>,
}

impl AccessLog
{
    /// Create an empty access log.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record an access to `path`, merging with any prior access to the
    /// same path recorded in this log.
    pub fn record(&mut self, path: PathBuf, kind: AccessKind)
    {
        self.entries.entry(path)
            .and_modify(|existing| *existing = existing.merge(kind))
            .or_insert(kind);
    }

    /// Drop any recorded access to `path`.
    ///
    /// Used when a path is unlinked mid-command: the pre-unlink history is
    /// discarded, so only a later access to the same path (for example if
    /// it is recreated) is recorded.
    pub fn forget(&mut self, path: &Path)
    {
        self.entries.remove(path);
    }

    /// Whether any access to `path` is recorded.
    pub fn contains(&self, path: &Path) -> bool
    {
        self.entries.contains_key(path)
    }

    /// The number of distinct paths recorded.
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether no accesses are recorded.
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Iterate over the recorded accesses, in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, AccessKind)>
    {
        self.entries.iter().map(|(path, kind)| (path.as_path(), *kind))
    }
}

/// Paths the access log builder drops unconditionally: pseudo
/// filesystems a traced command has no meaningful "content" under.
///
/// Deliberately does *not* include the whole of `$TMPDIR`: commands
/// legitimately read and write there (compilers' scratch files aside,
/// many build steps stage outputs under `/tmp` before the final
/// install), so blanket-excluding it would make the builder silently
/// ignore real inputs and outputs. The engine's own temp-file tree
/// (the tracer backends' scratch files) never reaches the access log
/// builder in the first place — neither backend's child-visible
/// accesses include the paths the engine itself manages (the `strace`
/// output file is written by `strace`, not the traced child; the
/// preload shim's build artifacts are written by `cc`, invoked by the
/// engine, before the traced child ever starts) — so no separate
/// filter is needed for that case.
pub fn default_ignore_roots() -> Vec<PathBuf>
{
    vec![
        PathBuf::from("/dev"),
        PathBuf::from("/proc"),
        PathBuf::from("/sys"),
    ]
}

/// Finish building an access log: canonicalize every recorded path
/// (resolving symlinks and `..`/`.` components), drop anything under
/// `ignore_roots` or equal to `walk_path` itself, and re-fold any paths
/// that now collide (for example two raw paths that are really the same
/// file via a symlink).
///
/// `walk_path` and every entry of `ignore_roots` are themselves
/// canonicalized with [`canonicalize_best_effort`] before comparison, so
/// that a caller passing a relative or symlinked root still excludes the
/// paths a reader would expect.
pub fn normalize(raw: &AccessLog, walk_path: &Path, ignore_roots: &[PathBuf]) -> AccessLog
{
    let walk_path = canonicalize_best_effort(walk_path);
    let ignore_roots: Vec<PathBuf> = ignore_roots.iter()
        .map(|root| canonicalize_best_effort(root))
        .collect();

    let mut out = AccessLog::new();
    for (path, kind) in raw.iter() {
        let canon = canonicalize_best_effort(path);
        if canon == walk_path {
            continue;
        }
        if ignore_roots.iter().any(|root| canon.starts_with(root)) {
            continue;
        }
        out.record(canon, kind);
    }
    out
}

impl FromIterator<(PathBuf, AccessKind)> for AccessLog
{
    fn from_iter<T>(iter: T) -> Self
        where T: IntoIterator<Item = (PathBuf, AccessKind)>
    {
        let mut log = Self::new();
        for (path, kind) in iter {
            log.record(path, kind);
        }
        log
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn merge_is_commutative()
    {
        use AccessKind::*;
        let kinds = [Read, Write, ReadThenWrite, FailedRead];
        for &a in &kinds {
            for &b in &kinds {
                assert_eq!(a.merge(b), b.merge(a));
            }
        }
    }

    #[test]
    fn merge_table()
    {
        use AccessKind::*;
        assert_eq!(Read.merge(Write), ReadThenWrite);
        assert_eq!(FailedRead.merge(Read), Read);
        assert_eq!(FailedRead.merge(Write), ReadThenWrite);
    }

    #[test]
    fn record_folds_repeated_access()
    {
        let mut log = AccessLog::new();
        let path = PathBuf::from("/tmp/a.c");
        log.record(path.clone(), AccessKind::Read);
        log.record(path.clone(), AccessKind::Write);
        assert_eq!(log.iter().next(), Some((path.as_path(), AccessKind::ReadThenWrite)));
    }

    #[test]
    fn forget_drops_prior_history()
    {
        let mut log = AccessLog::new();
        let path = PathBuf::from("/tmp/a.c");
        log.record(path.clone(), AccessKind::Write);
        log.forget(&path);
        assert!(!log.contains(&path));
        log.record(path.clone(), AccessKind::Read);
        assert_eq!(log.iter().next(), Some((path.as_path(), AccessKind::Read)));
    }

    #[test]
    fn normalize_excludes_the_walk_path_itself()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.o.walk");
        let input_path = dir.path().join("a.c");
        std::fs::write(&input_path, b"x").unwrap();

        let mut raw = AccessLog::new();
        raw.record(walk_path.clone(), AccessKind::Read);
        raw.record(input_path.clone(), AccessKind::Read);

        let normalized = normalize(&raw, &walk_path, &[]);
        assert_eq!(normalized.len(), 1);
        assert!(normalized.contains(&input_path.canonicalize().unwrap()));
    }

    #[test]
    fn normalize_excludes_ignore_roots()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.o.walk");
        let ignored = PathBuf::from("/proc/self/status");

        let mut raw = AccessLog::new();
        raw.record(ignored, AccessKind::Read);

        let normalized = normalize(&raw, &walk_path, &default_ignore_roots());
        assert!(normalized.is_empty());
    }

    #[test]
    fn normalize_canonicalizes_nonexistent_paths_consistently()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.o.walk");
        let missing = dir.path().join("missing.h");

        let mut raw = AccessLog::new();
        raw.record(missing.clone(), AccessKind::FailedRead);

        let normalized = normalize(&raw, &walk_path, &[]);
        let expected = dir.path().canonicalize().unwrap().join("missing.h");
        assert_eq!(normalized.iter().next(), Some((expected.as_path(), AccessKind::FailedRead)));
    }
}
