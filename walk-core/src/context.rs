//! Shared, per-run state: the hash cache.

use {
    std::{collections::HashMap, path::{Path, PathBuf}, sync::Mutex},
    walk_util::hash::Hash,
};

/// State passed by reference into every command run.
///
/// This is deliberately not a process-wide singleton (see the
/// "ambient module state" design note): a caller embedding the engine
/// creates one [`EngineContext`] and passes it by reference to every
/// command it runs or schedules. The only state it currently holds is
/// the hash cache described in the command runner's rehash step, which
/// lets one command's own up-to-date check and rehash share a lookup
/// for any path that appears in both. The runner clears it at the start
/// of every run, since a path read (but not written) by one command can
/// still change on disk before the next — a cache that outlived a
/// single run would stale-read it.
#[derive(Default)]
pub struct EngineContext
{
    hash_cache: Mutex<HashMap<PathBuf, Hash>>,
}

impl EngineContext
{
    /// Create a fresh context with an empty hash cache.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Look up a cached hash for `path`, if one is present.
    pub fn cached_hash(&self, path: &Path) -> Option<Hash>
    {
        self.hash_cache.lock().unwrap_or_else(|e| e.into_inner()).get(path).copied()
    }

    /// Record a freshly computed hash for `path`, replacing any cached
    /// value.
    pub fn cache_hash(&self, path: PathBuf, hash: Hash)
    {
        self.hash_cache.lock().unwrap_or_else(|e| e.into_inner()).insert(path, hash);
    }

    /// Invalidate a cached hash for `path`, forcing the next lookup to
    /// recompute it.
    ///
    /// Called for every path a command wrote to: the content on disk has
    /// changed, so any hash cached from before the command ran is stale.
    pub fn invalidate(&self, path: &Path)
    {
        self.hash_cache.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
    }

    /// Drop every cached hash.
    ///
    /// Called by the runner at the start of each run so that a context
    /// reused across several sequential or concurrent commands never
    /// answers a hash lookup with a value computed before this run
    /// started.
    pub fn clear(&self)
    {
        self.hash_cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
