//! The nine-step command-memoization algorithm.

use {
    log::debug,
    std::{
        collections::HashSet,
        os::unix::process::ExitStatusExt,
        path::{Path, PathBuf},
        process::ExitStatus,
        time::Instant,
    },
    walk_core::{CommandRequest, EngineContext, EngineError, Force, WalkFile, walk_file::WalkFileEntry},
    walk_tracer::Tracer,
    walk_util::{
        hash::{hash_path, Hash},
        path::canonicalize_best_effort,
    },
};

/// A synthetic "success" exit status, used when a command is skipped
/// (force-skipped, or found unchanged) rather than actually run.
fn skipped_status() -> ExitStatus
{
    ExitStatus::from_raw(0)
}

/// Run (or skip) one command, per `request`.
///
/// Returns the command's exit status — or a synthetic success status if
/// the command was skipped — regardless of whether the command
/// succeeded; a nonzero exit status is not an [`EngineError`]. Only
/// failure of the memoization machinery itself (I/O, tracer, hashing)
/// is reported as an error.
pub fn run(
    ctx: &EngineContext,
    tracer: &dyn Tracer,
    request: &CommandRequest,
) -> Result<ExitStatus, EngineError>
{
    let walk_path = request.walk_path();
    let cwd_buf;
    let cwd: &Path = match request.cwd() {
        Some(cwd) => cwd,
        None => {
            cwd_buf = std::env::current_dir().map_err(EngineError::Spawn)?;
            &cwd_buf
        },
    };

    // A context reused across runs (directly, or via Concurrent's shared
    // worker state) must never answer this run's hash lookups with a
    // value cached by an earlier one.
    ctx.clear();

    // Step 1: force check.
    match request.force() {
        Some(Force::Skip) => {
            debug!("{walk_path:?}: force=skip, not running");
            return Ok(skipped_status());
        },
        Some(Force::Run) => {
            debug!("{walk_path:?}: force=run, skipping the up-to-date check");
            return execute(ctx, tracer, request, cwd);
        },
        None => {},
    }

    // Step 2: load prior record. A parse error is silently downgraded to
    // "no usable prior record" rather than surfaced to the caller.
    let prior = match WalkFile::load(walk_path).map_err(|source| EngineError::WalkFileIo {
        path: walk_path.to_owned(),
        source,
    })? {
        Ok(prior) => prior,
        Err(parse_error) => {
            debug!("{walk_path:?}: ignoring unparseable prior record: {parse_error}");
            None
        },
    };

    let Some(prior) = prior else {
        debug!("{walk_path:?}: no prior record, running");
        return execute(ctx, tracer, request, cwd);
    };

    // Step 3: command-text check.
    if !request.command_text_matches(&prior.command_text) {
        debug!("{walk_path:?}: command text changed, running");
        return execute(ctx, tracer, request, cwd);
    }

    // Step 4: hash check. Every recorded path must still hash to what
    // was recorded, including paths recorded absent (failed reads). A
    // path named by `--new`/`with_new_path` is treated as changed
    // regardless of what it currently hashes to.
    let forced_paths = resolve_new_paths(request, cwd);
    let up_to_date = prior.entries.iter().all(|entry| {
        if forced_paths.contains(&entry.path) {
            debug!("{walk_path:?}: {:?} marked new, invalidating", entry.path);
            return false;
        }
        match current_hash(ctx, &entry.path) {
            Ok(hash) => hash == entry.hash,
            Err(_) => false,
        }
    });

    if up_to_date {
        debug!("{walk_path:?}: all recorded paths unchanged, skipping");
        return Ok(skipped_status());
    }

    debug!("{walk_path:?}: a recorded path changed, running");
    execute(ctx, tracer, request, cwd)
}

/// Steps 5-8: the interrupt-guard truncate, the traced execution, the
/// post-run rehash, and the atomic persist.
fn execute(
    ctx: &EngineContext,
    tracer: &dyn Tracer,
    request: &CommandRequest,
    cwd: &Path,
) -> Result<ExitStatus, EngineError>
{
    let walk_path = request.walk_path();

    // Step 5: interrupt guard. A crash between here and the persist at
    // the end leaves the walk file at this same zero-length sentinel.
    WalkFile::truncate(walk_path).map_err(|source| EngineError::WalkFileIo {
        path: walk_path.to_owned(),
        source,
    })?;

    // Step 6: run the command under the tracer.
    let started = Instant::now();
    let (status, raw_access_log) = tracer.spawn(request.command_text(), cwd)?;
    let run_duration = started.elapsed();

    log::info!("{walk_path:?}: command exited with {status}");

    // Canonicalize every touched path and drop anything under an
    // ignored root or equal to the walk path itself.
    let ignore_roots = request.ignore_roots();
    let access_log = walk_util::access::normalize(&raw_access_log, walk_path, &ignore_roots);

    // Step 7: rehash every touched path, invalidating the cache for
    // anything the command wrote before looking its hash up again.
    let mut entries = Vec::with_capacity(access_log.len());
    for (path, kind) in access_log.iter() {
        if matches!(kind, walk_util::access::AccessKind::Write | walk_util::access::AccessKind::ReadThenWrite) {
            ctx.invalidate(path);
        }

        let hash = current_hash(ctx, path).map_err(|source| EngineError::Hash {
            path: path.to_owned(),
            source,
        })?;

        entries.push(WalkFileEntry{ path: path.to_owned(), kind, hash });
    }

    // Step 8: persist atomically, regardless of the command's own exit
    // status — a failed command still touched files, and recording that
    // is what lets a later unchanged re-run be skipped once the caller
    // fixes the underlying problem without touching any input.
    let walk_file = WalkFile{
        command_text: request.command_text().to_vec(),
        entries,
        run_duration,
    };
    walk_file.persist(walk_path).map_err(|source| EngineError::WalkFileIo {
        path: walk_path.to_owned(),
        source,
    })?;

    // Step 9: report the command's own exit status, success or not.
    Ok(status)
}

/// Resolve every path named via `--new`/`with_new_path` into the same
/// absolute, canonicalized form [`WalkFile`] entries are stored in, so
/// they can be compared by equality against `prior.entries`.
fn resolve_new_paths(request: &CommandRequest, cwd: &Path) -> HashSet<PathBuf>
{
    request.new_paths().iter()
        .map(|path| {
            let absolute = if path.is_absolute() { path.clone() } else { cwd.join(path) };
            canonicalize_best_effort(&absolute)
        })
        .collect()
}

fn current_hash(ctx: &EngineContext, path: &Path) -> std::io::Result<Hash>
{
    if let Some(hash) = ctx.cached_hash(path) {
        return Ok(hash);
    }
    let hash = hash_path(path)?;
    ctx.cache_hash(path.to_owned(), hash);
    Ok(hash)
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        std::fs,
        walk_core::CommandRequest,
        walk_util::access::{AccessKind, AccessLog},
    };

    struct FakeTracer<F>(F)
        where F: Fn(&[u8], &Path) -> (ExitStatus, AccessLog);

    impl<F> Tracer for FakeTracer<F>
        where F: Fn(&[u8], &Path) -> (ExitStatus, AccessLog)
    {
        fn spawn(&self, command: &[u8], cwd: &Path) -> Result<(ExitStatus, AccessLog), EngineError>
        {
            Ok((self.0)(command, cwd))
        }
    }

    #[test]
    fn runs_when_no_prior_record_exists()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.walk");
        let ctx = EngineContext::new();

        let tracer = FakeTracer(|_cmd, _cwd| (ExitStatus::from_raw(0), AccessLog::new()));
        let request = CommandRequest::new(*b"true", &walk_path).with_cwd(dir.path());

        let status = run(&ctx, &tracer, &request).unwrap();
        assert!(status.success());
        assert!(walk_path.is_file());
    }

    #[test]
    fn skips_when_nothing_changed()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.walk");
        let input_path = dir.path().join("a.c");
        fs::write(&input_path, b"int a(){return 1;}").unwrap();

        let ctx = EngineContext::new();
        let input_path_for_tracer = input_path.clone();
        let tracer = FakeTracer(move |_cmd, _cwd| {
            let mut log = AccessLog::new();
            log.record(input_path_for_tracer.clone(), AccessKind::Read);
            (ExitStatus::from_raw(0), log)
        });
        let request = CommandRequest::new(*b"cc -c a.c", &walk_path).with_cwd(dir.path());

        run(&ctx, &tracer, &request).unwrap();

        let tracer2 = FakeTracer(|_cmd, _cwd| panic!("should not run again"));
        let status = run(&ctx, &tracer2, &request).unwrap();
        assert!(status.success());
    }

    #[test]
    fn reruns_when_input_content_changes()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.walk");
        let input_path = dir.path().join("a.c");
        fs::write(&input_path, b"int a(){return 1;}").unwrap();

        let ctx = EngineContext::new();
        let input_path_for_tracer = input_path.clone();
        let run_count = std::rc::Rc::new(std::cell::Cell::new(0));
        let run_count_for_tracer = run_count.clone();
        let tracer = FakeTracer(move |_cmd, _cwd| {
            run_count_for_tracer.set(run_count_for_tracer.get() + 1);
            let mut log = AccessLog::new();
            log.record(input_path_for_tracer.clone(), AccessKind::Read);
            (ExitStatus::from_raw(0), log)
        });
        let request = CommandRequest::new(*b"cc -c a.c", &walk_path).with_cwd(dir.path());

        run(&ctx, &tracer, &request).unwrap();
        assert_eq!(run_count.get(), 1);

        fs::write(&input_path, b"int a(){return 2;}").unwrap();
        run(&ctx, &tracer, &request).unwrap();
        assert_eq!(run_count.get(), 2);
    }

    #[test]
    fn new_path_forces_rerun_even_if_unchanged()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.walk");
        let input_path = dir.path().join("a.c");
        fs::write(&input_path, b"int a(){return 1;}").unwrap();

        let ctx = EngineContext::new();
        let input_path_for_tracer = input_path.clone();
        let run_count = std::rc::Rc::new(std::cell::Cell::new(0));
        let run_count_for_tracer = run_count.clone();
        let tracer = FakeTracer(move |_cmd, _cwd| {
            run_count_for_tracer.set(run_count_for_tracer.get() + 1);
            let mut log = AccessLog::new();
            log.record(input_path_for_tracer.clone(), AccessKind::Read);
            (ExitStatus::from_raw(0), log)
        });
        let request = CommandRequest::new(*b"cc -c a.c", &walk_path).with_cwd(dir.path());

        run(&ctx, &tracer, &request).unwrap();
        assert_eq!(run_count.get(), 1);

        // Content is untouched, but the path is marked `--new`: the
        // second run must re-execute anyway.
        let request_with_new = request.with_new_path(&input_path);
        run(&ctx, &tracer, &request_with_new).unwrap();
        assert_eq!(run_count.get(), 2);
    }

    #[test]
    fn force_skip_never_runs()
    {
        let dir = tempfile::tempdir().unwrap();
        let walk_path = dir.path().join("a.walk");
        let ctx = EngineContext::new();
        let tracer = FakeTracer(|_cmd, _cwd| panic!("should not run"));
        let request = CommandRequest::new(*b"true", &walk_path)
            .with_cwd(dir.path())
            .with_force(Force::Skip);

        let status = run(&ctx, &tracer, &request).unwrap();
        assert!(status.success());
        assert!(!walk_path.exists());
    }
}
