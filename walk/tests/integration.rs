//! End-to-end scenarios from the spec's testable-properties section,
//! run against the real tracer backends rather than a fake.
//!
//! These need an actual `strace` (and, for compiled-output scenarios,
//! `cc`) on `PATH`; both are assumed present in a normal Linux
//! development environment but not guaranteed in every CI sandbox, so
//! each test is `#[ignore]` and meant to be run explicitly with
//! `cargo test -- --ignored` on a box that has them.

use {
    std::{fs, sync::Arc, time::Duration},
    walk::{CommandRequest, Concurrent, EngineContext, Force, Tracer, run},
    walk_tracer::SyscallTracer,
};

fn tracer() -> SyscallTracer
{
    SyscallTracer::new().expect("strace must be on PATH to run these tests")
}

#[test]
#[ignore = "requires cc and strace on PATH"]
fn basic_skip()
{
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.c"), "int a(){return 1;}").unwrap();

    let tracer = tracer();
    let ctx = EngineContext::new();
    let walk_path = dir.path().join("a.o.walk");
    let request = CommandRequest::new(*b"cc -c -o a.o a.c", &walk_path).with_cwd(dir.path());

    let status = run(&ctx, &tracer, &request).unwrap();
    assert!(status.success());
    assert!(dir.path().join("a.o").is_file());
    assert!(fs::metadata(&walk_path).unwrap().len() > 0);
    let first_mtime = fs::metadata(dir.path().join("a.o")).unwrap().modified().unwrap();

    // Second run: everything the first run recorded is unchanged, so the
    // skip path must take over and `a.o` must not be rewritten.
    let status = run(&ctx, &tracer, &request).unwrap();
    assert!(status.success());
    let second_mtime = fs::metadata(dir.path().join("a.o")).unwrap().modified().unwrap();
    assert_eq!(first_mtime, second_mtime);
}

#[test]
#[ignore = "requires cc and strace on PATH"]
fn edit_triggers_rebuild()
{
    let dir = tempfile::tempdir().unwrap();
    let a_c = dir.path().join("a.c");
    fs::write(&a_c, "int a(){return 1;}").unwrap();

    let tracer = tracer();
    let ctx = EngineContext::new();
    let walk_path = dir.path().join("a.o.walk");
    let request = CommandRequest::new(*b"cc -c -o a.o a.c", &walk_path).with_cwd(dir.path());

    run(&ctx, &tracer, &request).unwrap();
    let first_mtime = fs::metadata(dir.path().join("a.o")).unwrap().modified().unwrap();

    std::thread::sleep(Duration::from_millis(1100));
    fs::write(&a_c, "int a(){return 2;}").unwrap();
    run(&ctx, &tracer, &request).unwrap();
    let second_mtime = fs::metadata(dir.path().join("a.o")).unwrap().modified().unwrap();

    assert_ne!(first_mtime, second_mtime);
}

#[test]
#[ignore = "requires strace on PATH"]
fn failed_read_revival()
{
    let dir = tempfile::tempdir().unwrap();
    let maybe_h = dir.path().join("maybe.h");

    let tracer = tracer();
    let ctx = EngineContext::new();
    let walk_path = dir.path().join("probe.walk");
    let request = CommandRequest::new(*b"[ -f maybe.h ] || true", &walk_path).with_cwd(dir.path());

    let status = run(&ctx, &tracer, &request).unwrap();
    assert!(status.success());

    let recorded = walk_core::WalkFile::load(&walk_path).unwrap().unwrap().unwrap();
    assert!(recorded.entries.iter().any(|e|
        e.path == maybe_h.canonicalize().unwrap_or(maybe_h.clone())
            || e.path.ends_with("maybe.h")
    ));

    fs::write(&maybe_h, "").unwrap();

    // maybe.h now exists, so the recorded failed_read/absent entry must
    // invalidate and force a re-run that records it as present.
    run(&ctx, &tracer, &request).unwrap();
    let recorded_after = walk_core::WalkFile::load(&walk_path).unwrap().unwrap().unwrap();
    assert!(recorded_after.entries.iter().any(|e| e.path.ends_with("maybe.h")
        && e.hash != walk_util::hash::Hash::Absent));
}

#[test]
#[ignore = "requires cc and strace on PATH"]
fn custom_comparator_ignores_optimization_flags()
{
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.c"), "int a(){return 1;}").unwrap();

    let tracer = tracer();
    let ctx = EngineContext::new();
    let walk_path = dir.path().join("a.o.walk");

    let strip_o_flags = |text: &[u8]| -> Vec<u8> {
        String::from_utf8_lossy(text)
            .split_whitespace()
            .filter(|word| !word.starts_with("-O"))
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes()
    };
    let compare: walk_core::request::CommandCompare =
        Arc::new(move |old, new| strip_o_flags(old) == strip_o_flags(new));

    let request = CommandRequest::new(*b"cc -O0 -c -o a.o a.c", &walk_path)
        .with_cwd(dir.path())
        .with_command_compare(compare.clone());
    run(&ctx, &tracer, &request).unwrap();

    let request2 = CommandRequest::new(*b"cc -O2 -c -o a.o a.c", &walk_path)
        .with_cwd(dir.path())
        .with_command_compare(compare);
    let status = run(&ctx, &tracer, &request2).unwrap();
    assert!(status.success());
}

#[test]
#[ignore = "requires strace on PATH"]
fn concurrent_build_produces_every_walk_file()
{
    let dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(EngineContext::new());
    let tracer: Arc<dyn Tracer + Send + Sync> = Arc::new(tracer());
    let pool = Concurrent::new(3, ctx, tracer);

    for i in 0 .. 10 {
        let walk_path = dir.path().join(format!("{i}.walk"));
        let request = CommandRequest::new(*b"true", walk_path).with_cwd(dir.path());
        pool.submit(request);
    }

    let completions = pool.end();
    assert_eq!(completions.len(), 10);
    for i in 0 .. 10 {
        assert!(dir.path().join(format!("{i}.walk")).is_file());
    }
}

#[test]
#[ignore = "requires strace on PATH"]
fn interrupt_replay()
{
    use std::process::{Command, Stdio};

    let dir = tempfile::tempdir().unwrap();
    let walk_path = dir.path().join("probe.walk");

    let mut child = Command::new(env!("CARGO_BIN_EXE_walk"))
        .arg(&walk_path)
        .arg("sleep").arg("2")
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    child.kill().unwrap();
    child.wait().unwrap();

    // Killed between the interrupt-guard truncate and the final persist,
    // so the walk file must be left at the zero-length sentinel.
    assert_eq!(fs::metadata(&walk_path).unwrap().len(), 0);

    let status = Command::new(env!("CARGO_BIN_EXE_walk"))
        .arg(&walk_path)
        .arg("sleep").arg("0")
        .current_dir(dir.path())
        .status()
        .unwrap();
    assert!(status.success());
    assert!(fs::metadata(&walk_path).unwrap().len() > 0);
}

#[test]
fn force_skip_and_force_run_do_not_need_a_real_tracer()
{
    // Force=skip never consults the tracer at all, so this much of the
    // CLI/programmatic surface is safe to test unconditionally.
    let dir = tempfile::tempdir().unwrap();
    let ctx = EngineContext::new();
    struct PanicTracer;
    impl Tracer for PanicTracer
    {
        fn spawn(&self, _command: &[u8], _cwd: &std::path::Path)
            -> Result<(std::process::ExitStatus, walk_util::access::AccessLog), walk_core::EngineError>
        {
            panic!("force=skip must not invoke the tracer")
        }
    }

    let walk_path = dir.path().join("a.walk");
    let request = CommandRequest::new(*b"anything", &walk_path)
        .with_cwd(dir.path())
        .with_force(Force::Skip);

    let status = run(&ctx, &PanicTracer, &request).unwrap();
    assert!(status.success());
    assert!(!walk_path.exists());
}
