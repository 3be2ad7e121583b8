//! Command-line front-end for the `walk` command-memoizing engine.

use {
    anyhow::Context,
    clap::Parser,
    std::{path::PathBuf, process::ExitCode},
    walk::{CommandRequest, EngineContext, Force, Method, PreloadTracer, SyscallTracer, Tracer, default_method},
};

/// Run a shell command only if its inputs have changed since last time.
///
/// Positional arguments are `<walk-path> <command...>`, matching the
/// invocation grammar `walk <flags> <walk-path> <command...>`: every
/// word after the walk path is joined with single spaces and run as one
/// `sh -c` command line.
#[derive(Parser)]
#[command(version, about)]
struct Cli
{
    /// Where to keep the record of this command's prior run.
    ///
    /// Required unless one of the diagnostic flags below is given instead.
    #[arg(required_unless_present_any = [
        "doctest", "test", "test_abc", "test_profile", "time_load_all",
    ])]
    walk_path: Option<PathBuf>,

    /// The shell command to run, exactly as `sh -c` would receive it.
    /// Every word after `walk-path` belongs to the command; quote it as
    /// one shell argument to preserve internal spacing exactly.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Working directory to run the command in.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Treat `<path>` as if it were newly modified, forcing invalidation
    /// of any prior record that references it. May be repeated.
    #[arg(long = "new")]
    new_paths: Vec<PathBuf>,

    /// Force the run/skip decision: 0 to force a skip, 1 to force a run.
    #[arg(short = 'f', value_parser = parse_force)]
    force: Option<Force>,

    /// Which tracer backend to use; defaults to the platform's usual
    /// choice (`trace` on Linux, `preload` elsewhere).
    #[arg(short = 'm', long, value_parser = parse_method)]
    method: Option<Method>,

    /// Run the crate's doctests and exit.
    #[arg(long)]
    doctest: bool,

    /// Run the crate's self-tests and exit.
    #[arg(long)]
    test: bool,

    /// Run the access-log merge-table self-test and exit.
    #[arg(long)]
    test_abc: bool,

    /// Measure how long it takes to parse a single walk file, then exit.
    #[arg(long, value_name = "WALK")]
    test_profile: Option<PathBuf>,

    /// Recursively measure how long parsing every walk file under
    /// `<ROOT>` takes, then exit.
    #[arg(long, value_name = "ROOT")]
    time_load_all: Option<PathBuf>,
}

fn parse_force(s: &str) -> Result<Force, String>
{
    match s {
        "0" => Ok(Force::Skip),
        "1" => Ok(Force::Run),
        _ => Err(format!("expected 0 or 1, got {s:?}")),
    }
}

fn parse_method(s: &str) -> Result<Method, String>
{
    s.parse().map_err(|e: walk_tracer::UnknownMethod| e.to_string())
}

fn main() -> ExitCode
{
    env_logger::init();
    let cli = Cli::parse();

    if cli.doctest {
        self_test::doctest();
        return ExitCode::SUCCESS;
    }
    if cli.test {
        self_test::test();
        return ExitCode::SUCCESS;
    }
    if cli.test_abc {
        self_test::test_abc();
        return ExitCode::SUCCESS;
    }
    if let Some(walk_path) = &cli.test_profile {
        self_test::test_profile(walk_path);
        return ExitCode::SUCCESS;
    }
    if let Some(root) = &cli.time_load_all {
        self_test::time_load_all(root);
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(status) => {
            #[allow(clippy::unnecessary_cast)]
            match status.code() {
                Some(code) => ExitCode::from(code as u8),
                None => ExitCode::FAILURE,
            }
        },
        Err(err) => {
            eprintln!("walk: {err:#}");
            // A distinct code from any ordinary command exit status, so
            // an engine-internal failure (spec.md §6/§4.7) is never
            // mistaken for the command itself having exited 125.
            ExitCode::from(125)
        },
    }
}

fn run(cli: &Cli) -> anyhow::Result<std::process::ExitStatus>
{
    let method = cli.method.unwrap_or_else(default_method);
    let tracer: Box<dyn Tracer> = match method {
        Method::Trace => Box::new(SyscallTracer::new().with_context(|| "initialize strace tracer")?),
        Method::Preload => {
            let cache_dir = std::env::temp_dir().join("walk-preload-cache");
            Box::new(PreloadTracer::new(cache_dir).with_context(|| "initialize preload tracer")?)
        },
    };

    if cli.command.is_empty() {
        anyhow::bail!("no command given");
    }
    let walk_path = cli.walk_path.as_ref().expect("clap requires walk_path unless a diagnostic flag is given");

    let command_text = cli.command.join(" ");
    let mut request = CommandRequest::new(command_text.into_bytes(), walk_path);
    if let Some(cwd) = &cli.cwd {
        request = request.with_cwd(cwd.clone());
    }
    if let Some(force) = cli.force {
        request = request.with_force(force);
    }
    for path in &cli.new_paths {
        request = request.with_new_path(path.clone());
    }

    let ctx = EngineContext::new();
    walk::run(&ctx, &*tracer, &request).with_context(|| "run command")
}

/// In-process self-test functions dispatched by the CLI's diagnostic
/// flags. These mirror a developer's quick sanity checks rather than
/// the crate's proper test suite, which lives in the `#[cfg(test)]`
/// modules throughout this workspace.
mod self_test
{
    use {
        std::time::Instant,
        walk_core::WalkFile,
        walk_util::access::{AccessKind, AccessLog},
    };

    pub fn doctest()
    {
        println!("running doctest-style sanity checks");
        let mut log = AccessLog::new();
        log.record(std::path::PathBuf::from("/tmp/a.c"), AccessKind::Read);
        log.record(std::path::PathBuf::from("/tmp/a.c"), AccessKind::Write);
        assert_eq!(log.iter().next().unwrap().1, AccessKind::ReadThenWrite);
        println!("ok");
    }

    pub fn test()
    {
        println!("running self-tests");
        test_abc();
        println!("ok");
    }

    pub fn test_abc()
    {
        use AccessKind::*;
        assert_eq!(Read.merge(Write), ReadThenWrite);
        assert_eq!(FailedRead.merge(Read), Read);
        assert_eq!(FailedRead.merge(Write), ReadThenWrite);
        println!("access kind merge table: ok");
    }

    pub fn test_profile(walk_path: &std::path::Path)
    {
        let started = Instant::now();
        let _ = WalkFile::load(walk_path);
        println!("loading {walk_path:?} took {:?}", started.elapsed());
    }

    pub fn time_load_all(root: &std::path::Path)
    {
        let started = Instant::now();
        let mut count = 0;
        for entry in walkdir(root) {
            if entry.extension().is_some_and(|ext| ext == "walk") {
                let _ = WalkFile::load(&entry);
                count += 1;
            }
        }
        println!("loaded {count} walk files under {root:?} in {:?}", started.elapsed());
    }

    fn walkdir(root: &std::path::Path) -> Vec<std::path::PathBuf>
    {
        fn walk(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>)
        {
            let Ok(entries) = std::fs::read_dir(dir) else { return };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut out = Vec::new();
        walk(root, &mut out);
        out
    }
}
