//! The `strace`-based tracer backend.

use {
    log::debug,
    regex::Regex,
    std::{
        collections::HashMap,
        ffi::OsStr,
        fs,
        os::unix::ffi::OsStrExt,
        path::{Path, PathBuf},
        process::{Command, ExitStatus, Stdio},
        sync::OnceLock,
    },
    walk_core::EngineError,
    walk_util::access::{AccessKind, AccessLog},
};

/// Syscalls whose arguments the tracer needs to see.
const TRACED_SYSCALLS: &str =
    "%file,chdir,fchdir,rename,renameat,renameat2,unlink,unlinkat,execve";

/// A tracer backed by the external `strace` utility.
///
/// Spawns the command under `strace -f`, captures its trace output to a
/// scratch file (rather than interleaving it with the command's own
/// stderr), and parses that file into an [`AccessLog`] once the command
/// exits. Only available where an `strace` binary can be found on
/// `PATH`; Linux-only, since `strace` is built on Linux's `ptrace(2)`.
pub struct SyscallTracer
{
    strace_path: PathBuf,
}

impl SyscallTracer
{
    /// Look for an `strace` binary on `PATH`.
    pub fn new() -> Result<Self, EngineError>
    {
        let strace_path = which("strace")
            .ok_or_else(|| EngineError::Tracer(anyhow::anyhow!(
                "strace not found on PATH; pass -m preload to use the \
                 LD_PRELOAD tracer instead"
            )))?;
        Ok(Self{ strace_path })
    }
}

impl crate::Tracer for SyscallTracer
{
    fn spawn(&self, command: &[u8], cwd: &Path) -> Result<(ExitStatus, AccessLog), EngineError>
    {
        debug!("tracing under strace: {:?}", self.strace_path);

        let trace_file = tempfile::NamedTempFile::new()
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "create scratch file for strace output"
            )))?;

        let status = Command::new(&self.strace_path)
            .arg("-f")
            .arg("-y")
            .arg("-s").arg("4096")
            .arg("-e").arg(format!("trace={TRACED_SYSCALLS}"))
            .arg("-o").arg(trace_file.path())
            .arg("--")
            .arg("sh").arg("-c")
            .arg(OsStr::from_bytes(command))
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(EngineError::Spawn)?;

        let trace_output = fs::read_to_string(trace_file.path())
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "read strace output"
            )))?;

        let log = parse_strace_output(&trace_output, cwd)
            .map_err(EngineError::Tracer)?;

        Ok((status, log))
    }
}

fn which(name: &str) -> Option<PathBuf>
{
    std::env::var_os("PATH")?
        .to_str()?
        .split(':')
        .map(|dir| Path::new(dir).join(name))
        .find(|path| path.is_file())
}

fn line_regex() -> &'static Regex
{
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(concat!(
        r#"^(?P<pid>\d+)\s+"#,
        r#"(?P<call>[A-Za-z0-9_]+)\((?P<args>.*)\)\s*=\s*"#,
        r#"(?P<ret>-?\d+)(?P<annot>.*)$"#,
    )).expect("static regex is valid"))
}

fn quoted_strings(args: &str) -> Vec<String>
{
    // Strace quotes string arguments in double quotes and escapes
    // embedded quotes/backslashes with a leading backslash.
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());
    re.captures_iter(args)
        .map(|cap| cap[1].replace(r#"\""#, "\"").replace(r#"\\"#, "\\"))
        .collect()
}

/// Parse one `strace -f -y` trace file into a normalized access log.
///
/// `root_cwd` is the working directory the top-level command was
/// launched in; it seeds the per-pid working-directory table that
/// resolves relative paths as `chdir`/`fchdir` calls are observed.
fn parse_strace_output(trace: &str, root_cwd: &Path) -> anyhow::Result<AccessLog>
{
    let mut log = AccessLog::new();
    let mut cwd_by_pid: HashMap<u64, PathBuf> = HashMap::new();
    let re = line_regex();

    for line in trace.lines() {
        let Some(caps) = re.captures(line) else { continue };

        let pid: u64 = caps["pid"].parse()?;
        let call = &caps["call"];
        let args = &caps["args"];
        let ret: i64 = caps["ret"].parse()?;
        let annot = &caps["annot"];

        let cwd = cwd_by_pid.entry(pid).or_insert_with(|| root_cwd.to_path_buf()).clone();

        match call {
            "open" | "openat" | "creat" => {
                let strings = quoted_strings(args);
                let Some(raw_path) = strings.last() else { continue };
                let path = resolve(&cwd, raw_path);

                if ret >= 0 {
                    // The -y annotation on success looks like
                    // "3</resolved/absolute/path>"; prefer it when present
                    // since it reflects the kernel's own resolution.
                    let path = extract_annotated_path(annot).unwrap_or(path);
                    let write = call == "creat" || args.contains("O_WRONLY")
                        || args.contains("O_RDWR") || args.contains("O_CREAT");
                    log.record(path, if write { AccessKind::Write } else { AccessKind::Read });
                } else {
                    log.record(path, AccessKind::FailedRead);
                }
            },

            "chdir" => {
                if ret == 0 {
                    if let Some(raw_path) = quoted_strings(args).first() {
                        cwd_by_pid.insert(pid, resolve(&cwd, raw_path));
                    }
                }
            },

            "fchdir" => {
                if ret == 0 {
                    if let Some(path) = extract_annotated_path(annot) {
                        cwd_by_pid.insert(pid, path);
                    }
                }
            },

            "rename" | "renameat" | "renameat2" => {
                if ret == 0 {
                    let strings = quoted_strings(args);
                    if let [old, new] = strings.as_slice() {
                        let old_path = resolve(&cwd, old);
                        let new_path = resolve(&cwd, new);
                        log.forget(&old_path);
                        log.record(new_path, AccessKind::Write);
                    }
                }
            },

            "unlink" | "unlinkat" => {
                if ret == 0 {
                    if let Some(raw_path) = quoted_strings(args).first() {
                        log.forget(&resolve(&cwd, raw_path));
                    }
                }
            },

            _ => {},
        }
    }

    Ok(log)
}

fn resolve(cwd: &Path, raw: &str) -> PathBuf
{
    let path = Path::new(raw);
    if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) }
}

/// Extract the path out of an `-y` annotation like `3</some/path>`.
fn extract_annotated_path(annot: &str) -> Option<PathBuf>
{
    let start = annot.find('<')?;
    let end = annot[start ..].find('>')? + start;
    let inner = &annot[start + 1 .. end];
    inner.strip_prefix("anon_inode:").is_none().then(|| PathBuf::from(inner))
}
