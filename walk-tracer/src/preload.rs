//! The `LD_PRELOAD`-based tracer backend.
//!
//! This backend works everywhere a C compiler and `dlsym` are
//! available, at the cost of only seeing accesses made through libc's
//! own `open`-family functions (a statically linked, or otherwise
//! libc-bypassing, command is invisible to it). [`crate::SyscallTracer`]
//! is preferred on platforms that have it.

use {
    anyhow::Context,
    log::debug,
    os_ext::pipe2,
    std::{
        ffi::OsStr,
        fs,
        io::{BufReader, Read},
        os::unix::{
            ffi::{OsStrExt, OsStringExt},
            io::{AsRawFd, IntoRawFd, OwnedFd},
            process::CommandExt,
        },
        path::{Path, PathBuf},
        process::{Child, Command, ExitStatus, Stdio},
        sync::OnceLock,
        thread,
    },
    walk_core::EngineError,
    walk_util::access::{AccessKind, AccessLog},
};

/// C source of the shim shared object.
///
/// Interposes the handful of libc entry points the engine needs to see,
/// and writes one fixed-width record per call to the file descriptor
/// named by the `WALK_TRACE_FD` environment variable. The record format
/// is `kind:u8 ok:u8 path_len:u32le path:[u8; path_len]`, where `kind` is
/// `0` for a read-style call and `1` for a write-style call, and `ok` is
/// `1` unless the underlying call failed.
const SHIM_SOURCE: &str = r#"
#define _GNU_SOURCE
#include <dlfcn.h>
#include <fcntl.h>
#include <stdarg.h>
#include <stdint.h>
#include <stdlib.h>
#include <string.h>
#include <unistd.h>

static int trace_fd = -1;

static void ensure_trace_fd(void)
{
    if (trace_fd != -1) return;
    const char *s = getenv("WALK_TRACE_FD");
    trace_fd = s ? atoi(s) : -1;
}

/* Kept well under PIPE_BUF (4096 on Linux) so that the single write(2)
 * below is atomic: concurrent emit() calls from different threads in
 * the traced child never interleave their bytes on the pipe. A path
 * longer than this is truncated rather than risking a write split
 * across two PIPE_BUF-sized chunks. */
#define WALK_EMIT_MAX_PATH 4000

static void emit(uint8_t kind, int ok, const char *path)
{
    ensure_trace_fd();
    if (trace_fd == -1 || path == NULL) return;

    size_t len = strlen(path);
    if (len > WALK_EMIT_MAX_PATH) len = WALK_EMIT_MAX_PATH;

    unsigned char buf[6 + WALK_EMIT_MAX_PATH];
    uint32_t len32 = (uint32_t) len;
    buf[0] = kind;
    buf[1] = ok ? 1 : 0;
    memcpy(buf + 2, &len32, 4);
    memcpy(buf + 6, path, len);

    /* One write(2) call for the whole record: a single write to a pipe
     * of no more than PIPE_BUF bytes is atomic, so this is what
     * actually serializes concurrent emit() calls from different
     * threads, not a lock. */
    write(trace_fd, buf, 6 + len);
}

static int is_write_flags(int flags)
{
    return (flags & O_ACCMODE) != O_RDONLY || (flags & O_CREAT);
}

typedef int (*open_fn)(const char *, int, ...);

int open(const char *path, int flags, ...)
{
    static open_fn real = NULL;
    if (!real) real = (open_fn) dlsym(RTLD_NEXT, "open");
    va_list ap;
    va_start(ap, flags);
    mode_t mode = va_arg(ap, int);
    va_end(ap);
    int fd = real(path, flags, mode);
    emit(is_write_flags(flags) ? 1 : 0, fd != -1, path);
    return fd;
}

int open64(const char *path, int flags, ...)
{
    static open_fn real = NULL;
    if (!real) real = (open_fn) dlsym(RTLD_NEXT, "open64");
    va_list ap;
    va_start(ap, flags);
    mode_t mode = va_arg(ap, int);
    va_end(ap);
    int fd = real(path, flags, mode);
    emit(is_write_flags(flags) ? 1 : 0, fd != -1, path);
    return fd;
}

typedef int (*openat_fn)(int, const char *, int, ...);

int openat(int dirfd, const char *path, int flags, ...)
{
    static openat_fn real = NULL;
    if (!real) real = (openat_fn) dlsym(RTLD_NEXT, "openat");
    va_list ap;
    va_start(ap, flags);
    mode_t mode = va_arg(ap, int);
    va_end(ap);
    int fd = real(dirfd, path, flags, mode);
    emit(is_write_flags(flags) ? 1 : 0, fd != -1, path);
    return fd;
}

typedef int (*openat64_fn)(int, const char *, int, ...);

int openat64(int dirfd, const char *path, int flags, ...)
{
    static openat64_fn real = NULL;
    if (!real) real = (openat64_fn) dlsym(RTLD_NEXT, "openat64");
    va_list ap;
    va_start(ap, flags);
    mode_t mode = va_arg(ap, int);
    va_end(ap);
    int fd = real(dirfd, path, flags, mode);
    emit(is_write_flags(flags) ? 1 : 0, fd != -1, path);
    return fd;
}

typedef void *(*fopen_fn)(const char *, const char *);

void *fopen(const char *path, const char *mode)
{
    static fopen_fn real = NULL;
    if (!real) real = (fopen_fn) dlsym(RTLD_NEXT, "fopen");
    void *f = real(path, mode);
    emit(mode[0] != 'r' ? 1 : 0, f != NULL, path);
    return f;
}

void *fopen64(const char *path, const char *mode)
{
    static fopen_fn real = NULL;
    if (!real) real = (fopen_fn) dlsym(RTLD_NEXT, "fopen64");
    void *f = real(path, mode);
    emit(mode[0] != 'r' ? 1 : 0, f != NULL, path);
    return f;
}

typedef int (*creat_fn)(const char *, mode_t);

int creat(const char *path, mode_t mode)
{
    static creat_fn real = NULL;
    if (!real) real = (creat_fn) dlsym(RTLD_NEXT, "creat");
    int fd = real(path, mode);
    emit(1, fd != -1, path);
    return fd;
}

typedef int (*rename_fn)(const char *, const char *);

int rename(const char *oldpath, const char *newpath)
{
    static rename_fn real = NULL;
    if (!real) real = (rename_fn) dlsym(RTLD_NEXT, "rename");
    int r = real(oldpath, newpath);
    if (r == 0) { emit(2, 1, oldpath); emit(1, 1, newpath); }
    return r;
}

typedef int (*unlink_fn)(const char *);

int unlink(const char *path)
{
    static unlink_fn real = NULL;
    if (!real) real = (unlink_fn) dlsym(RTLD_NEXT, "unlink");
    int r = real(path);
    if (r == 0) emit(2, 1, path);
    return r;
}
"#;

/// Record kinds the shim writes down the pipe; `Forget` has no
/// [`AccessKind`] equivalent and is handled specially by the parser.
const RECORD_READ: u8 = 0;
const RECORD_WRITE: u8 = 1;
const RECORD_FORGET: u8 = 2;

/// A tracer backed by a native `LD_PRELOAD` shim.
///
/// The shim is compiled on first use (via `cc`) and cached on disk,
/// keyed by a hash of its own source, so repeated runs within a process
/// and across processes reuse the same `.so`.
pub struct PreloadTracer
{
    cache_dir: PathBuf,
}

static BUILD_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

impl PreloadTracer
{
    /// Create a tracer that caches its compiled shim under `cache_dir`
    /// (created if it does not exist).
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, EngineError>
    {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "create preload tracer cache directory"
            )))?;
        Ok(Self{ cache_dir })
    }

    /// Build (or reuse a previously built) shim, returning its path.
    fn shim_path(&self) -> Result<PathBuf, EngineError>
    {
        let digest = walk_util::hash::Md5::new().update(SHIM_SOURCE.as_bytes()).finalize();
        let shim_path = self.cache_dir.join(format!("walk-preload-{digest}.so"));

        if shim_path.is_file() {
            debug!("reusing cached preload shim at {shim_path:?}");
            return Ok(shim_path);
        }

        let _guard = BUILD_LOCK.get_or_init(Default::default).lock().unwrap_or_else(|e| e.into_inner());
        if shim_path.is_file() {
            return Ok(shim_path);
        }

        debug!("building preload shim at {shim_path:?}");
        let source_path = self.cache_dir.join(format!("walk-preload-{digest}.c"));
        fs::write(&source_path, SHIM_SOURCE)
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "write preload shim source"
            )))?;

        let tmp_so = self.cache_dir.join(format!("walk-preload-{digest}.so.tmp-{}", std::process::id()));
        let status = Command::new("cc")
            .arg("-shared").arg("-fPIC").arg("-O2")
            .arg("-o").arg(&tmp_so)
            .arg(&source_path)
            .arg("-ldl")
            .status()
            .with_context(|| "spawn cc to build preload tracer shim")
            .map_err(EngineError::Tracer)?;
        if !status.success() {
            return Err(EngineError::Tracer(anyhow::anyhow!(
                "cc exited with {status} while building preload tracer shim"
            )));
        }

        fs::rename(&tmp_so, &shim_path)
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "install built preload tracer shim"
            )))?;

        Ok(shim_path)
    }
}

impl crate::Tracer for PreloadTracer
{
    fn spawn(&self, command: &[u8], cwd: &Path) -> Result<(ExitStatus, AccessLog), EngineError>
    {
        let shim_path = self.shim_path()?;

        let (read_end, write_end) = pipe2(0)
            .map_err(|err| EngineError::Tracer(anyhow::Error::from(err).context(
                "create pipe for preload tracer"
            )))?;

        let write_fd = write_end.into_raw_fd();
        // Closes write_fd if we return early (e.g. the spawn below fails).
        // On the success path it's forgotten in favor of the explicit
        // close right after spawn, which must happen before that close.
        let close_on_early_return = scope_exit::ScopeExit::new(move || {
            unsafe { libc::close(write_fd); }
        });

        let spawn_result = unsafe {
            Command::new("sh")
                .arg("-c").arg(OsStr::from_bytes(command))
                .current_dir(cwd)
                .env("LD_PRELOAD", &shim_path)
                .env("WALK_TRACE_FD", write_fd.to_string())
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .pre_exec(move || {
                    clear_cloexec(write_fd);
                    Ok(())
                })
                .spawn()
        };
        std::mem::forget(close_on_early_return);
        let mut child: Child = spawn_result.map_err(|err| {
            unsafe { libc::close(write_fd); }
            EngineError::Spawn(err)
        })?;

        // Close our copy of the write end so the background reader sees
        // EOF once the (possibly multi-process) command tree exits.
        unsafe { libc::close(write_fd); }

        let reader_handle = thread::spawn(move || read_records(read_end));

        let status = child.wait().map_err(EngineError::Spawn)?;
        let log = reader_handle.join()
            .map_err(|_| EngineError::Tracer(anyhow::anyhow!("preload tracer reader thread panicked")))?
            .map_err(EngineError::Tracer)?;

        Ok((status, log))
    }
}

fn clear_cloexec(fd: libc::c_int)
{
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
    }
}

fn read_records(read_end: OwnedFd) -> anyhow::Result<AccessLog>
{
    let mut log = AccessLog::new();
    let mut reader = BufReader::new(fs::File::from(read_end));

    loop {
        let mut header = [0u8; 6];
        match reader.read_exact(&mut header) {
            Ok(()) => {},
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }

        let kind = header[0];
        let ok = header[1] != 0;
        let len = u32::from_le_bytes(header[2 .. 6].try_into().unwrap()) as usize;

        let mut path_bytes = vec![0u8; len];
        reader.read_exact(&mut path_bytes)?;
        let path = PathBuf::from(std::ffi::OsString::from_vec(path_bytes));

        match kind {
            RECORD_READ if ok => log.record(path, AccessKind::Read),
            RECORD_READ => log.record(path, AccessKind::FailedRead),
            RECORD_WRITE => log.record(path, AccessKind::Write),
            RECORD_FORGET => log.forget(&path),
            _ => {},
        }
    }

    Ok(log)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn record_round_trip_through_pipe()
    {
        let (read_end, write_end) = pipe2(0).unwrap();
        let write_fd = write_end.as_raw_fd();

        let path = b"/tmp/a.c";
        let mut buf = vec![RECORD_READ, 1];
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buf.extend_from_slice(path);
        unsafe { libc::write(write_fd, buf.as_ptr().cast(), buf.len()); }
        drop(write_end);

        let log = read_records(read_end).unwrap();
        assert_eq!(log.iter().next(), Some((Path::new("/tmp/a.c"), AccessKind::Read)));
    }
}
