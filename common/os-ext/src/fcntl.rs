use {
    crate::retry_on_eintr,
    std::{
        ffi::CString,
        io,
        os::unix::{
            ffi::OsStrExt,
            io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
        },
        path::Path,
    },
};

/// Equivalent to [`openat`] with [`None`] passed for `dirfd`.
pub fn open(pathname: impl AsRef<Path>, flags: libc::c_int, mode: libc::mode_t)
    -> io::Result<OwnedFd>
{
    openat(None, pathname, flags, mode)
}

/// Call openat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
pub fn openat(
    dirfd:    Option<BorrowedFd>,
    pathname: impl AsRef<Path>,
    flags:    libc::c_int,
    mode:     libc::mode_t,
) -> io::Result<OwnedFd>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);
    let pathname = CString::new(pathname.as_ref().as_os_str().as_bytes())?;
    let flags = flags | libc::O_CLOEXEC;

    retry_on_eintr(|| {
        // SAFETY: path is NUL-terminated.
        let fd = unsafe { libc::openat(dirfd, pathname.as_ptr(), flags, mode) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    })
}

/// Call pipe2(2), returning the read and write ends of the pipe.
///
/// `flags` is passed through; `O_CLOEXEC` is added implicitly.
pub fn pipe2(flags: libc::c_int) -> io::Result<(OwnedFd, OwnedFd)>
{
    let mut fds = [0 as libc::c_int; 2];
    let flags = flags | libc::O_CLOEXEC;

    // SAFETY: fds is a valid pointer to two ints.
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), flags) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe2(2) returned two new, open file descriptors.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}
