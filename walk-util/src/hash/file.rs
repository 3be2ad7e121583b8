use {
    super::{Hash, Md5},
    os_ext::{O_RDONLY, S_IFMT, S_IFREG, fstatat, openat},
    std::{
        fs::File,
        io::{self, Read},
        os::unix::io::BorrowedFd,
        path::Path,
    },
};

/// Hash a file at a given path, relative to an optional directory.
///
/// If `dirfd` is [`None`], `path` is resolved relative to the current
/// working directory, as for the underlying `*at` system calls.
///
/// Returns [`Hash::Absent`] if the path does not exist, is a directory, or
/// is any file type other than a regular file. Any other I/O error (for
/// example a permission error) is propagated.
///
/// Symbolic links are followed, matching the behavior of a plain `open(2)`
/// a traced command would have performed to read the file.
pub fn hash_file_at(dirfd: Option<BorrowedFd>, path: impl AsRef<Path>)
    -> io::Result<Hash>
{
    let path = path.as_ref();

    let statbuf = match fstatat(dirfd, path, 0) {
        Ok(statbuf) => statbuf,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Hash::Absent),
        Err(err) => return Err(err),
    };

    if statbuf.st_mode & S_IFMT != S_IFREG {
        return Ok(Hash::Absent);
    }

    let file = File::from(openat(dirfd, path, O_RDONLY, 0)?);
    Ok(hash_reader(file)?)
}

/// Hash a file at a given absolute path.
///
/// Equivalent to [`hash_file_at`] with [`None`] passed for `dirfd`.
pub fn hash_path(path: impl AsRef<Path>) -> io::Result<Hash>
{
    hash_file_at(None, path)
}

fn hash_reader(mut reader: impl Read) -> io::Result<Hash>
{
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[.. n]);
    }

    Ok(hasher.finalize())
}
