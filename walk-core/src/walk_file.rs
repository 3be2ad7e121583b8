//! The durable per-command record: what ran, what it touched, and what
//! those touches hashed to.

use {
    std::{
        fs,
        io::{self, Write},
        os::unix::ffi::OsStrExt,
        path::{Path, PathBuf},
        time::Duration,
    },
    walk_util::{access::AccessKind, hash::Hash},
};

/// On-disk format version. Bumped whenever the record layout below
/// changes in an incompatible way.
const FORMAT_VERSION: u8 = 2;

/// Delimiter between a field's decimal byte-length and its raw bytes.
///
/// Fields are length-prefixed rather than delimited by a sentinel byte
/// like `\n`, because `command_text` and recorded paths are stored
/// verbatim and may themselves contain any byte (a Unix path may embed
/// a literal newline; a shell command routinely does, e.g. a heredoc).
/// A sentinel-delimited encoding would silently truncate such a field.
const NUL: u8 = 0;

/// One path the command touched, along with how it touched it and what
/// it hashed to immediately after the command finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalkFileEntry
{
    /// The path, as recorded (absolute, canonicalized).
    pub path: PathBuf,

    /// How the command accessed this path.
    pub kind: AccessKind,

    /// The path's content hash after the command finished.
    pub hash: Hash,
}

/// A command's complete prior-run record.
///
/// Produced after a command finishes; compared against to decide whether
/// a later invocation with the same walk path can be skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalkFile
{
    /// Verbatim command text that produced this record.
    pub command_text: Vec<u8>,

    /// Every path the command touched, and what it hashed to afterward.
    pub entries: Vec<WalkFileEntry>,

    /// Wall-clock time the command took to run.
    ///
    /// Informational only; it never participates in the skip decision.
    pub run_duration: Duration,
}

/// A walk file existed and was non-empty, but its content could not be
/// parsed as a valid record.
///
/// Per the runner's error-handling policy this is never surfaced to a
/// caller of [`run`][crate-level docs of the `walk` crate]: it is
/// treated the same as "no prior record exists" and logged at `debug!`.
#[derive(Debug, thiserror::Error)]
#[error("malformed walk file: {0}")]
pub struct ParseError(String);

impl WalkFile
{
    /// Load the walk file at `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist or is zero-length
    /// (the latter is the sentinel a prior run writes before it starts,
    /// so a crash mid-run leaves the file in this same state).
    pub fn load(path: impl AsRef<Path>) -> io::Result<Result<Option<Self>, ParseError>>
    {
        let bytes = match fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Ok(None)),
            Err(err) => return Err(err),
        };

        if bytes.is_empty() {
            return Ok(Ok(None));
        }

        Ok(Self::parse(&bytes).map(Some))
    }

    /// Truncate the walk file at `path` to zero length, or create it if
    /// it does not exist.
    ///
    /// This is the interrupt guard: it runs immediately before the
    /// command is spawned, so that a crash partway through the command
    /// leaves behind the same zero-length sentinel [`load`] treats as
    /// "no prior record".
    ///
    /// [`load`]: Self::load
    pub fn truncate(path: impl AsRef<Path>) -> io::Result<()>
    {
        fs::File::create(path.as_ref())?;
        Ok(())
    }

    /// Atomically write this record to `path`.
    ///
    /// Writes to a temporary file in the same directory as `path`, then
    /// renames it into place, so that concurrent readers (or a crash
    /// mid-write) never observe a partially written record.
    pub fn persist(&self, path: impl AsRef<Path>) -> io::Result<()>
    {
        let path = path.as_ref();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.encode())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    fn encode(&self) -> Vec<u8>
    {
        let mut out = vec![FORMAT_VERSION];

        write_field(&mut out, &self.command_text);
        write_field(&mut out, self.run_duration.as_secs().to_string().as_bytes());
        write_field(&mut out, self.run_duration.subsec_nanos().to_string().as_bytes());
        write_field(&mut out, self.entries.len().to_string().as_bytes());

        for entry in &self.entries {
            write_field(&mut out, entry.path.as_os_str().as_bytes());
            write_field(&mut out, access_kind_tag(entry.kind).as_bytes());
            write_field(&mut out, entry.hash.to_string().as_bytes());
        }

        out
    }

    fn parse(bytes: &[u8]) -> Result<Self, ParseError>
    {
        let err = || ParseError("truncated or malformed record".to_owned());

        let (&version, rest) = bytes.split_first().ok_or_else(err)?;
        if version != FORMAT_VERSION {
            return Err(ParseError(format!("unsupported format version {version}")));
        }

        let mut cursor = rest;

        let command_text = read_field(&mut cursor).ok_or_else(err)?.to_vec();

        let secs = parse_u64(read_field(&mut cursor).ok_or_else(err)?)?;
        let nanos = parse_u32(read_field(&mut cursor).ok_or_else(err)?)?;
        let run_duration = Duration::new(secs, nanos);

        let count = parse_u64(read_field(&mut cursor).ok_or_else(err)?)? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0 .. count {
            let path_bytes = read_field(&mut cursor).ok_or_else(err)?;
            let path = PathBuf::from(std::ffi::OsStr::from_bytes(path_bytes));

            let kind_bytes = read_field(&mut cursor).ok_or_else(err)?;
            let kind = parse_access_kind(kind_bytes)?;

            let hash_bytes = read_field(&mut cursor).ok_or_else(err)?;
            let hash_str = std::str::from_utf8(hash_bytes).map_err(|_| err())?;
            let hash: Hash = hash_str.parse().map_err(|_| err())?;

            entries.push(WalkFileEntry{ path, kind, hash });
        }

        if !cursor.is_empty() {
            return Err(err());
        }

        Ok(Self{ command_text, entries, run_duration })
    }
}

/// Append `field` to `out` as `<decimal length>\0<raw bytes>`.
fn write_field(out: &mut Vec<u8>, field: &[u8])
{
    out.extend_from_slice(field.len().to_string().as_bytes());
    out.push(NUL);
    out.extend_from_slice(field);
}

/// Read one length-prefixed field off the front of `*cursor`, advancing it
/// past the field. Returns `None` on any malformed or truncated input.
fn read_field<'a>(cursor: &mut &'a [u8]) -> Option<&'a [u8]>
{
    let nul_pos = cursor.iter().position(|&b| b == NUL)?;
    let (len_bytes, rest) = cursor.split_at(nul_pos);
    let len: usize = std::str::from_utf8(len_bytes).ok()?.parse().ok()?;
    let rest = &rest[1 ..]; // skip the NUL
    if rest.len() < len {
        return None;
    }
    let (field, rest) = rest.split_at(len);
    *cursor = rest;
    Some(field)
}

fn access_kind_tag(kind: AccessKind) -> &'static str
{
    match kind {
        AccessKind::Read => "read",
        AccessKind::Write => "write",
        AccessKind::ReadThenWrite => "read_then_write",
        AccessKind::FailedRead => "failed_read",
    }
}

fn parse_access_kind(bytes: &[u8]) -> Result<AccessKind, ParseError>
{
    match bytes {
        b"read" => Ok(AccessKind::Read),
        b"write" => Ok(AccessKind::Write),
        b"read_then_write" => Ok(AccessKind::ReadThenWrite),
        b"failed_read" => Ok(AccessKind::FailedRead),
        _ => Err(ParseError("invalid access kind".to_owned())),
    }
}

fn parse_u64(bytes: &[u8]) -> Result<u64, ParseError>
{
    std::str::from_utf8(bytes).ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError("invalid integer field".to_owned()))
}

fn parse_u32(bytes: &[u8]) -> Result<u32, ParseError>
{
    std::str::from_utf8(bytes).ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError("invalid integer field".to_owned()))
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn sample() -> WalkFile
    {
        WalkFile{
            command_text: b"cc -c -o a.o a.c".to_vec(),
            entries: vec![
                WalkFileEntry{
                    path: PathBuf::from("/tmp/a.c"),
                    kind: AccessKind::Read,
                    hash: Hash::Present([0xab; 16]),
                },
                WalkFileEntry{
                    path: PathBuf::from("/tmp/a.o"),
                    kind: AccessKind::Write,
                    hash: Hash::Present([0xcd; 16]),
                },
                WalkFileEntry{
                    path: PathBuf::from("/tmp/optional.h"),
                    kind: AccessKind::FailedRead,
                    hash: Hash::Absent,
                },
            ],
            run_duration: Duration::new(3, 500_000_000),
        }
    }

    #[test]
    fn round_trips_command_text_containing_a_newline()
    {
        // Command text is stored verbatim; a heredoc or multi-line
        // script is legal input and must not be truncated at the first
        // embedded newline.
        let mut walk_file = sample();
        walk_file.command_text = b"sh -c 'cat <<EOF\nhello\nEOF'".to_vec();
        let encoded = walk_file.encode();
        let decoded = WalkFile::parse(&encoded).unwrap();
        assert_eq!(walk_file, decoded);
    }

    #[test]
    fn round_trips_through_encode_and_parse()
    {
        let walk_file = sample();
        let encoded = walk_file.encode();
        let decoded = WalkFile::parse(&encoded).unwrap();
        assert_eq!(walk_file, decoded);
    }

    #[test]
    fn load_missing_file_is_none()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.walk");
        assert!(WalkFile::load(&path).unwrap().unwrap().is_none());
    }

    #[test]
    fn load_zero_length_file_is_none()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.walk");
        fs::File::create(&path).unwrap();
        assert!(WalkFile::load(&path).unwrap().unwrap().is_none());
    }

    #[test]
    fn load_malformed_file_is_parse_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.walk");
        fs::write(&path, [FORMAT_VERSION]).unwrap();
        assert!(WalkFile::load(&path).unwrap().is_err());
    }

    #[test]
    fn persist_then_load_round_trips()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.walk");
        let walk_file = sample();
        walk_file.persist(&path).unwrap();
        let loaded = WalkFile::load(&path).unwrap().unwrap().unwrap();
        assert_eq!(walk_file, loaded);
    }

    #[test]
    fn truncate_resets_to_sentinel()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.walk");
        sample().persist(&path).unwrap();
        WalkFile::truncate(&path).unwrap();
        assert!(WalkFile::load(&path).unwrap().unwrap().is_none());
    }
}
