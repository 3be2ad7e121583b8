//! Content hashing of files.

pub use self::{file::*, md5::*};

use std::{fmt, str::FromStr};

mod file;
mod md5;

const ABSENT_TOKEN: &str = "absent";

/// Content hash of a file, or the distinguished "absent" sentinel.
///
/// A file hashes to [`Hash::Absent`] when it does not exist, is a
/// directory, or is otherwise not a regular file the engine compares.
/// Every other I/O error while hashing is reported to the caller instead
/// of being folded into this sentinel; see [`hash_file_at`].
///
/// # Examples
///
/// ```
/// use walk_util::hash::{Hash, Md5};
/// let hash = Md5::new().update(b"Hello, world!").finalize();
/// assert_eq!(hash.to_string(), "6cd3556deb0da54bca060b4c39479839");
/// assert_eq!(Hash::Absent.to_string(), "absent");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Hash
{
    /// The file exists and hashes to this 128-bit digest.
    Present([u8; 16]),

    /// The file does not exist (or is not a regular file).
    Absent,
}

impl fmt::Display for Hash
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::Present(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            },
            Self::Absent => write!(f, "{ABSENT_TOKEN}"),
        }
    }
}

/// Returned when a [`Hash`] could not be parsed back from text.
#[derive(Debug, thiserror::Error)]
#[error("invalid hash: {0:?}")]
pub struct HashParseError(String);

impl FromStr for Hash
{
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        if s == ABSENT_TOKEN {
            return Ok(Self::Absent);
        }

        if s.len() != 32 || !s.is_ascii() {
            return Err(HashParseError(s.to_owned()));
        }

        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hex = &s[i * 2 .. i * 2 + 2];
            *byte = u8::from_str_radix(hex, 16)
                .map_err(|_| HashParseError(s.to_owned()))?;
        }

        Ok(Self::Present(bytes))
    }
}
