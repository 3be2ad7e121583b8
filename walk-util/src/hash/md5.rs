use {
    super::Hash,
    md5::{Digest, Md5 as Md5Impl},
    std::io::{self, IoSlice, Write},
};

/// MD5 digest function.
///
/// MD5 is not used here for its (long broken) collision resistance against
/// an adversary; it is used because existing walk files on disk already
/// contain 128-bit MD5 digests, and changing the digest would silently
/// invalidate every recorded run. See the manual chapter on on-disk
/// compatibility.
///
/// The [`Write`] impl calls [`update`] for each incoming buffer.
/// The methods on the [`Write`] impl never return an error.
///
/// [`update`]: `Self::update`
pub struct Md5(Md5Impl);

impl Md5
{
    /// Create a new hasher.
    pub fn new() -> Self
    {
        Self(Md5Impl::new())
    }

    /// Add data to the hasher.
    ///
    /// Returns `self` for convenience.
    pub fn update(&mut self, buf: &[u8]) -> &mut Self
    {
        Digest::update(&mut self.0, buf);
        self
    }

    /// Extract the hash from the hasher.
    pub fn finalize(&self) -> Hash
    {
        let digest = self.0.clone().finalize();
        Hash::Present(digest.into())
    }
}

impl Write for Md5
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>
    {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()>
    {
        Ok(())
    }

    fn write_vectored(&mut self, bufs: &[IoSlice]) -> io::Result<usize>
    {
        let mut len = 0usize;
        for buf in bufs {
            if let Some(new_len) = len.checked_add(buf.len()) {
                len = new_len;
                self.update(buf);
            } else {
                break;
            }
        }
        Ok(len)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>
    {
        self.update(buf);
        Ok(())
    }
}
