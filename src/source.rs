//! Byte sources feeding the buffered reader

use std::io::{self, Read};
use std::time::Duration;

/// A blocking, timeout-bounded producer of bytes
///
/// The transport behind it (a serial port, a pipe, a replayed capture)
/// is configured elsewhere; the reader only pulls bytes through this
/// surface.
pub trait ByteSource {
    /// Read up to `dst.len()` bytes, returning how many arrived
    ///
    /// A return of 0 means nothing arrived within the configured
    /// timeout. It is NOT end-of-stream unless the implementation
    /// documents otherwise.
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    /// Bound how long a single `read` call may block
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        (**self).read(dst)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }
}

/// Adapter exposing any [`io::Read`] as a [`ByteSource`]
///
/// Useful for replaying captured transport data from a file or an
/// in-memory cursor. The timeout is a no-op, and an exhausted reader
/// keeps returning 0, which the buffered reader surfaces as a source
/// timeout.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
}

impl<R> ReadSource<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Unwrap the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.inner.read(dst)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_source_drains_then_reports_idle() {
        let mut source = ReadSource::new(Cursor::new(vec![1u8, 2, 3]));
        source.set_timeout(Duration::from_millis(100)).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mut_ref_forwards_to_the_source() {
        let mut source = ReadSource::new(Cursor::new(vec![9u8; 4]));
        let mut borrowed: &mut ReadSource<_> = &mut source;

        let mut buf = [0u8; 4];
        assert_eq!(ByteSource::read(&mut borrowed, &mut buf).unwrap(), 4);
        assert_eq!(buf, [9u8; 4]);
    }
}
