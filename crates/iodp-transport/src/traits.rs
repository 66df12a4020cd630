use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

/// An ordered, duplex byte channel.
///
/// Methods take `&self` so one link can be shared between the ingress pump
/// and callers sending requests. Reads and writes may be partial.
pub trait Link: Send + Sync {
    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing was available.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `buf`, returning how many bytes were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Bound how long a single `read` may block. `None` blocks indefinitely.
    ///
    /// Links that never block may ignore this.
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Link + ?Sized> Link for Arc<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

impl<T: Link + ?Sized> Link for Box<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

#[cfg(unix)]
impl Link for std::os::unix::net::UnixStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }
}

/// Returns true for read errors that only mean "no data yet".
pub fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
