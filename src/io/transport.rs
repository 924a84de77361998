use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Origin for [`Transport::seek`], mirroring the C `whence` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    fn to_seek_from(self, offset: i64) -> io::Result<SeekFrom> {
        Ok(match self {
            Whence::Start => SeekFrom::Start(u64::try_from(offset).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "negative absolute seek")
            })?),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        })
    }
}

/// A caller-provided byte channel.
///
/// `write` returns how many bytes were accepted; anything short of the full
/// buffer is treated as a failure by [`IoPort`](super::IoPort). `read` returning
/// `Ok(0)` means end of stream.
pub trait Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, _offset: i64, _whence: Whence) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport is not seekable",
        ))
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        (**self).seek(offset, whence)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
}

pub type WriteCallback<C> = Box<dyn FnMut(&mut C, &[u8]) -> i64>;
pub type ReadCallback<C> = Box<dyn FnMut(&mut C, &mut [u8]) -> i64>;
pub type SeekCallback<C> = Box<dyn FnMut(&mut C, i64, Whence) -> i64>;

/// Binds an opaque context to C-shaped callbacks.
///
/// Every callback returns a byte count or new offset, or a negative value on
/// failure. A missing callback makes the matching operation unsupported.
pub struct CallbackTransport<C> {
    context: C,
    on_write: Option<WriteCallback<C>>,
    on_read: Option<ReadCallback<C>>,
    on_seek: Option<SeekCallback<C>>,
}

impl<C> CallbackTransport<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            on_write: None,
            on_read: None,
            on_seek: None,
        }
    }

    pub fn with_write(mut self, f: impl FnMut(&mut C, &[u8]) -> i64 + 'static) -> Self {
        self.on_write = Some(Box::new(f));
        self
    }

    pub fn with_read(mut self, f: impl FnMut(&mut C, &mut [u8]) -> i64 + 'static) -> Self {
        self.on_read = Some(Box::new(f));
        self
    }

    pub fn with_seek(mut self, f: impl FnMut(&mut C, i64, Whence) -> i64 + 'static) -> Self {
        self.on_seek = Some(Box::new(f));
        self
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }
}

fn callback_result(operation: &str, ret: i64) -> io::Result<u64> {
    u64::try_from(ret).map_err(|_| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("{} callback failed with {}", operation, ret),
        )
    })
}

fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("no {} callback installed", operation),
    )
}

impl<C> Transport for CallbackTransport<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let f = self.on_write.as_mut().ok_or_else(|| unsupported("write"))?;
        callback_result("write", f(&mut self.context, buf)).map(|n| n as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let f = self.on_read.as_mut().ok_or_else(|| unsupported("read"))?;
        callback_result("read", f(&mut self.context, buf)).map(|n| n as usize)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let f = self.on_seek.as_mut().ok_or_else(|| unsupported("seek"))?;
        callback_result("seek", f(&mut self.context, offset, whence))
    }

    fn is_seekable(&self) -> bool {
        self.on_seek.is_some()
    }
}

/// Write-only adapter over any [`std::io::Write`] (sockets, pipes, files).
pub struct WriterTransport<W>(pub W);

impl<W: Write> Transport for WriterTransport<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport is write-only",
        ))
    }
}

/// Forward-only read adapter over any [`std::io::Read`].
pub struct ReaderTransport<R>(pub R);

impl<R: Read> Transport for ReaderTransport<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport is read-only",
        ))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Read adapter that also forwards seeks.
pub struct SeekableReaderTransport<R>(pub R);

impl<R: Read + Seek> Transport for SeekableReaderTransport<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport is read-only",
        ))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        self.0.seek(whence.to_seek_from(offset)?)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Shared in-memory byte store.
///
/// Clones share the same bytes, so a caller can keep one handle and inspect
/// what a writer has emitted through another. Writes append; reads and seeks
/// move a per-handle cursor.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    cursor: u64,
    seekable: bool,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::from_bytes(Vec::new())
    }
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes.into())),
            cursor: 0,
            seekable: true,
        }
    }

    /// Same contents, but reports itself as non-seekable, like a socket.
    pub fn streaming(mut self) -> Self {
        self.seekable = false;
        self
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Transport for MemoryBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let start = (self.cursor as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.cursor += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "transport is not seekable",
            ));
        }
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.cursor as i64,
            Whence::End => self.data.lock().len() as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| *t >= 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        self.cursor = target as u64;
        Ok(self.cursor)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_buffer_shares_contents() {
        let observer = MemoryBuffer::new();
        let mut writer = observer.clone();
        writer.write(b"moof").unwrap();
        assert_eq!(observer.to_vec(), b"moof");

        let mut reader = observer.clone();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.seek(1, Whence::Start).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"oof");
    }

    #[test]
    fn test_streaming_buffer_refuses_seek() {
        let mut buf = MemoryBuffer::from_bytes(vec![1, 2, 3]).streaming();
        assert!(!buf.is_seekable());
        assert_eq!(
            buf.seek(0, Whence::Start).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_callback_transport_reports_negative_as_error() {
        let mut transport = CallbackTransport::new(Vec::<u8>::new())
            .with_write(|ctx, buf| {
                ctx.extend_from_slice(buf);
                buf.len() as i64
            })
            .with_read(|_, _| -5);
        assert_eq!(transport.write(b"abc").unwrap(), 3);
        assert_eq!(transport.context(), b"abc");
        assert!(transport.read(&mut [0u8; 4]).is_err());
        assert!(!transport.is_seekable());
        assert!(transport.seek(0, Whence::Start).is_err());
    }

    #[test]
    fn test_seekable_reader_transport() {
        let mut transport = SeekableReaderTransport(Cursor::new(vec![10u8, 20, 30, 40]));
        assert_eq!(transport.seek(-1, Whence::End).unwrap(), 3);
        let mut buf = [0u8; 2];
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 40);
        assert!(transport.seek(-1, Whence::Start).is_err());
    }
}
