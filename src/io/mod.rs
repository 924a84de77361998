//! Byte channel abstraction.
//!
//! Writers and readers never touch a file path. They own an [`IoPort`], which
//! stages bytes in a fixed buffer and hands them to a caller-supplied
//! [`Transport`] (socket, pipe, memory, C callbacks).
//!
//! ```
//! use fragmux::io::{IoPort, MemoryBuffer};
//!
//! # fn main() -> fragmux::Result<()> {
//! let sink = MemoryBuffer::new();
//! let mut port = IoPort::new(sink.clone());
//! port.write_all(b"ftyp")?;
//! assert!(sink.is_empty());
//! port.flush()?;
//! assert_eq!(sink.to_vec(), b"ftyp");
//! # Ok(())
//! # }
//! ```

pub mod transport;

pub use transport::{
    CallbackTransport, MemoryBuffer, ReaderTransport, SeekableReaderTransport, Transport, Whence,
    WriterTransport,
};

use crate::config::{Config, DEFAULT_IO_BUFFER_SIZE};
use crate::error::{MuxError, Result};
use std::io;

/// Growth step for [`IoPort::read_bytes`].
const READ_CHUNK: usize = 64 * 1024;

/// Staging buffer plus exclusive ownership of a [`Transport`].
///
/// Every transport write must be accepted in full; a short write surfaces as
/// an I/O error and nothing is retried. A read returning 0 bytes is end of
/// stream.
pub struct IoPort {
    transport: Box<dyn Transport>,
    capacity: usize,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
    read_pos: usize,
    /// Offset of the transport's own cursor.
    transport_pos: u64,
}

impl IoPort {
    /// Port with the default 8 KiB staging buffer.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_buffer_size(transport, DEFAULT_IO_BUFFER_SIZE)
    }

    /// Port sized by `config.io_buffer_size`.
    pub fn with_config(transport: impl Transport + 'static, config: &Config) -> Self {
        Self::with_buffer_size(transport, config.io_buffer_size)
    }

    /// Port with a staging buffer of `size` bytes (at least 1).
    pub fn with_buffer_size(transport: impl Transport + 'static, size: usize) -> Self {
        let capacity = size.max(1);
        Self {
            transport: Box::new(transport),
            capacity,
            write_buf: Vec::with_capacity(capacity),
            read_buf: Vec::new(),
            read_pos: 0,
            transport_pos: 0,
        }
    }

    /// Capacity of the staging buffer.
    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    /// Whether the transport supports random access.
    pub fn is_seekable(&self) -> bool {
        self.transport.is_seekable()
    }

    /// Logical stream position, accounting for staged and read-ahead bytes.
    pub fn position(&self) -> u64 {
        self.transport_pos + self.write_buf.len() as u64 - self.buffered_read() as u64
    }

    fn buffered_read(&self) -> usize {
        self.read_buf.len() - self.read_pos
    }

    /// Stages `data`, handing full buffers to the transport.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.drop_read_ahead()?;
        if self.write_buf.len() + data.len() > self.capacity {
            self.flush_staged()?;
        }
        if data.len() >= self.capacity {
            self.push_to_transport(data)
        } else {
            self.write_buf.extend_from_slice(data);
            Ok(())
        }
    }

    /// Hands every staged byte to the transport.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_staged()
    }

    fn flush_staged(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.write_buf);
        let result = self.push_to_transport(&staged);
        self.write_buf = staged;
        self.write_buf.clear();
        result
    }

    fn push_to_transport(&mut self, data: &[u8]) -> Result<()> {
        let written = self.transport.write(data)?;
        if written != data.len() {
            return Err(MuxError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes accepted", written, data.len()),
            )));
        }
        self.transport_pos += written as u64;
        log::trace!("transport accepted {} bytes", written);
        Ok(())
    }

    /// Unread read-ahead must be given back before writing or seeking.
    fn drop_read_ahead(&mut self) -> Result<()> {
        let unread = self.buffered_read();
        if unread > 0 {
            if !self.is_seekable() {
                return Err(MuxError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot discard read-ahead on a non-seekable transport",
                )));
            }
            self.transport_pos = self.transport.seek(-(unread as i64), Whence::Current)?;
        }
        self.read_buf.clear();
        self.read_pos = 0;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.flush_staged()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered_read() == 0 {
            if buf.len() >= self.capacity {
                let n = self.transport.read(buf)?;
                self.transport_pos += n as u64;
                return Ok(n);
            }
            self.read_buf.resize(self.capacity, 0);
            let n = self.transport.read(&mut self.read_buf)?;
            self.read_buf.truncate(n);
            self.read_pos = 0;
            self.transport_pos += n as u64;
            if n == 0 {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.buffered_read());
        buf[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }

    /// Fills as much of `buf` as the stream allows and returns the count.
    /// Anything short of `buf.len()` means end of stream was reached.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Fills `buf` completely. End of stream part way is truncated input.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let filled = self.read_full(buf)?;
        if filled < buf.len() {
            return Err(MuxError::Format(format!(
                "truncated input: wanted {} bytes, got {}",
                buf.len(),
                filled
            )));
        }
        Ok(())
    }

    /// Reads exactly `len` bytes into a new vector.
    ///
    /// Memory grows with the bytes actually delivered, so a length taken from
    /// untrusted input fails as truncated instead of reserving it up front.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
        while buf.len() < len {
            let start = buf.len();
            let want = (len - start).min(READ_CHUNK);
            buf.resize(start + want, 0);
            let n = self.read_full(&mut buf[start..])?;
            if n < want {
                return Err(MuxError::Format(format!(
                    "truncated input: wanted {} bytes, got {}",
                    len,
                    start + n
                )));
            }
        }
        Ok(buf)
    }

    /// Moves forward `len` bytes, seeking when possible and reading otherwise.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        let buffered = (self.buffered_read() as u64).min(len);
        self.read_pos += buffered as usize;
        let mut remaining = len - buffered;
        if remaining == 0 {
            return Ok(());
        }
        if self.is_seekable() {
            let target = self.position() + remaining;
            self.seek(target as i64, Whence::Start)?;
            return Ok(());
        }
        let mut scratch = vec![0u8; self.capacity];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(MuxError::Format(format!(
                    "truncated input: {} bytes missing while skipping",
                    remaining
                )));
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Flushes staged bytes and moves the transport cursor. Fails with an
    /// unsupported I/O error on non-seekable transports.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.flush_staged()?;
        let (offset, whence) = match whence {
            Whence::Current => (self.position() as i64 + offset, Whence::Start),
            other => (offset, other),
        };
        self.read_buf.clear();
        self.read_pos = 0;
        self.transport_pos = self.transport.seek(offset, whence)?;
        Ok(self.transport_pos)
    }

    /// Flushes and gives the transport back.
    pub fn into_transport(mut self) -> Result<Box<dyn Transport>> {
        self.flush_staged()?;
        Ok(self.transport)
    }
}
