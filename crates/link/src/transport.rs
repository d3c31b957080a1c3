//! Byte-stream transports. Reads never block: an idle stream yields zero
//! bytes so the owning loop can get on with its other work.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serialport::SerialPort;
use tracing::info;

pub trait Transport {
    /// Copy whatever bytes are already buffered into `buf`. Returns `Ok(0)`
    /// when nothing is waiting.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Close and reopen the underlying stream.
    fn reopen(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// Serial port
// ---------------------------------------------------------------------------

/// Read timeout for the serial port; a timed-out read means "no data".
const SERIAL_POLL_TIMEOUT: Duration = Duration::from_millis(1);

pub struct SerialTransport {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> io::Result<Self> {
        let port = open_port(path, baud)?;
        info!(path, baud, "serial link opened");
        Ok(Self {
            path: path.to_string(),
            baud,
            port: Some(port),
        })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

fn open_port(path: &str, baud: u32) -> io::Result<Box<dyn SerialPort>> {
    serialport::new(path, baud)
        .timeout(SERIAL_POLL_TIMEOUT)
        .open()
        .map_err(io::Error::from)
}

impl Transport for SerialTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self.port()?;
        let waiting = port.bytes_to_read().map_err(io::Error::from)? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let n = waiting.min(buf.len());
        match port.read(&mut buf[..n]) {
            Ok(read) => Ok(read),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn reopen(&mut self) -> io::Result<()> {
        // Release the old handle first; some platforms refuse a second open.
        self.port = None;
        self.port = Some(open_port(&self.path, self.baud)?);
        info!(path = %self.path, "serial link reopened");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory pair
// ---------------------------------------------------------------------------

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of a cross-connected in-memory byte stream.
#[derive(Clone)]
pub struct MemoryTransport {
    rx: Pipe,
    tx: Pipe,
    reopens: Arc<Mutex<u32>>,
}

impl MemoryTransport {
    /// Two ends: bytes written to one are read from the other.
    pub fn pair() -> (Self, Self) {
        let a: Pipe = Arc::default();
        let b: Pipe = Arc::default();
        (
            Self {
                rx: Arc::clone(&a),
                tx: Arc::clone(&b),
                reopens: Arc::default(),
            },
            Self {
                rx: b,
                tx: a,
                reopens: Arc::default(),
            },
        )
    }

    /// Queue bytes as if the peer had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.rx).extend(bytes);
    }

    /// Drain everything written by this end that the peer has not read.
    pub fn take_written(&self) -> Vec<u8> {
        lock(&self.tx).drain(..).collect()
    }

    pub fn reopen_count(&self) -> u32 {
        *self.reopens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock(pipe: &Pipe) -> std::sync::MutexGuard<'_, VecDeque<u8>> {
    pipe.lock().unwrap_or_else(|e| e.into_inner())
}

impl Transport for MemoryTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = lock(&self.rx);
        let n = rx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        lock(&self.tx).extend(bytes);
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        lock(&self.rx).clear();
        *self.reopens.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pair_is_cross_connected() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.write_all(b"<PING>").unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(a.read_available(&mut buf).unwrap(), 0);
        let n = b.read_available(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"<PING>");
    }

    #[test]
    fn memory_read_respects_buffer_size() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.write_all(b"abcdef").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read_available(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(b.read_available(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn memory_reopen_discards_unread_input() {
        let (a, mut b) = MemoryTransport::pair();
        b.inject(b"stale");
        b.reopen().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.read_available(&mut buf).unwrap(), 0);
        assert_eq!(b.reopen_count(), 1);
        assert_eq!(a.reopen_count(), 0);
    }
}
