//! Panel links
//!
//! The panel speaks over RS-232, either on a local port or through a
//! network serial bridge. Both ends look the same to the engine: a byte
//! stream with a read timeout that can be split into a read half and a
//! write half.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Byte stream carrying panel traffic
pub trait Transport: Read + Write + Send {
    /// Bound how long a single read may block
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard output the panel sent before we started listening
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Second handle onto the same link, used as the write half
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Local RS-232 port
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Wrap a port already configured for the panel (see `open_port`)
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialLink { port }))
    }
}

/// Panel reached through a raw TCP serial bridge (ser2net and similar)
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Wrap a connected bridge socket
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Read and discard until the socket has nothing queued
    fn drain(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 1024];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))
    }

    /// Sockets have no flush-input call, so drain in non-blocking mode
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        let drained = self.drain();
        self.stream.set_nonblocking(false)?;
        drained
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpLink::new(self.stream.try_clone()?)))
    }
}
