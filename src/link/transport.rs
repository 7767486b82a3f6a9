// Serial transport to the mount firmware
//
// One connection is split into two capabilities over a shared port handle:
// - `LinkWriter`: atomic, ordered writes of whole frames
// - `LineStream`: decoded ASCII lines produced by a background reader thread
//
// The reader polls for available bytes, splits on '\n' (keeping partial
// lines across polls) and checks a stop flag once per poll cycle.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reference firmware baud rate
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Sleep between reader polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest read performed per poll
const READ_CHUNK: usize = 1024;

/// Unterminated bytes kept before the partial line is discarded
const MAX_PENDING: usize = READ_CHUNK * 4;

/// Error types for the serial link
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port is closed")]
    PortClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Minimal byte-stream interface the transport needs from a port
pub trait SerialIo: Read + Write + Send {
    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> io::Result<usize>;
}

impl SerialIo for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

/// Anything that accepts outgoing wire bytes
pub trait CommandSink {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

type SharedPort = Arc<Mutex<Option<Box<dyn SerialIo>>>>;

/// Events produced by the background reader
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// One complete ASCII line from the firmware, trimmed
    Line(String),
    /// The reader hit an I/O error and closed the port
    Fault(String),
}

/// Splits a byte stream into ASCII lines
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    /// Feed raw bytes, returning every line completed by them
    ///
    /// Lines with non-ASCII bytes are dropped; blank lines are skipped.
    /// A partial line longer than `MAX_PENDING` bytes is discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let raw = &raw[..raw.len() - 1];

            if !raw.is_ascii() {
                debug!("Dropping non-ASCII line ({} bytes)", raw.len());
                continue;
            }

            let text = String::from_utf8_lossy(raw).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }

        if self.buffer.len() > MAX_PENDING {
            debug!("Dropping {} unterminated bytes", self.buffer.len());
            self.buffer.clear();
        }
        lines
    }

    /// Bytes waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Write half of a serial link
#[derive(Clone)]
pub struct LinkWriter {
    port: SharedPort,
}

impl LinkWriter {
    /// Write a whole frame; concurrent callers never interleave
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.port.lock().map_err(|_| TransportError::PortClosed)?;
        let port = guard.as_mut().ok_or(TransportError::PortClosed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

impl CommandSink for LinkWriter {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        LinkWriter::send(self, bytes)
    }
}

/// Read half of a serial link: lines decoded by the background reader
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl LineStream {
    /// Wait for the next event; `None` once the reader has stopped and drained
    pub async fn next(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_next(&mut self) -> Option<LinkEvent> {
        self.rx.try_recv().ok()
    }
}

/// An open serial connection with its background reader
pub struct SerialLink {
    port_name: String,
    writer: LinkWriter,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Open a serial port and start its reader
    pub fn open(port_name: &str, baudrate: u32) -> Result<(Self, LineStream)> {
        info!("Opening serial link on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Self::spawn(port_name, Box::new(port), POLL_INTERVAL)
    }

    /// Start a link over an already-open port
    pub fn spawn(
        port_name: &str,
        port: Box<dyn SerialIo>,
        poll: Duration,
    ) -> Result<(Self, LineStream)> {
        let shared: SharedPort = Arc::new(Mutex::new(Some(port)));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("serial-reader {}", port_name))
                .spawn(move || read_loop(shared, stop, tx, poll))?
        };

        let link = Self {
            port_name: port_name.to_string(),
            writer: LinkWriter { port: shared },
            stop,
            worker: Some(worker),
        };
        Ok((link, LineStream { rx }))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Handle for sending frames
    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    /// Stop the reader and close the port
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Serial reader for {} panicked", self.port_name);
            }
            info!("Serial link {} closed", self.port_name);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    port: SharedPort,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
    poll: Duration,
) {
    let mut splitter = LineSplitter::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    while !stop.load(Ordering::Acquire) {
        match read_available(&port, &mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                for line in splitter.push(&chunk[..n]) {
                    // Nobody listening is not an error for the reader
                    let _ = events.send(LinkEvent::Line(line));
                }
            }
            Err(e) => {
                error!("Serial read failed: {}", e);
                let _ = events.send(LinkEvent::Fault(e.to_string()));
                break;
            }
        }
        thread::sleep(poll);
    }

    if let Ok(mut guard) = port.lock() {
        guard.take();
    }
    debug!("Serial reader stopped ({} bytes unterminated)", splitter.pending());
}

/// Read whatever is available; never blocks waiting for data
fn read_available(port: &SharedPort, buf: &mut [u8]) -> io::Result<usize> {
    let mut guard = port
        .lock()
        .map_err(|_| io::Error::other("serial port lock poisoned"))?;
    let Some(port) = guard.as_mut() else {
        return Err(io::Error::new(io::ErrorKind::NotConnected, "serial port closed"));
    };

    let available = port.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let len = available.min(buf.len());
    port.read(&mut buf[..len])
}
